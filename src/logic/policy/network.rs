//! Q-Network - Small dense ReLU network
//!
//! Layout mirrors the response model: `input → 128 → 64 → output`.
//! Weights are f32, initialised uniform in ±1/sqrt(fan_in) from a seeded RNG.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// LAYER
// ============================================================================

#[derive(Debug, Clone)]
struct Dense {
    /// (out × in)
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    fn new(input: usize, output: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (input.max(1) as f32).sqrt();
        Self {
            weights: Array2::from_shape_fn((output, input), |_| rng.gen_range(-bound..bound)),
            bias: Array1::from_shape_fn(output, |_| rng.gen_range(-bound..bound)),
        }
    }

    fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.weights.dot(&x) + &self.bias
    }
}

// ============================================================================
// NETWORK
// ============================================================================

#[derive(Debug, Clone)]
pub struct QNetwork {
    layers: Vec<Dense>,
}

impl QNetwork {
    pub fn new(input: usize, hidden: &[usize], output: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sizes = Vec::with_capacity(hidden.len() + 2);
        sizes.push(input);
        sizes.extend_from_slice(hidden);
        sizes.push(output);

        let layers = sizes
            .windows(2)
            .map(|pair| Dense::new(pair[0], pair[1], &mut rng))
            .collect();

        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.weights.ncols()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.bias.len()).unwrap_or(0)
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let last = self.layers.len().saturating_sub(1);
        let mut activation = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(activation.view());
            activation = if i < last { relu(z) } else { z };
        }
        activation
    }

    /// One SGD step on `(Q(x)[action] - target)²`. Returns the pre-step loss.
    pub fn train_single(&mut self, x: ArrayView1<f32>, action: usize, target: f32, learning_rate: f32) -> f32 {
        let last = self.layers.len().saturating_sub(1);

        // Forward, keeping each layer's input and pre-activation
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut activation = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(activation.view());
            inputs.push(activation);
            activation = if i < last { relu(z.clone()) } else { z.clone() };
            pre_activations.push(z);
        }

        let q = activation;
        let error = q[action] - target;
        let loss = error * error;

        // Only the taken action contributes to the gradient
        let mut delta = Array1::<f32>::zeros(q.len());
        delta[action] = 2.0 * error;

        for i in (0..self.layers.len()).rev() {
            if i < last {
                delta.zip_mut_with(&pre_activations[i], |d, z| {
                    if *z <= 0.0 {
                        *d = 0.0;
                    }
                });
            }

            let input = &inputs[i];
            let layer = &mut self.layers[i];
            let upstream = layer.weights.t().dot(&delta);

            let grad_w = delta
                .view()
                .insert_axis(Axis(1))
                .dot(&input.view().insert_axis(Axis(0)));
            layer.weights.scaled_add(-learning_rate, &grad_w);
            layer.bias.scaled_add(-learning_rate, &delta);

            delta = upstream;
        }

        loss
    }
}

fn relu(mut z: Array1<f32>) -> Array1<f32> {
    z.mapv_inplace(|v| v.max(0.0));
    z
}

/// Index of the largest finite value (ties → lowest index)
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.iter().copied().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
