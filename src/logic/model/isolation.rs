//! Isolation Forest - 1-D novelty scoring
//!
//! T randomized partitioning trees over a normalized sample set.
//! Expected path length to isolate a value is the signal: shorter path ⇒
//! more anomalous. Raw score is `-(2^(-E[h(x)] / c(ψ)))`, so lower is worse.
//!
//! A query outside the fitted value range is isolated before the first
//! split (path length 0, raw score -1).

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: crate::constants::DEFAULT_TREE_COUNT,
            max_samples: crate::constants::DEFAULT_MAX_SAMPLES,
            seed: crate::constants::DEFAULT_DETECTOR_SEED,
        }
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build(values: Vec<f64>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
        let (min, max) = bounds(&values);
        if depth >= limit || values.len() <= 1 || max <= min {
            return Node::Leaf { size: values.len() };
        }

        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<f64>, Vec<f64>) = values.into_iter().partition(|v| *v < threshold);

        Node::Split {
            threshold,
            left: Box::new(Node::build(left, depth + 1, limit, rng)),
            right: Box::new(Node::build(right, depth + 1, limit, rng)),
        }
    }

    fn path_length(&self, x: f64) -> f64 {
        let mut node = self;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split { threshold, left, right } => {
                    node = if x < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    min: f64,
    max: f64,
}

impl IsolationForest {
    /// Fit on normalized values. Caller guarantees a non-empty finite set.
    pub fn fit(values: &[f64], config: &ForestConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let sample_size = config.max_samples.clamp(1, values.len().max(1));
        let depth_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let (min, max) = bounds(values);

        let trees = (0..config.n_trees.max(1))
            .map(|_| {
                let sample: Vec<f64> = if sample_size >= values.len() {
                    values.to_vec()
                } else {
                    index::sample(&mut rng, values.len(), sample_size)
                        .into_iter()
                        .map(|i| values[i])
                        .collect()
                };
                Node::build(sample, 0, depth_limit, &mut rng)
            })
            .collect();

        Self {
            trees,
            sample_size,
            min,
            max,
        }
    }

    /// Mean path length across trees
    pub fn expected_path_length(&self, x: f64) -> f64 {
        if x.is_nan() || x < self.min || x > self.max {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        total / self.trees.len() as f64
    }

    /// `-(2^(-E[h(x)] / c(ψ)))`, in [-1, 0)
    pub fn raw_score(&self, x: f64) -> f64 {
        let normalizer = average_path_length(self.sample_size);
        if normalizer <= 0.0 {
            // ψ == 1: nothing to compare against
            return if self.expected_path_length(x) == 0.0 { -1.0 } else { -0.5 };
        }
        -(2f64).powf(-self.expected_path_length(x) / normalizer)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

/// c(n): average unsuccessful-search path length in a BST of n nodes
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(*v), hi.max(*v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 / n as f64) * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!(c256 > 10.0 && c256 < 11.0);
    }

    #[test]
    fn test_outlier_scores_lower_than_center() {
        let forest = IsolationForest::fit(&spread(200), &ForestConfig::default());
        let center = forest.raw_score(0.0);
        let edge = forest.raw_score(0.99);
        let outside = forest.raw_score(25.0);

        assert!(outside < edge, "outside={} edge={}", outside, edge);
        assert!(edge < center, "edge={} center={}", edge, center);
        assert_eq!(outside, -1.0);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let values = spread(120);
        let a = IsolationForest::fit(&values, &ForestConfig::default());
        let b = IsolationForest::fit(&values, &ForestConfig::default());
        for x in [-0.8, -0.1, 0.3, 0.95] {
            assert_eq!(a.raw_score(x).to_bits(), b.raw_score(x).to_bits());
        }
    }

    #[test]
    fn test_subsample_is_capped() {
        let forest = IsolationForest::fit(&spread(1000), &ForestConfig::default());
        assert_eq!(forest.sample_size(), 256);
        assert_eq!(forest.tree_count(), 100);

        let small = IsolationForest::fit(&spread(40), &ForestConfig::default());
        assert_eq!(small.sample_size(), 40);
    }

    #[test]
    fn test_constant_window_builds_leaves() {
        let forest = IsolationForest::fit(&[0.0; 50], &ForestConfig::default());
        assert!(forest.raw_score(0.0) > -1.0);
        assert_eq!(forest.raw_score(0.5), -1.0);
    }
}
