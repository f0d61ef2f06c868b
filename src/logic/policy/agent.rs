//! Adaptive Policy - Greedy value-based mitigation selector
//!
//! `Q(state)` → one value per mitigation action. Selection is a pure arg-max
//! (no exploration), so behaviour depends only on parameters and input.
//! Learning is one TD step per call: no replay buffer, no batching.

use std::time::Instant;

use ndarray::ArrayView1;

use crate::logic::model::DetectionOutcome;
use crate::logic::sensors::{SensorId, SENSOR_COUNT};

use super::network::{argmax, QNetwork};
use super::types::{ActionRecord, PolicyConfig, PolicyError, PolicyState, UpdateReport};

/// Normalized inputs are clipped to this magnitude before evaluation
const STATE_CLIP: f32 = 10.0;

pub struct AdaptivePolicy {
    config: PolicyConfig,
    network: QNetwork,
    updates: u64,
}

impl AdaptivePolicy {
    /// Dimensions must both equal the sensor count
    pub fn new(config: PolicyConfig, state_dim: usize, action_dim: usize) -> Result<Self, PolicyError> {
        if state_dim != SENSOR_COUNT || action_dim != SENSOR_COUNT {
            return Err(PolicyError::DimensionMismatch {
                expected: SENSOR_COUNT,
                state_dim,
                action_dim,
            });
        }
        config.validate()?;

        let network = QNetwork::new(state_dim, &config.hidden_layers, action_dim, config.seed);
        log::info!(
            "[Policy] Initialized Q-network {}→{:?}→{} (γ={}, lr={})",
            state_dim,
            config.hidden_layers,
            action_dim,
            config.gamma,
            config.learning_rate
        );

        Ok(Self {
            config,
            network,
            updates: 0,
        })
    }

    /// Policy sized to the canonical sensor set
    pub fn for_sensor_set(config: PolicyConfig) -> Result<Self, PolicyError> {
        Self::new(config, SENSOR_COUNT, SENSOR_COUNT)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn q_values(&self, state: &PolicyState) -> Vec<f32> {
        self.network.forward(ArrayView1::from(&state[..])).to_vec()
    }

    /// Greedy action plus the wall-clock cost of the forward pass
    pub fn select_action(&self, state: &PolicyState) -> ActionRecord {
        let started = Instant::now();
        let q = self.q_values(state);
        let action_index = argmax(&q).unwrap_or(0);
        let selection_latency = started.elapsed();

        let sensor = SensorId::ALL[action_index];
        ActionRecord {
            action_index,
            target: sensor,
            mitigation: sensor.mitigation().to_string(),
            q_value: q.get(action_index).copied().unwrap_or(0.0),
            selection_latency,
        }
    }

    /// `reward + γ · max Q(next)`, or just `reward` for a terminal transition
    pub fn td_target(&self, reward: f32, next_state: &PolicyState, terminal: bool) -> f32 {
        let bootstrap = if terminal {
            0.0
        } else {
            let next = self.q_values(next_state);
            let best = argmax(&next).map(|i| next[i]).unwrap_or(0.0);
            self.config.gamma * best
        };
        reward + bootstrap
    }

    /// Move `Q(state)[action]` toward the TD target (squared-error SGD step)
    pub fn update(
        &mut self,
        state: &PolicyState,
        action: usize,
        reward: f32,
        next_state: &PolicyState,
        terminal: bool,
    ) -> Result<UpdateReport, PolicyError> {
        if action >= SENSOR_COUNT {
            return Err(PolicyError::InvalidAction {
                action,
                action_count: SENSOR_COUNT,
            });
        }

        let target = self.td_target(reward, next_state, terminal);
        let q_before = self.q_values(state)[action];
        let loss = self.network.train_single(
            ArrayView1::from(&state[..]),
            action,
            target,
            self.config.learning_rate,
        );
        let q_after = self.q_values(state)[action];
        self.updates += 1;

        log::debug!(
            "[Policy] TD update a={} r={:.2} target={:.4} Q {:.4}→{:.4}",
            action,
            reward,
            target,
            q_before,
            q_after
        );

        Ok(UpdateReport {
            td_target: target,
            loss,
            q_before,
            q_after,
        })
    }
}

/// Policy input from a detection outcome (normalized values, absent → 0)
pub fn state_from_outcome(outcome: &DetectionOutcome) -> PolicyState {
    let mut state = [0.0f32; SENSOR_COUNT];
    for (slot, verdict) in state.iter_mut().zip(outcome.verdicts.iter()) {
        *slot = verdict
            .normalized
            .filter(|v| v.is_finite())
            .map(|v| (v as f32).clamp(-STATE_CLIP, STATE_CLIP))
            .unwrap_or(0.0);
    }
    state
}

/// Reward for acting on `action` given the anomalies seen in `outcome`
pub fn reward_for(outcome: &DetectionOutcome, action: usize) -> f32 {
    if !outcome.any_anomaly() {
        return 0.0;
    }
    match SensorId::from_index(action) {
        Some(sensor) if outcome.verdict(sensor).is_anomalous => 1.0,
        _ => -0.5,
    }
}
