//! Policy Types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::sensors::{SensorId, SENSOR_COUNT};

/// Policy input: one normalized value per sensor (absent → 0)
pub type PolicyState = [f32; SENSOR_COUNT];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub gamma: f32,
    pub learning_rate: f32,
    pub hidden_layers: Vec<usize>,
    pub seed: u64,
    /// Apply TD updates from observed rewards
    pub learning_enabled: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gamma: constants::DEFAULT_GAMMA,
            learning_rate: constants::DEFAULT_LEARNING_RATE,
            hidden_layers: vec![128, 64],
            seed: constants::DEFAULT_POLICY_SEED,
            learning_enabled: true,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(PolicyError::InvalidParameter(format!("gamma {} outside [0, 1]", self.gamma)));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(PolicyError::InvalidParameter(format!(
                "learning rate {} must be positive",
                self.learning_rate
            )));
        }
        if self.hidden_layers.iter().any(|&h| h == 0) {
            return Err(PolicyError::InvalidParameter("hidden layer of width 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("dimension mismatch: expected {expected}, got state {state_dim} / action {action_dim}")]
    DimensionMismatch {
        expected: usize,
        state_dim: usize,
        action_dim: usize,
    },

    #[error("action {action} outside 0..{action_count}")]
    InvalidAction { action: usize, action_count: usize },

    #[error("invalid policy parameter: {0}")]
    InvalidParameter(String),
}

/// Selected mitigation
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action_index: usize,
    pub target: SensorId,
    /// Human-readable mitigation descriptor
    pub mitigation: String,
    pub q_value: f32,
    pub selection_latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UpdateReport {
    pub td_target: f32,
    pub loss: f32,
    pub q_before: f32,
    pub q_after: f32,
}
