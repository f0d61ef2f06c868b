//! Contamination Threshold Calibration
//!
//! Chuyển raw novelty score thành decision score có ngưỡng tại 0.
//! The offset is the `contamination` quantile of the fitted window's raw
//! scores, so roughly that fraction of the window lands below zero.

use serde::{Deserialize, Serialize};

use super::FitError;

/// Contamination bounds (exclusive low, inclusive high)
pub const MIN_CONTAMINATION: f64 = 0.0;
pub const MAX_CONTAMINATION: f64 = 0.5;

/// Threshold Configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Assumed anomalous fraction of the historical window
    pub contamination: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            contamination: crate::constants::DEFAULT_CONTAMINATION,
        }
    }
}

impl ThresholdConfig {
    pub fn new(contamination: f64) -> Self {
        Self { contamination }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        let c = self.contamination;
        if !(c > MIN_CONTAMINATION && c <= MAX_CONTAMINATION) {
            return Err(FitError::InvalidContamination(c));
        }
        Ok(())
    }
}

/// Fitted calibration (immutable, part of the model)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Subtracted from raw scores
    pub offset: f64,
    pub contamination: f64,
    /// Fraction of the fitted window that scores below 0
    pub flagged_fraction: f64,
}

impl Calibration {
    /// Calibrate from the raw scores of the fitted window
    pub fn calibrate(raw_scores: &[f64], config: &ThresholdConfig) -> Result<Self, FitError> {
        config.validate()?;

        if raw_scores.is_empty() {
            return Err(FitError::Numerical("no scores to calibrate".to_string()));
        }
        if raw_scores.iter().any(|s| !s.is_finite()) {
            return Err(FitError::Numerical("non-finite novelty score".to_string()));
        }

        let mut sorted = raw_scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let offset = percentile(&sorted, config.contamination * 100.0);

        let flagged = sorted.iter().filter(|s| **s - offset < 0.0).count();

        Ok(Self {
            offset,
            contamination: config.contamination,
            flagged_fraction: flagged as f64 / sorted.len() as f64,
        })
    }

    /// Decision score: negative ⇒ anomalous
    pub fn decision(&self, raw_score: f64) -> f64 {
        raw_score - self.offset
    }

    pub fn is_anomaly(&self, decision: f64) -> bool {
        decision < 0.0
    }
}

/// Linear-interpolated percentile of an ascending slice (`q` in 0..=100)
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// Threshold statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdStats {
    pub offset: f64,
    pub contamination: f64,
    pub flagged_fraction: f64,
}

impl From<&Calibration> for ThresholdStats {
    fn from(c: &Calibration) -> Self {
        Self {
            offset: c.offset,
            contamination: c.contamination,
            flagged_fraction: c.flagged_fraction,
        }
    }
}
