//! Model Module - Novelty detection engine
//!
//! Tách logic scoring khỏi orchestration.
//!
//! - `isolation.rs` - Isolation forest (path-length scoring)
//! - `threshold.rs` - Contamination calibration (threshold at 0)
//! - `detector.rs` - `AnomalyDetector` state machine + atomic model swap

pub mod detector;
pub mod isolation;
pub mod threshold;
#[cfg(test)]
mod tests;

pub use detector::{
    AnomalyDetector, AnomalyModel, AnomalyVerdict, DetectionOutcome, DetectionStatus,
    DetectorConfig, DetectorState, DetectorStats, FitReport,
};
pub use isolation::{ForestConfig, IsolationForest};
pub use threshold::{Calibration, ThresholdConfig, ThresholdStats};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("insufficient samples: need {required}, have {available}")]
    InsufficientSamples { required: usize, available: usize },

    #[error("contamination {0} outside (0, 0.5]")]
    InvalidContamination(f64),

    #[error("numerical fit failure: {0}")]
    Numerical(String),
}
