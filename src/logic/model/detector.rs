//! Anomaly Detector
//!
//! State machine: **Unfit → Fit → Refitting → Fit**.
//!
//! The fitted `AnomalyModel` is immutable and lives behind an `Arc`; a refit
//! builds the replacement off-lock and swaps it in one write, so concurrent
//! `detect` calls always score against a complete model.
//!
//! # Failure Strategy
//! Unfit or failed fit ⇒ every verdict is "not anomalous" and the outcome is
//! tagged `NotYetFit`. Absence of signal is never reported as an anomaly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::scaler::{RunningStats, ScalerState, SensorScaler};
use crate::logic::sensors::{layout_hash, SensorFrame, SensorId, SENSOR_COUNT};

use super::isolation::{ForestConfig, IsolationForest};
use super::threshold::{Calibration, ThresholdConfig, ThresholdStats};
use super::FitError;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum finite samples for a fit
    pub min_samples: usize,
    /// Rolling window size (raw values kept for fitting)
    pub window_size: usize,
    pub contamination: f64,
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: constants::DEFAULT_MIN_FIT_SAMPLES,
            window_size: constants::DEFAULT_WINDOW_SIZE,
            contamination: constants::DEFAULT_CONTAMINATION,
            n_trees: constants::DEFAULT_TREE_COUNT,
            max_samples: constants::DEFAULT_MAX_SAMPLES,
            seed: constants::DEFAULT_DETECTOR_SEED,
        }
    }
}

impl DetectorConfig {
    fn forest(&self) -> ForestConfig {
        ForestConfig {
            n_trees: self.n_trees,
            max_samples: self.max_samples,
            seed: self.seed,
        }
    }

    fn threshold(&self) -> ThresholdConfig {
        ThresholdConfig::new(self.contamination)
    }
}

// ============================================================================
// STATE & RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    Unfit,
    Fit,
    Refitting,
}

/// Tags a detection outcome so degraded ticks are distinguishable from clean ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    /// No model was available: verdicts are the all-clear default
    NotYetFit,
    /// Scored against a fitted model
    Fit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub sensor: SensorId,
    pub is_anomalous: bool,
    /// Raw value, kept only for anomalous readings
    pub raw_value: Option<f64>,
    /// Calibrated decision score (negative ⇒ anomalous)
    pub score: Option<f64>,
    pub normalized: Option<f64>,
}

impl AnomalyVerdict {
    pub fn clear(sensor: SensorId) -> Self {
        Self {
            sensor,
            is_anomalous: false,
            raw_value: None,
            score: None,
            normalized: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub status: DetectionStatus,
    pub model_version: Option<u64>,
    pub verdicts: [AnomalyVerdict; SENSOR_COUNT],
}

impl DetectionOutcome {
    pub fn all_clear() -> Self {
        Self {
            status: DetectionStatus::NotYetFit,
            model_version: None,
            verdicts: SensorId::ALL.map(AnomalyVerdict::clear),
        }
    }

    pub fn verdict(&self, sensor: SensorId) -> &AnomalyVerdict {
        &self.verdicts[sensor.index()]
    }

    pub fn any_anomaly(&self) -> bool {
        self.verdicts.iter().any(|v| v.is_anomalous)
    }

    pub fn flagged(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.verdicts.iter().filter(|v| v.is_anomalous).map(|v| v.sensor)
    }

    pub fn is_degraded(&self) -> bool {
        self.status == DetectionStatus::NotYetFit
    }
}

/// Result of a successful fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub version: u64,
    pub samples: usize,
    pub offset: f64,
    pub flagged_fraction: f64,
    pub fitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStats {
    pub state: DetectorState,
    pub model_version: Option<u64>,
    pub fitted_at: Option<DateTime<Utc>>,
    pub window_len: usize,
    pub detections: u64,
    pub anomalies_flagged: u64,
    pub fit_failures: u64,
    pub threshold: Option<ThresholdStats>,
}

// ============================================================================
// MODEL
// ============================================================================

/// Immutable fitted snapshot
///
/// The forest is fitted on the window standardized by `window_stats`, while
/// `detect` feeds it the live per-sensor z-values from the online scaler. Both
/// are unit-scale. `scaler` records the online state at fit time and is not
/// consulted when scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub version: u64,
    pub layout_hash: u32,
    /// Copy of the online scaler at fit time
    pub scaler: ScalerState,
    /// Pooled statistics of the fitted window
    pub window_stats: RunningStats,
    pub forest: IsolationForest,
    pub calibration: Calibration,
    pub fitted_at: DateTime<Utc>,
    pub window_size: usize,
}

impl AnomalyModel {
    /// Calibrated score of a normalized value (negative ⇒ anomalous)
    pub fn score(&self, normalized: f64) -> f64 {
        self.calibration.decision(self.forest.raw_score(normalized))
    }

    pub fn is_anomaly(&self, normalized: f64) -> bool {
        self.calibration.is_anomaly(self.score(normalized))
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

struct ModelSlot {
    state: DetectorState,
    model: Option<Arc<AnomalyModel>>,
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    slot: RwLock<ModelSlot>,
    scaler: Mutex<SensorScaler>,
    /// Recent raw values, newest first
    window: Mutex<VecDeque<f64>>,
    /// Serializes fits (one writer)
    fit_lock: Mutex<()>,
    next_version: AtomicU64,
    detections: AtomicU64,
    anomalies_flagged: AtomicU64,
    fit_failures: AtomicU64,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            slot: RwLock::new(ModelSlot {
                state: DetectorState::Unfit,
                model: None,
            }),
            scaler: Mutex::new(SensorScaler::new()),
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            fit_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
            detections: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            fit_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> DetectorState {
        self.slot.read().state
    }

    /// Current model handle (cheap `Arc` clone)
    pub fn model(&self) -> Option<Arc<AnomalyModel>> {
        self.slot.read().model.clone()
    }

    /// Fit from a historical window (newest first). Replaces the rolling window.
    pub fn fit(&self, historical_values: &[f64]) -> Result<FitReport, FitError> {
        {
            let mut window = self.window.lock();
            window.clear();
            window.extend(historical_values.iter().copied().take(self.config.window_size));
        }
        self.rebuild(historical_values)
    }

    /// Scheduled refit: the old model keeps serving until the swap
    pub fn refit(&self, historical_values: &[f64]) -> Result<FitReport, FitError> {
        {
            let mut slot = self.slot.write();
            if slot.state == DetectorState::Fit {
                slot.state = DetectorState::Refitting;
            }
        }
        self.fit(historical_values)
    }

    /// Refit from the detector's own rolling window
    pub fn refit_from_window(&self) -> Result<FitReport, FitError> {
        let values: Vec<f64> = self.window.lock().iter().copied().collect();
        self.refit(&values)
    }

    /// Calibrated score for a normalized value, `None` while Unfit
    pub fn score(&self, normalized: f64) -> Option<f64> {
        self.model().map(|m| m.score(normalized))
    }

    /// Score every present reading of `frame`
    pub fn detect(&self, frame: &SensorFrame) -> DetectionOutcome {
        self.detections.fetch_add(1, Ordering::Relaxed);

        let model = match self.model() {
            Some(model) => Some(model),
            None => self.fit_from_available_history(),
        };

        let mut outcome = DetectionOutcome::all_clear();
        if let Some(model) = &model {
            outcome.status = DetectionStatus::Fit;
            outcome.model_version = Some(model.version);
        }

        {
            let mut scaler = self.scaler.lock();
            // non-finite readings are treated as absent
            for reading in frame.readings().filter(|r| r.value().is_finite()) {
                let normalized = scaler.observe(reading);
                let verdict = &mut outcome.verdicts[reading.sensor().index()];
                verdict.normalized = Some(normalized);

                if let Some(model) = &model {
                    let score = model.score(normalized);
                    verdict.score = Some(score);
                    verdict.is_anomalous = model.calibration.is_anomaly(score);
                    if verdict.is_anomalous {
                        verdict.raw_value = Some(reading.value());
                    }
                }
            }
        }

        self.remember(frame);

        let flagged = outcome.flagged().count() as u64;
        if flagged > 0 {
            self.anomalies_flagged.fetch_add(flagged, Ordering::Relaxed);
            for v in outcome.verdicts.iter().filter(|v| v.is_anomalous) {
                log::warn!(
                    "[Detector] {} anomalous: value={:.2} score={:.4}",
                    v.sensor,
                    v.raw_value.unwrap_or(f64::NAN),
                    v.score.unwrap_or(f64::NAN)
                );
            }
        }

        outcome
    }

    pub fn window_len(&self) -> usize {
        self.window.lock().len()
    }

    pub fn scaler_state(&self) -> ScalerState {
        self.scaler.lock().snapshot()
    }

    pub fn stats(&self) -> DetectorStats {
        let (state, model) = {
            let slot = self.slot.read();
            (slot.state, slot.model.clone())
        };
        DetectorStats {
            state,
            model_version: model.as_ref().map(|m| m.version),
            fitted_at: model.as_ref().map(|m| m.fitted_at),
            window_len: self.window_len(),
            detections: self.detections.load(Ordering::Relaxed),
            anomalies_flagged: self.anomalies_flagged.load(Ordering::Relaxed),
            fit_failures: self.fit_failures.load(Ordering::Relaxed),
            threshold: model.as_ref().map(|m| ThresholdStats::from(&m.calibration)),
        }
    }

    // ------------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------------

    fn fit_from_available_history(&self) -> Option<Arc<AnomalyModel>> {
        let values: Vec<f64> = self.window.lock().iter().copied().collect();
        match self.rebuild(&values) {
            Ok(report) => {
                log::info!("[Detector] Lazy fit succeeded on {} samples", report.samples);
                self.model()
            }
            Err(e) => {
                log::debug!("[Detector] Not yet fit: {}", e);
                None
            }
        }
    }

    fn rebuild(&self, values: &[f64]) -> Result<FitReport, FitError> {
        let _guard = self.fit_lock.lock();

        match self.build_model(values) {
            Ok(model) => {
                let report = FitReport {
                    version: model.version,
                    samples: model.window_size,
                    offset: model.calibration.offset,
                    flagged_fraction: model.calibration.flagged_fraction,
                    fitted_at: model.fitted_at,
                };

                let mut slot = self.slot.write();
                slot.model = Some(Arc::new(model));
                slot.state = DetectorState::Fit;
                drop(slot);

                log::info!(
                    "[Detector] Model v{} fitted on {} samples (offset {:.4}, {:.1}% of window flagged)",
                    report.version,
                    report.samples,
                    report.offset,
                    report.flagged_fraction * 100.0
                );
                Ok(report)
            }
            Err(e) => {
                self.fit_failures.fetch_add(1, Ordering::Relaxed);
                let mut slot = self.slot.write();
                slot.model = None;
                slot.state = DetectorState::Unfit;
                Err(e)
            }
        }
    }

    fn build_model(&self, values: &[f64]) -> Result<AnomalyModel, FitError> {
        self.config.threshold().validate()?;

        let samples: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .take(self.config.window_size)
            .collect();

        if samples.len() < self.config.min_samples.max(2) {
            return Err(FitError::InsufficientSamples {
                required: self.config.min_samples.max(2),
                available: samples.len(),
            });
        }

        let window_stats = RunningStats::from_values(&samples);
        let normalized: Vec<f64> = samples.iter().map(|v| window_stats.normalize(*v)).collect();
        if normalized.iter().any(|v| !v.is_finite()) {
            return Err(FitError::Numerical("window normalization overflowed".to_string()));
        }

        let forest = IsolationForest::fit(&normalized, &self.config.forest());
        let raw_scores: Vec<f64> = normalized.iter().map(|v| forest.raw_score(*v)).collect();
        let calibration = Calibration::calibrate(&raw_scores, &self.config.threshold())?;

        Ok(AnomalyModel {
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            layout_hash: layout_hash(),
            scaler: self.scaler.lock().snapshot(),
            window_stats,
            forest,
            calibration,
            fitted_at: Utc::now(),
            window_size: samples.len(),
        })
    }

    fn remember(&self, frame: &SensorFrame) {
        let mut window = self.window.lock();
        for reading in frame.readings() {
            if reading.value().is_finite() {
                window.push_front(reading.value());
            }
        }
        window.truncate(self.config.window_size);
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
