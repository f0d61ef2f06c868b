//! Detector scenario tests

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use super::detector::{AnomalyDetector, DetectionStatus, DetectorConfig, DetectorState};
use super::FitError;
use crate::logic::sensors::{SensorFrame, SensorId, SENSOR_COUNT};

/// In-range value (40–60) for frame `i`, sensor slot `s`
fn in_range(i: usize, s: usize) -> f64 {
    40.0 + ((i * 5 + s * 3) % 21) as f64
}

fn warm_frame(i: usize) -> SensorFrame {
    let mut values = [0.0; SENSOR_COUNT];
    for (s, v) in values.iter_mut().enumerate() {
        *v = in_range(i, s);
    }
    SensorFrame::complete(values)
}

#[test]
fn test_spike_flagged_after_warm_up() {
    let detector = AnomalyDetector::default();
    assert_eq!(detector.state(), DetectorState::Unfit);

    for i in 0..40 {
        detector.detect(&warm_frame(i));
    }
    assert_eq!(detector.state(), DetectorState::Fit);

    let mut values = [50.0; SENSOR_COUNT];
    values[SensorId::Brakes.index()] = 500.0;
    let outcome = detector.detect(&SensorFrame::complete(values));

    assert_eq!(outcome.status, DetectionStatus::Fit);
    let brakes = outcome.verdict(SensorId::Brakes);
    assert!(brakes.is_anomalous);
    assert_eq!(brakes.raw_value, Some(500.0));

    for sensor in SensorId::ALL.iter().filter(|s| **s != SensorId::Brakes) {
        let verdict = outcome.verdict(*sensor);
        assert!(!verdict.is_anomalous, "{} unexpectedly flagged: {:?}", sensor, verdict);
        assert_eq!(verdict.raw_value, None);
    }
}

#[test]
fn test_insufficient_history_degrades_to_all_clear() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..10).map(|i| 45.0 + i as f64).collect();

    let err = detector.fit(&history).unwrap_err();
    assert_eq!(err, FitError::InsufficientSamples { required: 30, available: 10 });
    assert_eq!(detector.state(), DetectorState::Unfit);

    let mut values = [50.0; SENSOR_COUNT];
    values[0] = 9_999.0;
    let outcome = detector.detect(&SensorFrame::complete(values));

    assert_eq!(outcome.status, DetectionStatus::NotYetFit);
    assert!(outcome.is_degraded());
    assert!(!outcome.any_anomaly());
    assert!(outcome.verdicts.iter().all(|v| v.score.is_none()));
}

#[test]
fn test_verdict_matches_negative_score() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..300).map(|i| 20.0 + (i % 80) as f64).collect();
    detector.fit(&history).unwrap();

    let model = detector.model().unwrap();
    for i in 0..60 {
        let mut values = [0.0; SENSOR_COUNT];
        for (s, v) in values.iter_mut().enumerate() {
            *v = if (i + s) % 13 == 0 { 400.0 } else { 20.0 + ((i * 7 + s) % 80) as f64 };
        }
        let outcome = detector.detect(&SensorFrame::complete(values));
        for verdict in &outcome.verdicts {
            let score = verdict.score.unwrap();
            assert_eq!(verdict.is_anomalous, score < 0.0);
            assert_eq!(verdict.is_anomalous, model.score(verdict.normalized.unwrap()) < 0.0);
        }
    }
}

#[test]
fn test_absent_readings_never_flagged() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..200).map(|i| 40.0 + (i % 21) as f64).collect();
    detector.fit(&history).unwrap();

    let mut values = [Some(50.0); SENSOR_COUNT];
    values[SensorId::Heat.index()] = None;
    let outcome = detector.detect(&SensorFrame::from_values(values));

    let heat = outcome.verdict(SensorId::Heat);
    assert!(!heat.is_anomalous);
    assert!(heat.score.is_none());
    assert!(heat.normalized.is_none());
}

#[test]
fn test_calibration_flags_about_contamination() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..500).map(|i| ((i * 37) % 101) as f64).collect();
    let report = detector.fit(&history).unwrap();

    assert_eq!(report.samples, 500);
    assert!(report.flagged_fraction > 0.0 && report.flagged_fraction <= 0.05 + 1e-9);
}

#[test]
fn test_refit_swaps_model_and_failed_refit_returns_to_unfit() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..100).map(|i| 50.0 + (i % 10) as f64).collect();

    let first = detector.fit(&history).unwrap();
    let held = detector.model().unwrap();

    let second = detector.refit(&history).unwrap();
    assert!(second.version > first.version);
    assert_eq!(detector.state(), DetectorState::Fit);
    // Readers holding the old model keep a complete snapshot
    assert_eq!(held.version, first.version);
    assert_eq!(detector.model().unwrap().version, second.version);

    assert!(detector.refit(&history[..5]).is_err());
    assert_eq!(detector.state(), DetectorState::Unfit);
    assert!(detector.model().is_none());
    assert!(detector.score(0.0).is_none());
}

#[test]
fn test_non_finite_history_is_filtered() {
    let config = DetectorConfig {
        min_samples: 30,
        ..Default::default()
    };
    let detector = AnomalyDetector::new(config);
    let mut history: Vec<f64> = (0..29).map(|i| i as f64).collect();
    history.extend([f64::NAN, f64::INFINITY]);

    assert!(matches!(
        detector.fit(&history),
        Err(FitError::InsufficientSamples { available: 29, .. })
    ));
}

#[test]
fn test_invalid_contamination_fails_fit() {
    let detector = AnomalyDetector::new(DetectorConfig {
        contamination: 0.9,
        ..Default::default()
    });
    let history: Vec<f64> = (0..100).map(|i| i as f64).collect();
    assert_eq!(detector.fit(&history).unwrap_err(), FitError::InvalidContamination(0.9));
}

#[test]
fn test_window_is_bounded() {
    let detector = AnomalyDetector::new(DetectorConfig {
        window_size: 50,
        ..Default::default()
    });
    for i in 0..20 {
        detector.detect(&warm_frame(i));
    }
    assert_eq!(detector.window_len(), 50);
}

#[test]
fn test_non_finite_reading_is_treated_as_absent() {
    let detector = AnomalyDetector::default();
    let history: Vec<f64> = (0..200).map(|i| 40.0 + (i % 21) as f64).collect();
    detector.fit(&history).unwrap();

    let mut values = [50.0; SENSOR_COUNT];
    values[SensorId::Speed.index()] = f64::NAN;
    values[SensorId::Battery.index()] = f64::INFINITY;
    let outcome = detector.detect(&SensorFrame::complete(values));

    for sensor in [SensorId::Speed, SensorId::Battery] {
        let verdict = outcome.verdict(sensor);
        assert!(!verdict.is_anomalous);
        assert!(verdict.normalized.is_none());
    }
    assert_eq!(detector.scaler_state().get(SensorId::Speed).count, 0);
}

#[test]
fn test_concurrent_refit_never_degrades_detect() {
    let detector = Arc::new(AnomalyDetector::default());
    let history: Vec<f64> = (0..200).map(|i| 40.0 + (i % 21) as f64).collect();
    let first = detector.fit(&history).unwrap();

    let refitter = {
        let detector = Arc::clone(&detector);
        let history = history.clone();
        thread::spawn(move || {
            (0..50)
                .map(|_| detector.refit(&history).unwrap().version)
                .collect::<Vec<u64>>()
        })
    };

    let mut seen = Vec::with_capacity(2000);
    for i in 0..2000 {
        let outcome = detector.detect(&warm_frame(i));
        assert_eq!(outcome.status, DetectionStatus::Fit, "degraded at detect {}", i);
        seen.push(outcome.model_version);
    }

    let mut fitted: HashSet<u64> = refitter.join().unwrap().into_iter().collect();
    fitted.insert(first.version);
    for version in seen {
        let version = version.unwrap();
        assert!(fitted.contains(&version), "unknown model version {}", version);
    }
    assert_eq!(detector.state(), DetectorState::Fit);
}
