//! Telemetry Event Types
//!
//! Immutable, timestamped records of what the monitor did. One JSON object
//! per line on disk.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::logic::metrics::MetricsSample;
use crate::logic::model::{AnomalyVerdict, FitError, FitReport};
use crate::logic::policy::{ActionRecord, UpdateReport};
use crate::logic::sensors::layout_hash;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SystemStart,
    SystemStop,
    /// Detector fitted or refitted
    ModelFitted,
    /// Fit/refit failed, detector degraded to all-clear
    FitFailed,
    AnomalyDetected,
    MitigationSelected,
    PolicyUpdated,
    MetricsSnapshot,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SystemStart => "system_start",
            EventType::SystemStop => "system_stop",
            EventType::ModelFitted => "model_fitted",
            EventType::FitFailed => "fit_failed",
            EventType::AnomalyDetected => "anomaly_detected",
            EventType::MitigationSelected => "mitigation_selected",
            EventType::PolicyUpdated => "policy_updated",
            EventType::MetricsSnapshot => "metrics_snapshot",
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

static SESSION_ID: OnceLock<String> = OnceLock::new();

/// Generated once per process run
pub fn session_id() -> String {
    SESSION_ID.get_or_init(|| Uuid::new_v4().to_string()).clone()
}

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub session_id: String,
    /// Sensor layout the event was produced under
    pub layout_hash: u32,
    pub tick: Option<u64>,
    pub details: Option<serde_json::Value>,
    pub description: String,
}

impl TelemetryEvent {
    pub fn new(event_type: EventType, description: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            session_id: session_id(),
            layout_hash: layout_hash(),
            tick: None,
            details: None,
            description: description.to_string(),
        }
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Single-line JSON (empty object on serialization failure)
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    // ------------------------------------------------------------------------
    // convenience constructors
    // ------------------------------------------------------------------------

    pub fn system_start(version: &str) -> Self {
        Self::new(EventType::SystemStart, &format!("Monitor v{} started", version))
            .with_details(json!({ "version": version }))
    }

    pub fn system_stop(uptime_secs: u64, ticks: u64) -> Self {
        Self::new(EventType::SystemStop, "Monitor stopped")
            .with_details(json!({ "uptime_secs": uptime_secs, "ticks": ticks }))
    }

    pub fn model_fitted(report: &FitReport) -> Self {
        Self::new(EventType::ModelFitted, &format!("Model v{} fitted", report.version))
            .with_details(json!({
                "version": report.version,
                "samples": report.samples,
                "offset": report.offset,
                "flagged_fraction": report.flagged_fraction,
            }))
    }

    pub fn fit_failed(error: &FitError) -> Self {
        Self::new(EventType::FitFailed, &error.to_string())
    }

    pub fn anomaly_detected(tick: u64, verdict: &AnomalyVerdict) -> Self {
        Self::new(EventType::AnomalyDetected, &format!("{} anomalous", verdict.sensor))
            .with_tick(tick)
            .with_details(json!({
                "sensor": verdict.sensor.name(),
                "value": verdict.raw_value,
                "score": verdict.score,
                "normalized": verdict.normalized,
            }))
    }

    pub fn mitigation_selected(tick: u64, action: &ActionRecord, flagged: &[&str]) -> Self {
        Self::new(EventType::MitigationSelected, &action.mitigation)
            .with_tick(tick)
            .with_details(json!({
                "action_index": action.action_index,
                "target": action.target.name(),
                "q_value": action.q_value,
                "selection_latency_us": action.selection_latency.as_micros() as u64,
                "flagged": flagged,
            }))
    }

    pub fn policy_updated(tick: u64, update: &UpdateReport) -> Self {
        Self::new(EventType::PolicyUpdated, "TD update applied")
            .with_tick(tick)
            .with_details(json!({
                "td_target": update.td_target,
                "loss": update.loss,
                "q_before": update.q_before,
                "q_after": update.q_after,
            }))
    }

    pub fn metrics_snapshot(sample: &MetricsSample) -> Self {
        Self::new(EventType::MetricsSnapshot, "Metrics refreshed").with_details(json!({
            "detection_latency_ms": sample.detection_latency.as_secs_f64() * 1000.0,
            "response_latency_ms": sample.response_latency.as_secs_f64() * 1000.0,
            "detection_rate": sample.detection_rate,
            "history_change_rate": sample.history_change_rate,
            "ticks_recorded": sample.ticks_recorded,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_to_jsonl() {
        let event = TelemetryEvent::system_start("1.0.0").with_tick(3);
        let line = event.to_jsonl();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"event_type\":\"system_start\""));

        let parsed: TelemetryEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.tick, Some(3));
        assert_eq!(parsed.layout_hash, layout_hash());
    }

    #[test]
    fn test_session_id_consistency() {
        let a = TelemetryEvent::new(EventType::ModelFitted, "a");
        let b = TelemetryEvent::new(EventType::ModelFitted, "b");
        assert_eq!(a.session_id, b.session_id);
        assert_ne!(a.id, b.id);
    }
}
