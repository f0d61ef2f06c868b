//! Telemetry Module
//!
//! Where tick reports, metrics snapshots and lifecycle events go.
//!
//! ## Structure
//! - `event.rs` - TelemetryEvent (immutable, timestamped)
//! - `recorder.rs` - Append-only JSONL writer (thread-safe, rotating)
//!
//! Sinks never fail the caller: I/O problems are logged and swallowed.

pub mod event;
pub mod recorder;

use std::sync::Arc;

use crate::logic::metrics::MetricsSample;
use crate::logic::orchestrator::TickReport;

pub use event::{session_id, EventType, TelemetryEvent};
pub use recorder::{list_log_files, read_events, JsonlRecorder, RecorderError};

// ============================================================================
// SINK TRAIT
// ============================================================================

pub trait TelemetrySink: Send + Sync {
    fn on_tick(&self, report: &TickReport);

    fn on_metrics(&self, sample: &MetricsSample);

    /// Lifecycle events (start/stop, fits)
    fn on_event(&self, _event: &TelemetryEvent) {}
}

/// Writes to the `log` facade only
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn on_tick(&self, report: &TickReport) {
        let flagged: Vec<&str> = report.outcome.flagged().map(|s| s.name()).collect();
        log::debug!(
            "[Telemetry] tick={} status={:?} flagged={:?} action={} detect={:?} respond={:?}",
            report.tick,
            report.outcome.status,
            flagged,
            report.action.mitigation,
            report.detection_latency,
            report.response_latency
        );
    }

    fn on_metrics(&self, sample: &MetricsSample) {
        log::info!(
            "[Telemetry] ticks={} anomaly_ticks={} rate={:.3} change_rate={:.3}",
            sample.ticks_recorded,
            sample.anomaly_ticks,
            sample.detection_rate,
            sample.history_change_rate
        );
    }

    fn on_event(&self, event: &TelemetryEvent) {
        log::info!("[Telemetry] {}: {}", event.event_type.as_str(), event.description);
    }
}

/// Fan-out to several sinks in order
#[derive(Default, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for MultiSink {
    fn on_tick(&self, report: &TickReport) {
        for sink in &self.sinks {
            sink.on_tick(report);
        }
    }

    fn on_metrics(&self, sample: &MetricsSample) {
        for sink in &self.sinks {
            sink.on_metrics(sample);
        }
    }

    fn on_event(&self, event: &TelemetryEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}

impl TelemetrySink for JsonlRecorder {
    fn on_tick(&self, report: &TickReport) {
        if !report.outcome.any_anomaly() && report.learning.is_none() {
            return;
        }

        let mut events: Vec<TelemetryEvent> = report
            .outcome
            .verdicts
            .iter()
            .filter(|v| v.is_anomalous)
            .map(|v| TelemetryEvent::anomaly_detected(report.tick, v))
            .collect();

        if report.outcome.any_anomaly() {
            let flagged: Vec<&str> = report.outcome.flagged().map(|s| s.name()).collect();
            events.push(TelemetryEvent::mitigation_selected(report.tick, &report.action, &flagged));
        }
        if let Some(update) = &report.learning {
            events.push(TelemetryEvent::policy_updated(report.tick, update));
        }

        for event in &events {
            self.on_event(event);
        }
    }

    fn on_metrics(&self, sample: &MetricsSample) {
        self.on_event(&TelemetryEvent::metrics_snapshot(sample));
    }

    fn on_event(&self, event: &TelemetryEvent) {
        if let Err(e) = self.record(event) {
            log::error!("[Telemetry] Failed to record {} event: {}", event.event_type.as_str(), e);
        }
    }
}
