//! Orchestrator - Detection/response tick
//!
//! One tick: frame → detect → policy → publish → metrics → sinks.
//! Every shared component comes in through `MonitorContext`; there is no
//! global state.
//!
//! - `monitor.rs` - Thread/runtime wiring (`Monitor`, `MonitorHandle`)

pub mod monitor;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logic::bus::{BusError, SignalBus, TopicId};
use crate::logic::history::HistoryStore;
use crate::logic::metrics::MetricsAggregator;
use crate::logic::model::{AnomalyDetector, DetectionOutcome, FitError, FitReport};
use crate::logic::policy::{
    reward_for, state_from_outcome, ActionRecord, AdaptivePolicy, PolicyState, UpdateReport,
};
use crate::logic::scenario::ScenarioSource;
use crate::logic::sensors::{SensorFrame, SensorId};
use crate::logic::telemetry::{TelemetryEvent, TelemetrySink};

pub use monitor::{Monitor, MonitorError, MonitorHandle, MonitorSummary};

// ============================================================================
// CONTEXT
// ============================================================================

/// Shared handles, cloned into every loop
#[derive(Clone)]
pub struct MonitorContext {
    pub detector: Arc<AnomalyDetector>,
    pub metrics: Arc<MetricsAggregator>,
    pub bus: SignalBus,
    pub store: Arc<dyn HistoryStore>,
    pub sink: Arc<dyn TelemetrySink>,
}

// ============================================================================
// REPORTS
// ============================================================================

/// Mitigation applied to one flagged sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mitigation {
    pub sensor: SensorId,
    pub descriptor: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: DetectionOutcome,
    pub action: ActionRecord,
    pub mitigations: Vec<Mitigation>,
    pub detection_latency: Duration,
    pub response_latency: Duration,
    /// TD update applied to the previous transition this tick
    pub learning: Option<UpdateReport>,
    pub bus_failures: usize,
}

struct Transition {
    state: PolicyState,
    action: usize,
    reward: f32,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator {
    ctx: MonitorContext,
    scenario: Box<dyn ScenarioSource>,
    policy: AdaptivePolicy,
    pending: Option<Transition>,
    ticks: u64,
}

impl Orchestrator {
    pub fn new(ctx: MonitorContext, scenario: Box<dyn ScenarioSource>, policy: AdaptivePolicy) -> Self {
        Self {
            ctx,
            scenario,
            policy,
            pending: None,
            ticks: 0,
        }
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self) -> TickReport {
        let frame = self.scenario.next_frame();
        self.process_frame(&frame)
    }

    /// Run one frame through detect → select → publish → record
    pub fn process_frame(&mut self, frame: &SensorFrame) -> TickReport {
        let tick = self.ticks;

        let detect_started = Instant::now();
        let outcome = self.ctx.detector.detect(frame);
        let detection_latency = detect_started.elapsed();

        let respond_started = Instant::now();
        let state = state_from_outcome(&outcome);
        let action = self.policy.select_action(&state);
        let mitigations: Vec<Mitigation> = outcome
            .flagged()
            .map(|sensor| Mitigation {
                sensor,
                descriptor: sensor.mitigation(),
            })
            .collect();
        let response_latency = respond_started.elapsed();

        for m in &mitigations {
            log::info!("[Orchestrator] {} → {}", m.sensor, m.descriptor);
        }

        let learning = self.learn(state, &action, &outcome);

        if let Err(e) = self.ctx.store.append_frame(frame) {
            log::warn!("[Orchestrator] History append failed: {}", e);
        }

        let any_anomaly = outcome.any_anomaly();
        let bus_failures = self.publish(frame, detection_latency, response_latency, any_anomaly);
        self.ctx.metrics.record(detection_latency, response_latency, any_anomaly);

        if outcome.is_degraded() {
            log::debug!("[Orchestrator] Tick {} degraded: detector not yet fit", tick);
        }

        let report = TickReport {
            tick,
            timestamp: Utc::now(),
            outcome,
            action,
            mitigations,
            detection_latency,
            response_latency,
            learning,
            bus_failures,
        };
        self.ctx.sink.on_tick(&report);
        self.ticks += 1;
        report
    }

    /// Apply the pending transition as terminal (shutdown)
    pub fn finish(&mut self) -> Option<UpdateReport> {
        let pending = self.pending.take()?;
        match self
            .policy
            .update(&pending.state, pending.action, pending.reward, &pending.state, true)
        {
            Ok(update) => {
                log::info!("[Policy] Terminal update applied (target {:.3})", update.td_target);
                Some(update)
            }
            Err(e) => {
                log::warn!("[Policy] Terminal update rejected: {}", e);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------------

    fn learn(&mut self, state: PolicyState, action: &ActionRecord, outcome: &DetectionOutcome) -> Option<UpdateReport> {
        if !self.policy.config().learning_enabled {
            return None;
        }

        let update = self.pending.take().and_then(|prev| {
            match self.policy.update(&prev.state, prev.action, prev.reward, &state, false) {
                Ok(update) => Some(update),
                Err(e) => {
                    log::warn!("[Policy] Update rejected: {}", e);
                    None
                }
            }
        });

        self.pending = Some(Transition {
            state,
            action: action.action_index,
            reward: reward_for(outcome, action.action_index),
        });
        update
    }

    /// Returns the number of failed publishes
    fn publish(&self, frame: &SensorFrame, detection: Duration, response: Duration, any_anomaly: bool) -> usize {
        let raw: Vec<f64> = frame.values().iter().map(|v| v.unwrap_or(0.0)).collect();
        let triplet = [
            detection.as_secs_f64() * 1000.0,
            response.as_secs_f64() * 1000.0,
            if any_anomaly { 1.0 } else { 0.0 },
        ];

        let messages: [(TopicId, &[f64]); 3] = [
            (TopicId::SENSOR_FRAME, raw.as_slice()),
            (TopicId::TELEMETRY_MIRROR, raw.as_slice()),
            (TopicId::DETECTION_METRICS, &triplet[..]),
        ];

        let mut failures = 0;
        for (topic, values) in messages {
            if let Err(e) = self.ctx.bus.publish(topic, values) {
                failures += 1;
                match &e {
                    BusError::SendFailed { .. } | BusError::Unavailable => {
                        log::warn!("[Bus] Publish on {} failed: {}", topic, e)
                    }
                    BusError::PayloadTooLong { .. } => log::error!("[Bus] {}", e),
                }
            }
        }
        failures
    }
}

// ============================================================================
// REFIT
// ============================================================================

#[derive(Debug, Clone)]
pub enum RefitOutcome {
    Refitted(FitReport),
    /// No history to fit from; the current model keeps serving
    Skipped,
    Failed(FitError),
}

/// One scheduled refit from the history store
pub fn refit_from_store(ctx: &MonitorContext) -> RefitOutcome {
    let window_size = ctx.detector.config().window_size;
    let values = match ctx.store.fetch_window(window_size) {
        Ok(values) if values.is_empty() => {
            log::debug!("[Detector] Refit skipped: history empty");
            return RefitOutcome::Skipped;
        }
        Ok(values) => values,
        Err(e) => {
            log::warn!("[Detector] Refit skipped, history unavailable: {}", e);
            return RefitOutcome::Skipped;
        }
    };

    match ctx.detector.refit(&values) {
        Ok(report) => {
            ctx.sink.on_event(&TelemetryEvent::model_fitted(&report));
            RefitOutcome::Refitted(report)
        }
        Err(e) => {
            log::warn!("[Detector] Refit failed, detection degraded to all-clear: {}", e);
            ctx.sink.on_event(&TelemetryEvent::fit_failed(&e));
            RefitOutcome::Failed(e)
        }
    }
}
