//! Monitor - Loop wiring
//!
//! Four loops share one `ShutdownSignal`:
//! 1. bus receiver  - continuous `receive(timeout)`
//! 2. tick          - orchestrator at `tick_interval` (1 Hz)
//! 3. metrics       - current-thread tokio runtime, refresh every 5 s
//! 4. refit         - detector refit every `refit_interval`, off the receiver path

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants;
use crate::logic::bus::{BusError, BusStats, SignalBus, Subscription, TopicId};
use crate::logic::config::{ConfigError, MonitorConfig};
use crate::logic::history::{HistoryError, HistoryStore, InMemoryHistory, SqliteHistory};
use crate::logic::metrics::{run_refresh_loop, MetricsAggregator, MetricsSample};
use crate::logic::model::{AnomalyDetector, DetectorStats};
use crate::logic::policy::{AdaptivePolicy, PolicyError};
use crate::logic::scenario::{ScenarioSource, SimulatedScenario};
use crate::logic::shutdown::ShutdownSignal;
use crate::logic::telemetry::{JsonlRecorder, LogSink, MultiSink, RecorderError, TelemetryEvent, TelemetrySink};

use super::{refit_from_store, MonitorContext, Orchestrator};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Final state reported by `shutdown_and_join`
#[derive(Debug, Clone)]
pub struct MonitorSummary {
    pub ticks: u64,
    pub uptime: Duration,
    pub metrics: MetricsSample,
    pub bus: BusStats,
    pub detector: DetectorStats,
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct Monitor {
    config: MonitorConfig,
    ctx: MonitorContext,
    orchestrator: Orchestrator,
}

impl Monitor {
    /// Assemble every component from configuration
    pub fn from_config(config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;

        let mut sinks = MultiSink::new().with(Arc::new(LogSink));

        let store: Arc<dyn HistoryStore> = match &config.db_path {
            Some(path) => {
                let sqlite = Arc::new(SqliteHistory::open(path)?);
                sinks.push(sqlite.clone());
                sqlite
            }
            None => Arc::new(InMemoryHistory::new(config.history_capacity)),
        };

        if let Some(dir) = &config.telemetry_dir {
            sinks.push(Arc::new(JsonlRecorder::new(dir.clone())?));
        }

        let ctx = MonitorContext {
            detector: Arc::new(AnomalyDetector::new(config.detector.clone())),
            metrics: Arc::new(MetricsAggregator::new(config.metrics.clone())),
            bus: SignalBus::new(config.bus.clone()),
            store,
            sink: Arc::new(sinks),
        };

        let scenario = Box::new(SimulatedScenario::new(config.scenario.clone()));
        let policy = AdaptivePolicy::for_sensor_set(config.policy.clone())?;
        Ok(Self::new(config, ctx, scenario, policy))
    }

    pub fn new(
        config: MonitorConfig,
        ctx: MonitorContext,
        scenario: Box<dyn ScenarioSource>,
        policy: AdaptivePolicy,
    ) -> Self {
        let orchestrator = Orchestrator::new(ctx.clone(), scenario, policy);
        Self {
            config,
            ctx,
            orchestrator,
        }
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    /// Initial fit attempt, then spawn every loop
    pub fn start(self) -> Result<MonitorHandle, MonitorError> {
        let Monitor {
            config,
            ctx,
            mut orchestrator,
        } = self;

        ctx.sink.on_event(&TelemetryEvent::system_start(constants::APP_VERSION));
        refit_from_store(&ctx);

        let shutdown = ShutdownSignal::new();
        let subscription = ctx.bus.subscribe_many(&[
            TopicId::DETECTION_METRICS,
            TopicId::SENSOR_FRAME,
            TopicId::TELEMETRY_MIRROR,
        ])?;

        let mut workers = Vec::with_capacity(3);

        // 1. bus receiver
        {
            let metrics = ctx.metrics.clone();
            let signal = shutdown.clone();
            let timeout = config.receive_timeout();
            workers.push(spawn("bus-receiver", move || run_receiver(subscription, metrics, timeout, signal))?);
        }

        // 2. tick
        let tick_worker = {
            let signal = shutdown.clone();
            let interval = config.tick_interval();
            spawn("orchestrator", move || {
                log::info!("[Orchestrator] Tick loop started (every {:?})", interval);
                loop {
                    if signal.is_triggered() {
                        break;
                    }
                    let started = Instant::now();
                    orchestrator.tick();
                    let remaining = interval.saturating_sub(started.elapsed());
                    if signal.wait_timeout(remaining) {
                        break;
                    }
                }
                orchestrator.finish();
                log::info!("[Orchestrator] Tick loop stopped after {} ticks", orchestrator.ticks());
                orchestrator.ticks()
            })?
        };

        // 3. metrics refresh
        {
            let metrics = ctx.metrics.clone();
            let store = ctx.store.clone();
            let sink = ctx.sink.clone();
            let signal = shutdown.clone();
            let interval = config.metrics_interval();
            workers.push(spawn("metrics", move || {
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(run_refresh_loop(metrics, store, sink, interval, signal)),
                    Err(e) => log::error!("[Metrics] Failed to build runtime: {}", e),
                }
            })?);
        }

        // 4. refit
        {
            let refit_ctx = ctx.clone();
            let signal = shutdown.clone();
            let interval = config.refit_interval();
            workers.push(spawn("refit", move || {
                log::info!("[Detector] Refit loop started (every {:?})", interval);
                while !signal.wait_timeout(interval) {
                    refit_from_store(&refit_ctx);
                }
            })?);
        }

        log::info!("[Orchestrator] {} v{} running", constants::APP_NAME, constants::APP_VERSION);

        Ok(MonitorHandle {
            ctx,
            shutdown,
            tick_worker,
            workers,
            started_at: Instant::now(),
        })
    }
}

fn spawn<T, F>(name: &'static str, f: F) -> Result<JoinHandle<T>, MonitorError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| MonitorError::Spawn { name, source })
}

/// Drain bus messages into per-topic counters until shutdown or teardown
pub fn run_receiver(
    subscription: Subscription,
    metrics: Arc<MetricsAggregator>,
    timeout: Duration,
    shutdown: ShutdownSignal,
) {
    log::info!("[Bus] Receiver started on {:?}", subscription.topics());
    while !shutdown.is_triggered() {
        match subscription.receive(timeout) {
            Ok(Some(message)) => {
                metrics.note_bus_message(message.topic);
                log::debug!("[Bus] {} ← {:?}", message.topic, message.payload.as_bytes());
            }
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[Bus] Receiver exiting: {}", e);
                break;
            }
        }
    }
    log::info!("[Bus] Receiver stopped");
}

// ============================================================================
// HANDLE
// ============================================================================

pub struct MonitorHandle {
    ctx: MonitorContext,
    shutdown: ShutdownSignal,
    tick_worker: JoinHandle<u64>,
    workers: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl MonitorHandle {
    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Signal every loop, wait for them, then close the bus
    pub fn shutdown_and_join(self) -> MonitorSummary {
        log::info!("[Orchestrator] Shutting down...");
        self.shutdown.trigger();

        let ticks = match self.tick_worker.join() {
            Ok(ticks) => ticks,
            Err(_) => {
                log::error!("[Orchestrator] Tick thread panicked");
                0
            }
        };
        self.ctx.bus.close();
        for worker in self.workers {
            if worker.join().is_err() {
                log::error!("[Orchestrator] Worker thread panicked");
            }
        }

        let uptime = self.started_at.elapsed();
        self.ctx
            .sink
            .on_event(&TelemetryEvent::system_stop(uptime.as_secs(), ticks));

        MonitorSummary {
            ticks,
            uptime,
            metrics: self.ctx.metrics.snapshot(),
            bus: self.ctx.bus.stats(),
            detector: self.ctx.detector.stats(),
        }
    }
}
