//! Metrics Aggregator - Detection/response loop statistics
//!
//! One `parking_lot::Mutex` guards every buffer. Writers append under the
//! lock; `refresh` computes the history change rate *outside* the lock and
//! only stores the result, so no I/O ever happens while it is held.
//!
//! ## Structure
//! - `detection_rate.rs` - Change-rate statistic over timestamped history

pub mod detection_rate;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::bus::TopicId;
use crate::logic::history::{HistoryError, HistoryStore};
use crate::logic::shutdown::ShutdownSignal;
use crate::logic::telemetry::TelemetrySink;

pub use detection_rate::{detection_rate, RawTimestamp, TimestampedValue};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Ticks considered by the windowed detection rate
    pub rate_window: usize,
    /// Refresh cadence (milliseconds)
    pub refresh_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            rate_window: 100,
            refresh_interval_ms: constants::DEFAULT_METRICS_INTERVAL_MS,
        }
    }
}

// ============================================================================
// SAMPLE
// ============================================================================

/// Point-in-time view of the aggregator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Most recent detection latency
    pub detection_latency: Duration,
    /// Most recent response latency
    pub response_latency: Duration,
    /// Fraction of the last `rate_window` ticks that flagged any anomaly
    pub detection_rate: f64,
    /// Change rate of the stored history, as of the last refresh
    pub history_change_rate: f64,
    pub avg_detection_latency: Duration,
    pub avg_response_latency: Duration,
    pub ticks_recorded: u64,
    pub anomaly_ticks: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Messages seen per bus topic (hex topic → count)
    pub bus_messages: BTreeMap<String, u64>,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Default)]
struct Buffers {
    detection_latencies: VecDeque<Duration>,
    response_latencies: VecDeque<Duration>,
    anomaly_flags: VecDeque<bool>,
    ticks_recorded: u64,
    anomaly_ticks: u64,
    history_change_rate: f64,
    refreshed_at: Option<DateTime<Utc>>,
    bus_messages: BTreeMap<TopicId, u64>,
}

pub struct MetricsAggregator {
    config: MetricsConfig,
    buffers: Mutex<Buffers>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Append one tick's latencies and anomaly flag
    pub fn record(&self, detection_latency: Duration, response_latency: Duration, any_anomaly: bool) {
        let window = self.config.rate_window.max(1);
        let mut buffers = self.buffers.lock();

        push_bounded(&mut buffers.detection_latencies, detection_latency, window);
        push_bounded(&mut buffers.response_latencies, response_latency, window);
        push_bounded(&mut buffers.anomaly_flags, any_anomaly, window);

        buffers.ticks_recorded += 1;
        if any_anomaly {
            buffers.anomaly_ticks += 1;
        }
    }

    /// Count a message observed by the bus receiver
    pub fn note_bus_message(&self, topic: TopicId) {
        *self.buffers.lock().bus_messages.entry(topic).or_insert(0) += 1;
    }

    /// Recompute the history change rate from `store`
    pub fn refresh(&self, store: &dyn HistoryStore) -> Result<MetricsSample, HistoryError> {
        let series = store.fetch_timestamped_series()?;
        Ok(self.refresh_from_series(&series))
    }

    pub fn refresh_from_series(&self, series: &[TimestampedValue]) -> MetricsSample {
        let rate = detection_rate(series);
        {
            let mut buffers = self.buffers.lock();
            buffers.history_change_rate = rate;
            buffers.refreshed_at = Some(Utc::now());
        }
        self.snapshot()
    }

    /// Windowed detection rate over the last `rate_window` ticks
    pub fn windowed_detection_rate(&self) -> f64 {
        let buffers = self.buffers.lock();
        fraction_true(&buffers.anomaly_flags)
    }

    pub fn snapshot(&self) -> MetricsSample {
        let buffers = self.buffers.lock();
        MetricsSample {
            detection_latency: buffers.detection_latencies.back().copied().unwrap_or_default(),
            response_latency: buffers.response_latencies.back().copied().unwrap_or_default(),
            detection_rate: fraction_true(&buffers.anomaly_flags),
            history_change_rate: buffers.history_change_rate,
            avg_detection_latency: mean_duration(&buffers.detection_latencies),
            avg_response_latency: mean_duration(&buffers.response_latencies),
            ticks_recorded: buffers.ticks_recorded,
            anomaly_ticks: buffers.anomaly_ticks,
            refreshed_at: buffers.refreshed_at,
            bus_messages: buffers
                .bus_messages
                .iter()
                .map(|(topic, count)| (topic.to_string(), *count))
                .collect(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, capacity: usize) {
    if buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

fn fraction_true(flags: &VecDeque<bool>) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
}

fn mean_duration(values: &VecDeque<Duration>) -> Duration {
    if values.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = values.iter().sum();
    total / values.len() as u32
}

// ============================================================================
// REFRESH LOOP
// ============================================================================

/// Periodic refresh until `shutdown` fires. Store errors are logged and the
/// previous rate is kept.
pub async fn run_refresh_loop(
    aggregator: Arc<MetricsAggregator>,
    store: Arc<dyn HistoryStore>,
    sink: Arc<dyn TelemetrySink>,
    interval: Duration,
    shutdown: ShutdownSignal,
) {
    log::info!("[Metrics] Refresh loop started (every {:?})", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.notified() => break,
        }
        if shutdown.is_triggered() {
            break;
        }

        let sample = match aggregator.refresh(store.as_ref()) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("[Metrics] History unavailable, keeping previous rate: {}", e);
                aggregator.snapshot()
            }
        };

        log::info!(
            "[Metrics] detection={:.2}ms response={:.2}ms windowed_rate={:.3} change_rate={:.3}",
            sample.detection_latency.as_secs_f64() * 1000.0,
            sample.response_latency.as_secs_f64() * 1000.0,
            sample.detection_rate,
            sample.history_change_rate
        );
        sink.on_metrics(&sample);
    }

    log::info!("[Metrics] Refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::history::InMemoryHistory;
    use crate::logic::sensors::SensorFrame;
    use crate::logic::telemetry::LogSink;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = MetricsAggregator::default();
        metrics.record(Duration::from_millis(2), Duration::from_millis(4), false);
        metrics.record(Duration::from_millis(4), Duration::from_millis(6), true);

        let sample = metrics.snapshot();
        assert_eq!(sample.detection_latency, Duration::from_millis(4));
        assert_eq!(sample.response_latency, Duration::from_millis(6));
        assert_eq!(sample.avg_detection_latency, Duration::from_millis(3));
        assert_eq!(sample.detection_rate, 0.5);
        assert_eq!(sample.ticks_recorded, 2);
        assert_eq!(sample.anomaly_ticks, 1);
    }

    #[test]
    fn test_windowed_rate_forgets_old_ticks() {
        let metrics = MetricsAggregator::new(MetricsConfig {
            rate_window: 4,
            ..Default::default()
        });
        for _ in 0..4 {
            metrics.record(Duration::ZERO, Duration::ZERO, true);
        }
        for _ in 0..4 {
            metrics.record(Duration::ZERO, Duration::ZERO, false);
        }
        assert_eq!(metrics.windowed_detection_rate(), 0.0);
        assert_eq!(metrics.snapshot().anomaly_ticks, 4);
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let sample = MetricsAggregator::default().snapshot();
        assert_eq!(sample.detection_rate, 0.0);
        assert_eq!(sample.history_change_rate, 0.0);
        assert!(sample.refreshed_at.is_none());
    }

    #[test]
    fn test_refresh_reads_store() {
        let store = InMemoryHistory::new(100);
        store.append_frame(&SensorFrame::complete([1.0; 8])).unwrap();
        store.append_frame(&SensorFrame::complete([2.0; 8])).unwrap();

        let metrics = MetricsAggregator::default();
        let sample = metrics.refresh(&store).unwrap();
        assert_eq!(sample.history_change_rate, 1.0);
        assert!(sample.refreshed_at.is_some());
    }

    #[test]
    fn test_bus_counts_by_topic() {
        let metrics = MetricsAggregator::default();
        metrics.note_bus_message(TopicId::SENSOR_FRAME);
        metrics.note_bus_message(TopicId::SENSOR_FRAME);
        metrics.note_bus_message(TopicId::DETECTION_METRICS);
        let sample = metrics.snapshot();
        assert_eq!(sample.bus_messages.get("0x200"), Some(&2));
        assert_eq!(sample.bus_messages.get("0x100"), Some(&1));
    }

    #[tokio::test]
    async fn test_refresh_loop_stops_on_shutdown() {
        let metrics = Arc::new(MetricsAggregator::default());
        let store = Arc::new(InMemoryHistory::new(10));
        store.append_frame(&SensorFrame::complete([1.0; 8])).unwrap();
        store.append_frame(&SensorFrame::complete([3.0; 8])).unwrap();
        let shutdown = ShutdownSignal::new();

        let handle = tokio::spawn(run_refresh_loop(
            metrics.clone(),
            store,
            Arc::new(LogSink),
            Duration::from_millis(50),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(metrics.snapshot().history_change_rate, 1.0);
    }
}
