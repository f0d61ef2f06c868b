//! History Module - Raw reading storage behind a narrow trait
//!
//! - `HistoryStore` - what the detector (refit) and metrics (refresh) need
//! - `InMemoryHistory` - bounded ring, default store and test double
//! - `sqlite.rs` - `SqliteHistory` (rusqlite)

pub mod sqlite;

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::RwLock;

use crate::logic::metrics::{RawTimestamp, TimestampedValue};
use crate::logic::sensors::SensorFrame;

pub use sqlite::SqliteHistory;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// TRAIT
// ============================================================================

pub trait HistoryStore: Send + Sync {
    /// Most recent `n` raw values across all sensors, newest first
    fn fetch_window(&self, n: usize) -> Result<Vec<f64>, HistoryError>;

    /// Every stored reading with its sensor name and timestamp
    fn fetch_timestamped_series(&self) -> Result<Vec<TimestampedValue>, HistoryError>;

    /// Persist the present readings of a frame
    fn append_frame(&self, frame: &SensorFrame) -> Result<(), HistoryError>;
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Bounded in-memory store (oldest readings evicted first)
pub struct InMemoryHistory {
    capacity: usize,
    readings: RwLock<VecDeque<TimestampedValue>>,
}

impl InMemoryHistory {
    /// `capacity` counts individual readings, not frames
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            readings: RwLock::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed with pre-timestamped readings (oldest first)
    pub fn extend(&self, items: impl IntoIterator<Item = TimestampedValue>) {
        let mut readings = self.readings.write();
        for item in items {
            if readings.len() >= self.capacity {
                readings.pop_front();
            }
            readings.push_back(item);
        }
    }
}

impl HistoryStore for InMemoryHistory {
    fn fetch_window(&self, n: usize) -> Result<Vec<f64>, HistoryError> {
        Ok(self.readings.read().iter().rev().take(n).map(|r| r.value).collect())
    }

    fn fetch_timestamped_series(&self) -> Result<Vec<TimestampedValue>, HistoryError> {
        Ok(self.readings.read().iter().cloned().collect())
    }

    fn append_frame(&self, frame: &SensorFrame) -> Result<(), HistoryError> {
        let now = Utc::now();
        let ts = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1e6;
        self.extend(
            frame
                .readings()
                .filter(|r| r.value().is_finite())
                .map(|r| TimestampedValue::new(r.sensor().name(), r.value(), RawTimestamp::Unix(ts))),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::metrics::detection_rate;
    use crate::logic::sensors::{SensorId, SENSOR_COUNT};

    #[test]
    fn test_window_is_newest_first() {
        let store = InMemoryHistory::new(100);
        store.append_frame(&SensorFrame::complete([1.0; SENSOR_COUNT])).unwrap();
        store.append_frame(&SensorFrame::complete([2.0; SENSOR_COUNT])).unwrap();

        let window = store.fetch_window(10).unwrap();
        assert_eq!(window.len(), 10);
        assert!(window[..8].iter().all(|v| *v == 2.0));
        assert!(window[8..].iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_absent_slots_are_not_stored() {
        let store = InMemoryHistory::new(100);
        let mut values = [Some(5.0); SENSOR_COUNT];
        values[SensorId::Heat.index()] = None;
        store.append_frame(&SensorFrame::from_values(values)).unwrap();

        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series.len(), 7);
        assert!(series.iter().all(|r| r.sensor != "Heat"));
    }

    #[test]
    fn test_non_finite_readings_are_not_stored() {
        let store = InMemoryHistory::new(100);
        for _ in 0..2 {
            let mut values = [5.0; SENSOR_COUNT];
            values[SensorId::Brakes.index()] = f64::NAN;
            store.append_frame(&SensorFrame::complete(values)).unwrap();
        }

        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series.len(), 2 * (SENSOR_COUNT - 1));
        assert!(series.iter().all(|r| r.value.is_finite()));
        assert_eq!(detection_rate(&series), 0.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = InMemoryHistory::new(12);
        for i in 0..3 {
            store.append_frame(&SensorFrame::complete([i as f64; SENSOR_COUNT])).unwrap();
        }
        assert_eq!(store.len(), 12);
        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series[0].value, 1.0);
    }

    #[test]
    fn test_empty_store_window() {
        let store = InMemoryHistory::new(10);
        assert!(store.is_empty());
        assert!(store.fetch_window(1000).unwrap().is_empty());
    }
}
