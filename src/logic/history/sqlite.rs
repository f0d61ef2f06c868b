//! SQLite History Store
//!
//! Tables:
//! - `sensor_data(timestamp, sensor, value)` - raw readings
//! - `anomalies(timestamp, sensor, value, detection_time)` - flagged readings
//! - `performance_metrics(timestamp, detection_time, response_time, threat_detection_rate)`
//!
//! Timestamps are written as `%Y-%m-%d %H:%M:%S%.6f` text (UTC). Rows written
//! by other tools may carry numeric timestamps; both are read back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::logic::metrics::{MetricsSample, RawTimestamp, TimestampedValue};
use crate::logic::orchestrator::TickReport;
use crate::logic::sensors::SensorFrame;
use crate::logic::telemetry::TelemetrySink;

use super::{HistoryError, HistoryStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sensor_data (
    timestamp TEXT NOT NULL,
    sensor    TEXT NOT NULL,
    value     REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sensor_data_ts ON sensor_data(timestamp);
CREATE TABLE IF NOT EXISTS anomalies (
    timestamp      TEXT NOT NULL,
    sensor         TEXT NOT NULL,
    value          REAL NOT NULL,
    detection_time REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS performance_metrics (
    timestamp             TEXT NOT NULL,
    detection_time        REAL NOT NULL,
    response_time         REAL NOT NULL,
    threat_detection_rate REAL NOT NULL
);
";

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub struct SqliteHistory {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteHistory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        log::info!("[History] Opened SQLite store: {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn anomaly_count(&self) -> Result<u64, HistoryError> {
        self.count("anomalies")
    }

    pub fn metrics_count(&self) -> Result<u64, HistoryError> {
        self.count("performance_metrics")
    }

    fn count(&self, table: &str) -> Result<u64, HistoryError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn record_anomalies(&self, report: &TickReport) -> Result<usize, HistoryError> {
        let flagged: Vec<_> = report
            .outcome
            .verdicts
            .iter()
            .filter(|v| v.is_anomalous)
            .filter_map(|v| v.raw_value.map(|raw| (v.sensor, raw)))
            .collect();
        if flagged.is_empty() {
            return Ok(0);
        }

        let ts = format_ts(report.timestamp);
        let detection_time = report.detection_latency.as_secs_f64();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO anomalies (timestamp, sensor, value, detection_time) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (sensor, raw) in &flagged {
                stmt.execute(params![ts, sensor.name(), raw, detection_time])?;
            }
        }
        tx.commit()?;
        Ok(flagged.len())
    }

    fn record_metrics(&self, sample: &MetricsSample) -> Result<(), HistoryError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO performance_metrics (timestamp, detection_time, response_time, threat_detection_rate)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format_ts(sample.refreshed_at.unwrap_or_else(Utc::now)),
                sample.detection_latency.as_secs_f64(),
                sample.response_latency.as_secs_f64(),
                sample.history_change_rate,
            ],
        )?;
        Ok(())
    }
}

impl HistoryStore for SqliteHistory {
    fn fetch_window(&self, n: usize) -> Result<Vec<f64>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM sensor_data ORDER BY rowid DESC LIMIT ?1")?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| row.get::<_, f64>(0))?;
        let values = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    fn fetch_timestamped_series(&self) -> Result<Vec<TimestampedValue>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT sensor, value, timestamp FROM sensor_data ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            let timestamp = match row.get_ref(2)? {
                ValueRef::Real(secs) => RawTimestamp::Unix(secs),
                ValueRef::Integer(secs) => RawTimestamp::Unix(secs as f64),
                ValueRef::Text(text) => RawTimestamp::Text(String::from_utf8_lossy(text).into_owned()),
                _ => RawTimestamp::Text(String::new()),
            };
            Ok(TimestampedValue {
                sensor: row.get(0)?,
                value: row.get(1)?,
                timestamp,
            })
        })?;
        let series = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(series)
    }

    fn append_frame(&self, frame: &SensorFrame) -> Result<(), HistoryError> {
        let ts = format_ts(Utc::now());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO sensor_data (timestamp, sensor, value) VALUES (?1, ?2, ?3)")?;
            // non-finite readings are treated as absent
            for reading in frame.readings().filter(|r| r.value().is_finite()) {
                stmt.execute(params![ts, reading.sensor().name(), reading.value()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl TelemetrySink for SqliteHistory {
    fn on_tick(&self, report: &TickReport) {
        match self.record_anomalies(report) {
            Ok(0) => {}
            Ok(n) => log::debug!("[History] Stored {} anomalies for tick {}", n, report.tick),
            Err(e) => log::error!("[History] Failed to store anomalies: {}", e),
        }
    }

    fn on_metrics(&self, sample: &MetricsSample) {
        if let Err(e) = self.record_metrics(sample) {
            log::error!("[History] Failed to store metrics: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sensors::{SensorId, SENSOR_COUNT};
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vehicle.sqlite");
        {
            let store = SqliteHistory::open(&path).unwrap();
            store.append_frame(&SensorFrame::complete([1.0; SENSOR_COUNT])).unwrap();
            store.append_frame(&SensorFrame::complete([2.0; SENSOR_COUNT])).unwrap();
        }

        let reopened = SqliteHistory::open(&path).unwrap();
        let window = reopened.fetch_window(9).unwrap();
        assert_eq!(window.len(), 9);
        assert!(window[..8].iter().all(|v| *v == 2.0));
        assert_eq!(window[8], 1.0);
    }

    #[test]
    fn test_non_finite_reading_keeps_rest_of_frame() {
        let store = SqliteHistory::open_in_memory().unwrap();
        let mut values = [4.0; SENSOR_COUNT];
        values[SensorId::Speed.index()] = f64::NAN;
        values[SensorId::Heat.index()] = f64::INFINITY;
        store.append_frame(&SensorFrame::complete(values)).unwrap();

        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series.len(), SENSOR_COUNT - 2);
        assert!(series.iter().all(|r| r.value == 4.0));
        assert!(series.iter().all(|r| r.sensor != "Speed" && r.sensor != "Heat"));
    }

    #[test]
    fn test_series_carries_names_and_parseable_timestamps() {
        let store = SqliteHistory::open_in_memory().unwrap();
        let mut values = [Some(3.0); SENSOR_COUNT];
        values[SensorId::Battery.index()] = None;
        store.append_frame(&SensorFrame::from_values(values)).unwrap();

        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series.len(), 7);
        assert_eq!(series[2].sensor, "Engine Sensors");
        assert!(series.iter().all(|r| r.timestamp.to_unix_seconds().is_finite()));
    }

    #[test]
    fn test_numeric_timestamps_from_other_writers() {
        let store = SqliteHistory::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO sensor_data (timestamp, sensor, value) VALUES (?1, 'Speed', 4.0)",
                params![1_700_000_000.0f64],
            )
            .unwrap();

        // TEXT affinity stores the number as text; it still parses as Unix seconds
        let series = store.fetch_timestamped_series().unwrap();
        assert_eq!(series[0].timestamp.to_unix_seconds(), 1_700_000_000.0);
    }

    #[test]
    fn test_metrics_sink_appends_rows() {
        let store = SqliteHistory::open_in_memory().unwrap();
        store.on_metrics(&MetricsSample::default());
        store.on_metrics(&MetricsSample::default());
        assert_eq!(store.metrics_count().unwrap(), 2);
        assert_eq!(store.anomaly_count().unwrap(), 0);
    }
}
