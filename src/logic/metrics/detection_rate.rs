//! History Change Rate
//!
//! Fraction of consecutive same-sensor value pairs (ordered by time) whose
//! values differ. Kept literal: this is a change rate, not a true-positive rate.
//!
//! Timestamps arrive as Unix seconds or text. Text is tried as
//! `%Y-%m-%d %H:%M:%S` (optionally fractional), then RFC 3339, then a bare
//! number. Anything unparseable maps to +∞ so it sorts last within its group.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

const TEXT_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// Timestamp as stored by a history backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Unix(f64),
    Text(String),
}

impl RawTimestamp {
    /// Seconds since the Unix epoch, +∞ when malformed
    pub fn to_unix_seconds(&self) -> f64 {
        match self {
            RawTimestamp::Unix(secs) if secs.is_finite() => *secs,
            RawTimestamp::Unix(_) => f64::INFINITY,
            RawTimestamp::Text(text) => parse_text(text).unwrap_or(f64::INFINITY),
        }
    }
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Unix(secs) => write!(f, "{}", secs),
            RawTimestamp::Text(text) => write!(f, "{}", text),
        }
    }
}

fn parse_text(text: &str) -> Option<f64> {
    let text = text.trim();

    for format in TEXT_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            let utc = naive.and_utc();
            return Some(utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9);
    }

    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// One historical reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub sensor: String,
    pub value: f64,
    pub timestamp: RawTimestamp,
}

impl TimestampedValue {
    pub fn new(sensor: impl Into<String>, value: f64, timestamp: RawTimestamp) -> Self {
        Self {
            sensor: sensor.into(),
            value,
            timestamp,
        }
    }
}

/// Change rate over `history`, in [0, 1]. 0 when no sensor has two points.
pub fn detection_rate(history: &[TimestampedValue]) -> f64 {
    let mut groups: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for item in history {
        groups
            .entry(item.sensor.as_str())
            .or_default()
            .push((item.timestamp.to_unix_seconds(), item.value));
    }

    let mut pairs = 0usize;
    let mut changes = 0usize;
    for series in groups.values_mut() {
        // stable: equal timestamps keep input order
        series.sort_by(|a, b| a.0.total_cmp(&b.0));
        for window in series.windows(2) {
            pairs += 1;
            if window[0].1 != window[1].1 {
                changes += 1;
            }
        }
    }

    if pairs == 0 {
        0.0
    } else {
        changes as f64 / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unix(sensor: &str, value: f64, ts: f64) -> TimestampedValue {
        TimestampedValue::new(sensor, value, RawTimestamp::Unix(ts))
    }

    fn text(sensor: &str, value: f64, ts: &str) -> TimestampedValue {
        TimestampedValue::new(sensor, value, RawTimestamp::Text(ts.to_string()))
    }

    #[test]
    fn test_empty_and_single_points_are_zero() {
        assert_eq!(detection_rate(&[]), 0.0);
        assert_eq!(detection_rate(&[unix("Speed", 1.0, 1.0), unix("Heat", 2.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_counts_changes_per_sensor() {
        let history = vec![
            unix("Speed", 10.0, 1.0),
            unix("Speed", 10.0, 2.0),
            unix("Speed", 12.0, 3.0),
            unix("Heat", 5.0, 1.0),
            unix("Heat", 6.0, 2.0),
        ];
        // Speed: (10,10) (10,12) → 1 change / 2; Heat: 1 / 1
        assert!((detection_rate(&history) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_orders_by_timestamp_not_input() {
        let history = vec![
            unix("Speed", 1.0, 3.0),
            unix("Speed", 1.0, 1.0),
            unix("Speed", 2.0, 2.0),
        ];
        // sorted: 1.0@1, 2.0@2, 1.0@3 → 2 changes
        assert_eq!(detection_rate(&history), 1.0);
    }

    #[test]
    fn test_text_formats_parse() {
        let plain = RawTimestamp::Text("2024-03-01 12:00:00".to_string()).to_unix_seconds();
        let rfc = RawTimestamp::Text("2024-03-01T12:00:00+00:00".to_string()).to_unix_seconds();
        assert_eq!(plain, 1_709_294_400.0);
        assert_eq!(plain, rfc);
        assert_eq!(RawTimestamp::Text("1700000000.5".to_string()).to_unix_seconds(), 1_700_000_000.5);
    }

    #[test]
    fn test_malformed_timestamp_sorts_last() {
        assert_eq!(RawTimestamp::Text("yesterday".to_string()).to_unix_seconds(), f64::INFINITY);
        assert_eq!(RawTimestamp::Unix(f64::NAN).to_unix_seconds(), f64::INFINITY);

        let history = vec![
            text("Brakes", 9.0, "garbage"),
            text("Brakes", 1.0, "2024-03-01 12:00:00"),
            text("Brakes", 1.0, "2024-03-01 12:00:01"),
        ];
        // 1.0, 1.0, 9.0 → 1 change / 2 pairs
        assert_eq!(detection_rate(&history), 0.5);
    }

    #[test]
    fn test_rate_is_bounded() {
        let history: Vec<_> = (0..50).map(|i| unix("Battery", (i % 3) as f64, i as f64)).collect();
        let rate = detection_rate(&history);
        assert!((0.0..=1.0).contains(&rate));
    }
}
