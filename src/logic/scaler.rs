//! Sensor Scaler - Online per-sensor normalization
//!
//! Welford running mean/variance per sensor. The scaler instance is the
//! unit of state: no globals, same input sequence ⇒ same outputs.

use serde::{Deserialize, Serialize};

use crate::logic::sensors::{SensorId, SensorReading, SENSOR_COUNT};

/// Variance floor used before warm-up (avoids division by zero)
pub const VARIANCE_EPSILON: f64 = 1e-8;

// ============================================================================
// RUNNING STATS
// ============================================================================

/// Welford accumulator (population variance)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// `(value - mean) / sqrt(max(variance, ε))`
    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.mean) / self.variance().max(VARIANCE_EPSILON).sqrt()
    }

    pub fn from_values(values: &[f64]) -> Self {
        let mut stats = Self::default();
        for v in values {
            stats.push(*v);
        }
        stats
    }
}

// ============================================================================
// SCALER STATE
// ============================================================================

/// Per-sensor statistics snapshot (copied out of the scaler)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub sensors: [SensorStats; SENSOR_COUNT],
}

impl ScalerState {
    pub fn get(&self, sensor: SensorId) -> &SensorStats {
        &self.sensors[sensor.index()]
    }

    pub fn total_samples(&self) -> u64 {
        self.sensors.iter().map(|s| s.count).sum()
    }
}

// ============================================================================
// SCALER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SensorScaler {
    stats: [RunningStats; SENSOR_COUNT],
}

impl SensorScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the reading's sensor stats, then return its normalized value.
    /// Non-finite readings leave the stats untouched.
    pub fn observe(&mut self, reading: &SensorReading) -> f64 {
        let stats = &mut self.stats[reading.sensor().index()];
        if reading.value().is_finite() {
            stats.push(reading.value());
        }
        stats.normalize(reading.value())
    }

    /// Normalize without updating
    pub fn normalize(&self, sensor: SensorId, value: f64) -> f64 {
        self.stats[sensor.index()].normalize(value)
    }

    pub fn snapshot(&self) -> ScalerState {
        ScalerState {
            sensors: self.stats.map(|s| SensorStats {
                mean: s.mean,
                variance: s.variance(),
                count: s.count,
            }),
        }
    }

    pub fn reset(&mut self) {
        self.stats = [RunningStats::default(); SENSOR_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings() -> Vec<SensorReading> {
        (0..50)
            .map(|i| {
                let sensor = SensorId::ALL[i % SENSOR_COUNT];
                SensorReading::new(sensor, 20.0 + (i as f64 * 1.7) % 80.0)
            })
            .collect()
    }

    #[test]
    fn test_replay_is_bit_identical() {
        let input = readings();
        let mut a = SensorScaler::new();
        let mut b = SensorScaler::new();

        let out_a: Vec<u64> = input.iter().map(|r| a.observe(r).to_bits()).collect();
        let out_b: Vec<u64> = input.iter().map(|r| b.observe(r).to_bits()).collect();

        assert_eq!(out_a, out_b);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_first_reading_is_finite() {
        let mut scaler = SensorScaler::new();
        let z = scaler.observe(&SensorReading::new(SensorId::Speed, 88.0));
        assert!(z.is_finite());
        assert_eq!(z, 0.0);
    }

    #[test]
    fn test_welford_matches_batch() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = RunningStats::from_values(&values);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.variance() - 4.0).abs() < 1e-12);
        assert!((stats.normalize(9.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sensors_are_independent() {
        let mut scaler = SensorScaler::new();
        for v in [10.0, 20.0, 30.0] {
            scaler.observe(&SensorReading::new(SensorId::Heat, v));
        }
        let snapshot = scaler.snapshot();
        assert_eq!(snapshot.get(SensorId::Heat).count, 3);
        assert_eq!(snapshot.get(SensorId::Battery).count, 0);
        assert_eq!(snapshot.total_samples(), 3);

        scaler.reset();
        assert_eq!(scaler.snapshot().total_samples(), 0);
    }
}
