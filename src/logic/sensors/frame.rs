//! Sensor readings & frames

use std::time::Instant;

use super::layout::{SensorId, SENSOR_COUNT};

// ============================================================================
// READING
// ============================================================================

/// Single immutable sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    sensor: SensorId,
    value: f64,
    timestamp: Instant,
}

impl SensorReading {
    pub fn new(sensor: SensorId, value: f64) -> Self {
        Self::at(sensor, value, Instant::now())
    }

    pub fn at(sensor: SensorId, value: f64, timestamp: Instant) -> Self {
        Self { sensor, value, timestamp }
    }

    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

// ============================================================================
// FRAME
// ============================================================================

/// One reading slot per sensor, in canonical order.
///
/// Absent sensors are `None` slots; the frame always has `SENSOR_COUNT` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    captured_at: Instant,
    slots: [Option<SensorReading>; SENSOR_COUNT],
}

impl SensorFrame {
    /// Build a frame from raw values (canonical order), all stamped now
    pub fn from_values(values: [Option<f64>; SENSOR_COUNT]) -> Self {
        let captured_at = Instant::now();
        let mut slots = [None; SENSOR_COUNT];
        for (sensor, value) in SensorId::ALL.iter().zip(values) {
            slots[sensor.index()] = value.map(|v| SensorReading::at(*sensor, v, captured_at));
        }
        Self { captured_at, slots }
    }

    /// Frame with every sensor present
    pub fn complete(values: [f64; SENSOR_COUNT]) -> Self {
        Self::from_values(values.map(Some))
    }

    /// Build from individual readings; later readings for the same sensor win
    pub fn from_readings(readings: impl IntoIterator<Item = SensorReading>) -> Self {
        let mut slots = [None; SENSOR_COUNT];
        let mut captured_at = None;
        for reading in readings {
            captured_at.get_or_insert(reading.timestamp());
            slots[reading.sensor().index()] = Some(reading);
        }
        Self {
            captured_at: captured_at.unwrap_or_else(Instant::now),
            slots,
        }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn get(&self, sensor: SensorId) -> Option<&SensorReading> {
        self.slots[sensor.index()].as_ref()
    }

    pub fn value(&self, sensor: SensorId) -> Option<f64> {
        self.get(sensor).map(|r| r.value())
    }

    /// Slots in canonical order (length is always `SENSOR_COUNT`)
    pub fn slots(&self) -> &[Option<SensorReading>; SENSOR_COUNT] {
        &self.slots
    }

    /// Present readings only
    pub fn readings(&self) -> impl Iterator<Item = &SensorReading> {
        self.slots.iter().flatten()
    }

    pub fn values(&self) -> [Option<f64>; SENSOR_COUNT] {
        self.slots.map(|slot| slot.map(|r| r.value()))
    }

    pub fn present_count(&self) -> usize {
        self.readings().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_slots_are_explicit() {
        let mut values = [Some(50.0); SENSOR_COUNT];
        values[SensorId::Brakes.index()] = None;
        let frame = SensorFrame::from_values(values);

        assert_eq!(frame.slots().len(), SENSOR_COUNT);
        assert_eq!(frame.present_count(), SENSOR_COUNT - 1);
        assert!(frame.get(SensorId::Brakes).is_none());
        assert_eq!(frame.value(SensorId::Speed), Some(50.0));
    }

    #[test]
    fn test_from_readings_places_by_sensor() {
        let frame = SensorFrame::from_readings([
            SensorReading::new(SensorId::Battery, 12.5),
            SensorReading::new(SensorId::Temperature, 80.0),
        ]);
        assert_eq!(frame.value(SensorId::Battery), Some(12.5));
        assert_eq!(frame.value(SensorId::Temperature), Some(80.0));
        assert_eq!(frame.present_count(), 2);
    }
}
