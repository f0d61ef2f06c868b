//! Sensor Layout - Canonical sensor order
//!
//! **This file controls the sensor schema**
//!
//! Rules:
//! 1. Add sensor → increment SENSOR_LAYOUT_VERSION
//! 2. Change order → increment SENSOR_LAYOUT_VERSION
//!
//! Frames, policy states and the action set are all indexed by this order.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

// ============================================================================
// LAYOUT
// ============================================================================

/// Current sensor layout version
pub const SENSOR_LAYOUT_VERSION: u8 = 1;

/// Number of monitored channels
pub const SENSOR_COUNT: usize = 8;

/// Monitored sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorId {
    Temperature,
    Speed,
    EngineSensors,
    Brakes,
    FluidLevel,
    Heat,
    TirePressure,
    Battery,
}

impl SensorId {
    /// All sensors in canonical order
    pub const ALL: [SensorId; SENSOR_COUNT] = [
        SensorId::Temperature,
        SensorId::Speed,
        SensorId::EngineSensors,
        SensorId::Brakes,
        SensorId::FluidLevel,
        SensorId::Heat,
        SensorId::TirePressure,
        SensorId::Battery,
    ];

    /// Position in canonical order
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<SensorId> {
        Self::ALL.get(index).copied()
    }

    /// Display name (also the `sensor` column value in history stores)
    pub fn name(self) -> &'static str {
        match self {
            SensorId::Temperature => "Temperature",
            SensorId::Speed => "Speed",
            SensorId::EngineSensors => "Engine Sensors",
            SensorId::Brakes => "Brakes",
            SensorId::FluidLevel => "Fluid Level",
            SensorId::Heat => "Heat",
            SensorId::TirePressure => "Tire Pressure",
            SensorId::Battery => "Battery",
        }
    }

    pub fn from_name(name: &str) -> Option<SensorId> {
        Self::ALL.iter().copied().find(|s| s.name().eq_ignore_ascii_case(name))
    }

    /// Mitigation descriptor for this sensor category
    pub fn mitigation(self) -> &'static str {
        match self {
            SensorId::Temperature => "Adjust temperature sensor calibration",
            SensorId::Speed => "Notify maintenance team for speed sensor",
            SensorId::EngineSensors => "Perform engine diagnostics",
            SensorId::Brakes => "Check brake system immediately",
            SensorId::FluidLevel => "Refill fluid levels or check for leaks",
            SensorId::Heat => "Inspect cooling system",
            SensorId::TirePressure => "Check tire pressure and adjust",
            SensorId::Battery => "Replace or recharge battery",
        }
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 of the canonical layout (names + version)
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[SENSOR_LAYOUT_VERSION]);
    for sensor in SensorId::ALL {
        hasher.update(sensor.name().as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, sensor) in SensorId::ALL.iter().enumerate() {
            assert_eq!(sensor.index(), i);
            assert_eq!(SensorId::from_index(i), Some(*sensor));
        }
        assert_eq!(SensorId::from_index(SENSOR_COUNT), None);
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(SensorId::from_name("Tire Pressure"), Some(SensorId::TirePressure));
        assert_eq!(SensorId::from_name("brakes"), Some(SensorId::Brakes));
        assert_eq!(SensorId::from_name("Oil"), None);
    }

    #[test]
    fn test_layout_hash_stable() {
        assert_eq!(layout_hash(), layout_hash());
        assert_ne!(layout_hash(), 0);
    }
}
