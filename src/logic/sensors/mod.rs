//! Sensors Module - Canonical sensor set, readings and frames

pub mod frame;
pub mod layout;

pub use frame::{SensorFrame, SensorReading};
pub use layout::{layout_hash, SensorId, SENSOR_COUNT, SENSOR_LAYOUT_VERSION};
