//! Vehicle Guard Core
//!
//! Sensor anomaly detection and adaptive mitigation for a fixed set of eight
//! vehicle channels.

pub mod constants;
pub mod logic;
