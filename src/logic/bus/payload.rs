//! Bus payload encoding
//!
//! Values are truncated toward zero then clamped into [0, 255].
//! Out-of-range values are silently saturated, never rejected.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAYLOAD_LEN;
use super::BusError;

/// Topic id (small integer, stable external contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicId(pub u16);

impl TopicId {
    pub const DETECTION_METRICS: TopicId = TopicId(crate::constants::TOPIC_DETECTION_METRICS);
    pub const SENSOR_FRAME: TopicId = TopicId(crate::constants::TOPIC_SENSOR_FRAME);
    pub const TELEMETRY_MIRROR: TopicId = TopicId(crate::constants::TOPIC_TELEMETRY_MIRROR);
}

impl std::fmt::Display for TopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}

/// Fixed-width byte payload (up to `MAX_PAYLOAD_LEN` bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    data: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl Payload {
    /// Encode values with clamping
    pub fn encode(values: &[f64]) -> Result<Self, BusError> {
        if values.len() > MAX_PAYLOAD_LEN {
            return Err(BusError::PayloadTooLong {
                len: values.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut data = [0u8; MAX_PAYLOAD_LEN];
        for (slot, value) in data.iter_mut().zip(values) {
            *slot = clamp_to_byte(*value);
        }

        Ok(Self { data, len: values.len() })
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        if bytes.len() > MAX_PAYLOAD_LEN {
            return Err(BusError::PayloadTooLong {
                len: bytes.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { data, len: bytes.len() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Truncate + saturate a value into a byte (NaN → 0)
pub fn clamp_to_byte(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.trunc().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping_not_wraparound() {
        let payload = Payload::encode(&[0.0, 255.0, 300.0, -5.0]).unwrap();
        assert_eq!(payload.as_bytes(), &[0, 255, 255, 0]);
    }

    #[test]
    fn test_truncates_fraction() {
        assert_eq!(clamp_to_byte(12.9), 12);
        assert_eq!(clamp_to_byte(-0.7), 0);
        assert_eq!(clamp_to_byte(f64::NAN), 0);
        assert_eq!(clamp_to_byte(f64::INFINITY), 255);
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let err = Payload::encode(&[1.0; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, BusError::PayloadTooLong { len: 9, max: 8 }));
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(TopicId::SENSOR_FRAME.to_string(), "0x200");
    }
}
