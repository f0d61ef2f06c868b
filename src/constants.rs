//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Bus topic ids are an external contract: never renumber them.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Vehicle Guard";

// ============================================
// Bus topics (stable wire contract)
// ============================================

/// Detection-metrics triplet `[detection_ms, response_ms, any_anomaly]`
pub const TOPIC_DETECTION_METRICS: u16 = 0x100;

/// Raw sensor frame, one clamped byte per sensor in canonical order
pub const TOPIC_SENSOR_FRAME: u16 = 0x200;

/// Plot/telemetry mirror of the sensor frame
pub const TOPIC_TELEMETRY_MIRROR: u16 = 0x300;

/// Max payload width (classic CAN data field)
pub const MAX_PAYLOAD_LEN: usize = 8;

// ============================================
// Loop cadence defaults
// ============================================

/// Orchestrator tick interval (milliseconds, 1 Hz)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Metrics refresh interval (milliseconds)
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 5_000;

/// Detector refit interval (seconds)
pub const DEFAULT_REFIT_INTERVAL_SECS: u64 = 60;

/// Bus receive timeout (milliseconds)
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;

/// Per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// ============================================
// Detector defaults
// ============================================

/// Minimum samples required for a fit
pub const DEFAULT_MIN_FIT_SAMPLES: usize = 30;

/// Historical window size used for fitting
pub const DEFAULT_WINDOW_SIZE: usize = 1_000;

/// Assumed fraction of anomalous baseline data
pub const DEFAULT_CONTAMINATION: f64 = 0.05;

/// Number of isolation trees
pub const DEFAULT_TREE_COUNT: usize = 100;

/// Max subsample per tree
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Detector RNG seed
pub const DEFAULT_DETECTOR_SEED: u64 = 42;

// ============================================
// Policy defaults
// ============================================

/// TD discount factor
pub const DEFAULT_GAMMA: f32 = 0.99;

/// SGD learning rate
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;

/// Policy weight-init seed
pub const DEFAULT_POLICY_SEED: u64 = 7;

// ============================================
// Environment keys
// ============================================

/// Optional JSON config file
pub const ENV_CONFIG_PATH: &str = "VG_CONFIG";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";
