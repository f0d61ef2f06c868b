//! Logic Module - Detection & Response Engines
//!
//! Chứa các engines: Bus, Scaler, Detector, Policy, Metrics, Orchestrator.
//!
//! ## Layout
//! - `sensors/` - Canonical sensor layout, readings and frames
//! - `bus/` - In-process pub/sub (CAN-style 8-byte payloads)
//! - `model/` - Isolation-forest novelty detection
//! - `policy/` - Q-network mitigation selection
//! - `metrics/` - Latency and rate aggregation
//! - `orchestrator/` - Tick pipeline and loop wiring

// Core components
pub mod bus;
pub mod model;
pub mod policy;
pub mod scaler;
pub mod sensors;

// Loop & collaborators
pub mod config;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod scenario;
pub mod shutdown;
pub mod telemetry;
