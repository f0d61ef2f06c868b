//! Policy Module - Mitigation selection
//!
//! - `network.rs` - Dense ReLU Q-network (ndarray)
//! - `agent.rs` - `AdaptivePolicy`: greedy selection + TD update
//! - `types.rs` - Config, errors, records

pub mod agent;
pub mod network;
pub mod types;

pub use agent::{reward_for, state_from_outcome, AdaptivePolicy};
pub use network::{argmax, QNetwork};
pub use types::{ActionRecord, PolicyConfig, PolicyError, PolicyState, UpdateReport};
