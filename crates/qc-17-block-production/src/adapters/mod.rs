//! Adapters implementing the outbound ports
//!
//! - [`memory`]: In-memory chain, pool, keys and acceptance for tests and
//!   regression-test wiring
//! - [`strategies`]: CPU proof-of-work search strategies

pub mod memory;
pub mod strategies;

pub use strategies::{build_strategy, BatchGrinder, StreamingGrinder};
