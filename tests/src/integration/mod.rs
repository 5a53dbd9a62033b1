//! # Integration Flows
//!
//! The real worker pool (`MinerService` → `MiningOrchestrator` → search
//! strategy) running against the in-memory chain, pool and key adapters.

pub mod mining_flow;
