//! # Quantum Chain - Block Production Engine (Subsystem 17)
//!
//! **Bounded Context:** Block Production & Mining
//! **Architecture Compliance:** DDD + Hexagonal
//!
//! ## Purpose
//!
//! Builds candidate blocks for a proof-of-work UTXO chain and drives the
//! workers that search for their proof of work:
//! - Greedy transaction selection, coin-age priority first and fee rate after,
//!   with in-pool dependency (orphan) resolution
//! - Coinbase assembly paying subsidy plus fees, with a per-worker extra nonce
//! - Header finalization (time, difficulty bits, randomized nonce)
//! - A search loop that cooperates with chain tip changes through
//!   cancellation tokens and pluggable search strategies
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Service                                            │
//! │  - MinerService: N blocking workers, start/stop     │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Orchestrator                                       │
//! │  - MiningOrchestrator: build → search → submit      │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Ports (Middle)                                     │
//! │  - Inbound: MiningApi, MinerControl                 │
//! │  - Outbound: ChainState, PendingPool, KeyManager,   │
//! │    BlockAcceptance, PowSearchStrategy, ...          │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain (Inner - Pure Logic)                        │
//! │  - TransactionSelector, CoinViewCache               │
//! │  - CoinbaseAssembler, BlockTemplate                 │
//! │  - Invariants: size, sigops, coinbase, ordering     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Critical Invariants
//!
//! 1. **Size**: reserve + Σ tx size < max block size
//! 2. **Sigops**: reserve + Σ tx sigops < max block sigops
//! 3. **Coinbase**: index 0 only, pays exactly subsidy + fees
//! 4. **Dependency Order**: parents before children, no duplicates
//! 5. **Freshness**: a block is only submitted on the tip it was built on
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! let orchestrator = Arc::new(MiningOrchestrator::new(
//!     MinerConfig::from_env()?,
//!     ConsensusParams::default(),
//!     collaborators,
//! )?);
//! let service = MinerService::new(Arc::clone(&orchestrator));
//! service.start().await?;
//! ```
//!
//! ## Module Structure
//!
//! - [`domain`]: Selection, coinbase, templates, difficulty, invariants
//! - [`ports`]: Hexagonal architecture interfaces (inbound/outbound)
//! - [`adapters`]: In-memory collaborators and CPU search strategies
//! - [`orchestrator`]: Template building and the worker search loop
//! - [`service`]: Worker pool control

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod orchestrator;
pub mod ports;
pub mod service;
pub mod utils;

mod config;
mod error;
mod metrics;

pub use config::{ConsensusParams, MinerConfig, MIN_BLOCK_MAX_SIZE};
pub use error::{BlockProductionError, Result};
pub use metrics::Metrics;

// Re-export commonly used types
pub use domain::{
    BlockTemplate, CancellationToken, ChainTip, CoinbaseAssembler, FeeRate, MinerState,
    PoolEntry, PriorityDeltas, SearchInput, SearchOutcome, SearchStrategyKind, SelectionLimits,
    SubsidySchedule, TemplateSummary, TransactionSelector, WorkerExit,
};

pub use ports::{
    BlockAcceptance, BlockValidator, ChainSnapshot, ChainState, Collaborators, KeyManager,
    MinerControl, MiningApi, MiningStatus, PeerMonitor, PendingPool, PowSearchStrategy,
    ScriptVerifier, SearchStrategyError, SubmitResult, UnspentOutputView, WorkerStatus,
};

pub use orchestrator::MiningOrchestrator;
pub use service::MinerService;

/// Subsystem identifier
pub const SUBSYSTEM_ID: u8 = 17;

/// Default largest block built, in bytes
pub const DEFAULT_BLOCK_MAX_SIZE: usize = 2_000_000;

/// Default bytes filled by priority before switching to fee order
pub const DEFAULT_BLOCK_PRIORITY_SIZE: usize = 27_000;

/// Default free-transaction threshold, base units per 1000 bytes
pub const DEFAULT_MIN_RELAY_FEE: shared_types::Amount = 1000;

/// Consensus block size limit
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Consensus signature-operation limit
pub const MAX_BLOCK_SIGOPS: u32 = 20_000;
