//! Domain layer - Pure business logic for block production
//!
//! Everything here is synchronous and free of I/O. Collaborators are reached
//! only through the port traits passed in by the orchestrator.
//!
//! ## Entities
//!
//! - [`BlockTemplate`]: Candidate block with per-transaction fee/sigop data
//! - [`SelectionLimits`]: Policy limits for one selection pass
//! - [`ExtraNonce`], [`SearchState`], [`CancellationToken`]: Per-worker search state
//!
//! ## Services
//!
//! - [`TransactionSelector`]: Priority-then-fee greedy selection with orphan resolution
//! - [`CoinbaseAssembler`]: Coinbase construction and subsidy schedule
//! - [`CoinViewCache`]: Overlay coin view used while filling a template
//!
//! ## Invariants
//!
//! 1. Size budget: reserve + Σ size < max block size
//! 2. Sigop budget: reserve + Σ sigops < max block sigops
//! 3. Coinbase first, paying exactly subsidy + fees
//! 4. Parents before children, no duplicates

pub mod coin_view;
pub mod coinbase;
pub mod difficulty;
mod entities;
pub mod invariants;
pub mod selector;
pub mod template;

pub use coin_view::CoinViewCache;
pub use coinbase::{
    resolve_payout_script, CoinbaseAssembler, SubsidySchedule, MAX_COINBASE_FLAGS_SIZE,
};
pub use difficulty::{describe_difficulty, target_from_compact};
pub use entities::*;
pub use invariants::check_template;
pub use selector::{allow_free, TransactionSelector};
pub use template::{block_time, randomize_nonce, BlockTemplate, TemplateSummary};
