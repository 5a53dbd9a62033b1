//! Outbound ports (driven side - SPI)
//!
//! Workers run on blocking threads, so every collaborator here is a
//! synchronous `Send + Sync` trait. Implementations synchronize internally
//! and hold their locks only for the duration of one call.

use crate::domain::{
    ChainTip, PoolEntry, PriorityDeltas, SearchInput, SearchOutcome, SearchStrategyKind,
};
use primitive_types::H256;
use shared_types::{Block, Coins, Script, Transaction};
use std::sync::Arc;
use thiserror::Error;

/// Port: Unspent outputs of confirmed transactions
pub trait UnspentOutputView: Send + Sync {
    /// Unspent outputs of `txid`, if any remain
    fn lookup(&self, txid: &H256) -> Option<Coins>;
}

/// Tip and coin view taken together under one read of the chain
#[derive(Clone)]
pub struct ChainSnapshot {
    /// Validated tip
    pub tip: ChainTip,

    /// Coins as of `tip`
    pub coins: Arc<dyn UnspentOutputView>,
}

impl std::fmt::Debug for ChainSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("tip", &self.tip)
            .finish_non_exhaustive()
    }
}

/// Port: Validated chain state
pub trait ChainState: Send + Sync {
    /// Consistent tip + coin view
    fn snapshot(&self) -> ChainSnapshot;

    /// Current tip only
    fn tip(&self) -> ChainTip;

    /// Whether the node is still catching up with the network
    fn is_initial_sync(&self) -> bool;

    /// Network-adjusted unix time in seconds
    fn adjusted_time(&self) -> i64;

    /// Compact target required for a block on `tip` with `block_time`
    fn next_work_required(&self, tip: &ChainTip, block_time: u32) -> u32;

    /// Header version for a block on `tip`
    fn block_version(&self, tip: &ChainTip) -> i32;
}

/// Port: Pending transactions
pub trait PendingPool: Send + Sync {
    /// All pending transactions, in the pool's own order
    fn entries(&self) -> Vec<PoolEntry>;

    /// Operator adjustments for `txid`
    fn deltas_for(&self, txid: &H256) -> PriorityDeltas;

    /// Counter bumped on every pool change
    fn transactions_updated(&self) -> u64;
}

/// Port: Payout keys
pub trait KeyManager: Send + Sync {
    /// Script the next coinbase pays to
    fn next_payout_script(&self) -> Option<Script>;

    /// Mark `script` as used so it is not handed out again
    fn keep_payout_script(&self, script: &Script);
}

/// Result of handing a solved block to the chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitResult {
    /// Block connected
    Accepted,
    /// Block no longer builds on the tip
    Stale,
    /// Block rejected
    Invalid(String),
}

/// Port: Solved block acceptance
pub trait BlockAcceptance: Send + Sync {
    /// Process a solved block
    fn submit(&self, block: &Block) -> SubmitResult;
}

/// Port: Full template validity check (everything except proof of work)
pub trait BlockValidator: Send + Sync {
    /// Check `block` as a child of `tip`
    fn test_block_validity(&self, block: &Block, tip: &ChainTip) -> Result<(), String>;
}

/// Port: Peer connectivity
pub trait PeerMonitor: Send + Sync {
    /// Connected peers
    fn peer_count(&self) -> usize;
}

/// Port: Script verification of a transaction's inputs
pub trait ScriptVerifier: Send + Sync {
    /// Whether every input of `tx` unlocks the output it spends in `view`
    fn verify_inputs(&self, tx: &Transaction, view: &dyn UnspentOutputView) -> bool;
}

/// Errors raised inside a search strategy
#[derive(Debug, Error)]
pub enum SearchStrategyError {
    /// Input could not be used
    #[error("invalid search input: {0}")]
    InvalidInput(String),

    /// Strategy failed internally
    #[error("strategy failure: {0}")]
    Internal(String),
}

/// Port: Pluggable proof-of-work search
///
/// A strategy produces candidate witnesses for one nonce and hands each to
/// `on_candidate`. When the callback returns `true` the strategy stops with
/// [`SearchOutcome::Found`]. Strategies poll `is_cancelled` and return
/// [`SearchOutcome::Cancelled`] promptly once it fires.
pub trait PowSearchStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> SearchStrategyKind;

    /// Search one nonce
    fn run(
        &self,
        input: &SearchInput,
        on_candidate: &mut dyn FnMut(&[u8]) -> bool,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<SearchOutcome, SearchStrategyError>;
}

/// Every collaborator the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Chain state
    pub chain: Arc<dyn ChainState>,
    /// Pending pool
    pub pool: Arc<dyn PendingPool>,
    /// Payout keys
    pub keys: Arc<dyn KeyManager>,
    /// Solved block sink
    pub acceptance: Arc<dyn BlockAcceptance>,
    /// Template validity check
    pub validator: Arc<dyn BlockValidator>,
    /// Peer connectivity
    pub peers: Arc<dyn PeerMonitor>,
    /// Input script verification
    pub scripts: Arc<dyn ScriptVerifier>,
}
