//! Domain entities for block production

use crate::error::BlockProductionError;
use crate::utils::hashing::{hash_to_u256, search_seed, u256_to_hash};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use shared_types::{Amount, Transaction};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fee expressed in base units per 1000 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeeRate(Amount);

impl FeeRate {
    /// Rate paid by `fee` over `size` bytes.
    pub fn new(fee: Amount, size: usize) -> Self {
        if size == 0 {
            return Self(0);
        }
        Self(fee.saturating_mul(1000) / size as Amount)
    }

    /// Rate from an explicit per-kilobyte amount.
    pub const fn per_kb(amount: Amount) -> Self {
        Self(amount)
    }

    /// Base units per 1000 bytes.
    pub fn as_per_kb(&self) -> Amount {
        self.0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per kB", self.0)
    }
}

/// Operator adjustments to a pool transaction's ordering.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PriorityDeltas {
    /// Added to the computed priority
    pub priority: f64,
    /// Added to the fee when computing the fee rate
    pub fee: Amount,
}

/// One pending transaction as the pool hands it out.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// Shared transaction body
    pub tx: Arc<Transaction>,
    /// Cached transaction id
    pub txid: H256,
}

impl PoolEntry {
    /// Wrap a transaction, caching its id.
    pub fn new(tx: Transaction) -> Self {
        let txid = tx.txid();
        Self {
            tx: Arc::new(tx),
            txid,
        }
    }
}

/// Validated chain tip as seen when a template is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Tip block hash
    pub hash: H256,
    /// Tip height
    pub height: u32,
    /// Tip block time
    pub time: u32,
    /// Median time of the last eleven blocks
    pub median_time_past: i64,
    /// Compact target of the tip
    pub bits: u32,
}

/// Policy limits for one selection pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionLimits {
    /// Exclusive ceiling on the block's running size
    pub max_block_size: usize,
    /// Bytes filled in priority order before switching to fee order
    pub max_priority_size: usize,
    /// Size below which free transactions are still admitted
    pub min_block_size: usize,
    /// Free-transaction threshold
    pub min_relay_fee: FeeRate,
    /// Exclusive ceiling on the block's running signature operations
    pub max_block_sigops: u32,
    /// Size set aside for the header and coinbase
    pub reserved_size: usize,
    /// Signature operations set aside for the coinbase
    pub reserved_sigops: u32,
    /// Log priority, fee rate and id of every included transaction
    pub log_selection_detail: bool,
}

/// Bytes reserved for the header and coinbase before selection starts.
pub const DEFAULT_RESERVED_SIZE: usize = 1000;

/// Signature operations reserved for the coinbase.
pub const DEFAULT_RESERVED_SIGOPS: u32 = 100;

impl Default for SelectionLimits {
    fn default() -> Self {
        Self {
            max_block_size: crate::DEFAULT_BLOCK_MAX_SIZE,
            max_priority_size: crate::DEFAULT_BLOCK_PRIORITY_SIZE,
            min_block_size: 0,
            min_relay_fee: FeeRate::per_kb(crate::DEFAULT_MIN_RELAY_FEE),
            max_block_sigops: crate::MAX_BLOCK_SIGOPS,
            reserved_size: DEFAULT_RESERVED_SIZE,
            reserved_sigops: DEFAULT_RESERVED_SIGOPS,
            log_selection_detail: false,
        }
    }
}

/// Output of a selection pass, in inclusion order.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    /// Selected transactions, parents before children
    pub transactions: Vec<Arc<Transaction>>,
    /// Fee of each selected transaction, without operator deltas
    pub fees: Vec<Amount>,
    /// Signature operations of each selected transaction
    pub sigops: Vec<u32>,
    /// Running block size, reserve included
    pub block_size: usize,
    /// Running signature operations, reserve included
    pub block_sigops: u32,
    /// Sum of `fees`
    pub total_fees: Amount,
    /// `PoolConsistencyFault` for each transaction dropped for an
    /// unresolvable input
    pub faults: Vec<BlockProductionError>,
}

/// Per-worker extra nonce, carried in the coinbase unlocking script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtraNonce {
    prev_block: Option<H256>,
    counter: u32,
}

impl ExtraNonce {
    /// Value for the next template built on `prev_block`.
    ///
    /// The counter restarts when the parent changes and otherwise
    /// increases by one per call.
    pub fn next(&mut self, prev_block: H256) -> u32 {
        if self.prev_block != Some(prev_block) {
            self.counter = 0;
            self.prev_block = Some(prev_block);
        }
        self.counter = self.counter.wrapping_add(1);
        self.counter
    }
}

/// Nonce and target bookkeeping for one template's search.
#[derive(Clone, Debug)]
pub struct SearchState {
    /// Current nonce as an integer
    pub nonce: U256,
    /// Target decoded from the header bits
    pub target: U256,
    /// When the search on this template began
    pub started_at: Instant,
    /// Pool update counter observed when the template was built
    pub pool_generation: u64,
}

impl SearchState {
    /// Start searching from the header's nonce.
    pub fn new(nonce: &H256, target: U256, pool_generation: u64) -> Self {
        Self {
            nonce: hash_to_u256(nonce),
            target,
            started_at: Instant::now(),
            pool_generation,
        }
    }

    /// True once the low 16 bits of the nonce are all set.
    pub fn low_bits_exhausted(&self) -> bool {
        self.nonce.low_u64() & 0xffff == 0xffff
    }

    /// Move to the next nonce, returning it in header form.
    pub fn advance(&mut self) -> H256 {
        self.nonce = self.nonce.overflowing_add(U256::one()).0;
        u256_to_hash(self.nonce)
    }

    /// Time spent on this template so far.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Cooperative cancellation flag shared between a worker and the node.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was signalled since the last reset.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Input handed to a search strategy for one nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchInput {
    /// Header preimage (every field but nonce and solution)
    pub preimage: Vec<u8>,
    /// Nonce under search
    pub nonce: H256,
}

impl SearchInput {
    /// `sha256(preimage ‖ nonce)`, the strategies' starting point.
    pub fn seed(&self) -> [u8; 32] {
        search_seed(&self.preimage, &self.nonce)
    }
}

/// How a strategy run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A witness was accepted by the candidate callback
    Found(Vec<u8>),
    /// The cancellation check fired
    Cancelled,
    /// Every witness for this nonce was tried
    Exhausted,
}

/// Available proof-of-work search strategies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategyKind {
    /// Streams witnesses one by one, checking cancellation as it goes
    #[default]
    Default,
    /// Generates a whole batch in parallel, then validates it
    Batch,
}

impl fmt::Display for SearchStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for SearchStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown search strategy '{other}'")),
        }
    }
}

/// Phase a mining worker is in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinerState {
    /// Waiting for peers or for initial sync to finish
    WaitingForPeers,
    /// Selecting transactions and finalizing a header
    BuildingTemplate,
    /// Running the search strategy
    Searching,
}

/// Why a worker's search loop returned normally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested
    Shutdown,
    /// A block was found on a network that mines on demand
    BlockFoundOnDemand,
}
