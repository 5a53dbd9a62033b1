//! In-memory adapters
//!
//! Self-contained implementations of every outbound port. They back the
//! test suites and a single-node regtest setup where no other subsystem is
//! running.
//!
//! **Architecture:** Hexagonal - secondary adapters

use crate::domain::difficulty::target_from_compact;
use crate::domain::{ChainTip, PoolEntry, PriorityDeltas};
use crate::ports::{
    BlockAcceptance, BlockValidator, ChainSnapshot, ChainState, KeyManager, PeerMonitor,
    PendingPool, ScriptVerifier, SubmitResult, UnspentOutputView,
};
use crate::utils::hashing::meets_target;
use parking_lot::{Mutex, RwLock};
use primitive_types::H256;
use shared_types::{Block, Coins, Script, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Median-time-past window.
const MEDIAN_TIME_SPAN: usize = 11;

/// Default header version handed out by [`InMemoryChain`].
pub const DEFAULT_BLOCK_VERSION: i32 = 4;

// ============================================================================
// COINS
// ============================================================================

/// Unspent outputs held in a map
#[derive(Clone, Debug, Default)]
pub struct MemoryCoinView {
    coins: HashMap<H256, Coins>,
}

impl MemoryCoinView {
    /// Empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend the inputs of `tx` and add its outputs at `height`.
    pub fn apply(&mut self, tx: &Transaction, height: u32) {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let pruned = match self.coins.get_mut(&input.prevout.txid) {
                    Some(coins) => {
                        coins.spend(input.prevout.vout);
                        coins.is_pruned()
                    }
                    None => false,
                };
                if pruned {
                    self.coins.remove(&input.prevout.txid);
                }
            }
        }
        self.coins
            .insert(tx.txid(), Coins::from_transaction(tx, height));
    }

    /// Number of transactions with unspent outputs
    pub fn len(&self) -> usize {
        self.coins.len()
    }

    /// True when nothing is unspent
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl UnspentOutputView for MemoryCoinView {
    fn lookup(&self, txid: &H256) -> Option<Coins> {
        self.coins.get(txid).cloned()
    }
}

// ============================================================================
// CHAIN
// ============================================================================

type TipListener = Box<dyn Fn(H256) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
struct StoredBlock {
    hash: H256,
    height: u32,
    time: u32,
    bits: u32,
}

struct ChainInner {
    blocks: Vec<StoredBlock>,
    coins: MemoryCoinView,
}

impl ChainInner {
    fn tip(&self) -> ChainTip {
        // `blocks` always holds at least the genesis block.
        let last = self.blocks[self.blocks.len() - 1];
        let mut times: Vec<i64> = self
            .blocks
            .iter()
            .rev()
            .take(MEDIAN_TIME_SPAN)
            .map(|b| b.time as i64)
            .collect();
        times.sort_unstable();
        ChainTip {
            hash: last.hash,
            height: last.height,
            time: last.time,
            median_time_past: times[times.len() / 2],
            bits: last.bits,
        }
    }
}

/// Block chain kept in memory, one block per height.
///
/// Blocks are connected only on top of the current tip. Every connected
/// block is announced to the registered tip listeners.
pub struct InMemoryChain {
    inner: RwLock<ChainInner>,
    listeners: RwLock<Vec<TipListener>>,
    next_bits: u32,
    fixed_time: Option<i64>,
    block_version: i32,
    initial_sync: AtomicBool,
}

impl InMemoryChain {
    /// Chain containing only `genesis`. Later blocks must meet the
    /// genesis difficulty.
    pub fn new(genesis: &Block) -> Self {
        let mut coins = MemoryCoinView::new();
        for tx in &genesis.transactions {
            coins.apply(tx, 0);
        }
        Self {
            inner: RwLock::new(ChainInner {
                blocks: vec![StoredBlock {
                    hash: genesis.hash(),
                    height: 0,
                    time: genesis.header.time,
                    bits: genesis.header.bits,
                }],
                coins,
            }),
            listeners: RwLock::new(Vec::new()),
            next_bits: genesis.header.bits,
            fixed_time: None,
            block_version: DEFAULT_BLOCK_VERSION,
            initial_sync: AtomicBool::new(false),
        }
    }

    /// Report `time` as the adjusted network time instead of the clock.
    pub fn with_fixed_time(mut self, time: i64) -> Self {
        self.fixed_time = Some(time);
        self
    }

    /// Require `bits` for every following block.
    pub fn with_next_bits(mut self, bits: u32) -> Self {
        self.next_bits = bits;
        self
    }

    /// Mark the node as catching up (or not).
    pub fn set_initial_sync(&self, syncing: bool) {
        self.initial_sync.store(syncing, Ordering::Relaxed);
    }

    /// Call `listener` with the new tip hash after each connected block.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(H256) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    /// Add confirmed outputs of `tx` as if mined at `height`.
    pub fn add_coins(&self, tx: &Transaction, height: u32) {
        self.inner.write().coins.apply(tx, height);
    }

    /// Tip height
    pub fn height(&self) -> u32 {
        self.inner.read().tip().height
    }

    /// Hashes of every block, genesis first
    pub fn block_hashes(&self) -> Vec<H256> {
        self.inner.read().blocks.iter().map(|b| b.hash).collect()
    }

    /// Connect `block` on top of the tip.
    pub fn connect_block(&self, block: &Block) -> SubmitResult {
        let hash = block.hash();
        {
            let mut inner = self.inner.write();
            let tip = inner.tip();
            if block.header.prev_block != tip.hash {
                return SubmitResult::Stale;
            }
            if !block.transactions.first().is_some_and(Transaction::is_coinbase) {
                return SubmitResult::Invalid("first transaction is not a coinbase".into());
            }
            if block.header.merkle_root != block.merkle_root() {
                return SubmitResult::Invalid("bad merkle root".into());
            }
            let meets = target_from_compact(block.header.bits)
                .is_some_and(|target| meets_target(&hash, target));
            if !meets {
                return SubmitResult::Invalid("high-hash".into());
            }

            let height = tip.height + 1;
            for tx in &block.transactions {
                inner.coins.apply(tx, height);
            }
            inner.blocks.push(StoredBlock {
                hash,
                height,
                time: block.header.time,
                bits: block.header.bits,
            });
            debug!(height, ?hash, "[qc-17] In-memory chain connected block");
        }

        for listener in self.listeners.read().iter() {
            listener(hash);
        }
        SubmitResult::Accepted
    }
}

impl ChainState for InMemoryChain {
    fn snapshot(&self) -> ChainSnapshot {
        let inner = self.inner.read();
        ChainSnapshot {
            tip: inner.tip(),
            coins: Arc::new(inner.coins.clone()),
        }
    }

    fn tip(&self) -> ChainTip {
        self.inner.read().tip()
    }

    fn is_initial_sync(&self) -> bool {
        self.initial_sync.load(Ordering::Relaxed)
    }

    fn adjusted_time(&self) -> i64 {
        self.fixed_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn next_work_required(&self, _tip: &ChainTip, _block_time: u32) -> u32 {
        self.next_bits
    }

    fn block_version(&self, _tip: &ChainTip) -> i32 {
        self.block_version
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Pending transactions in insertion order
#[derive(Default)]
pub struct InMemoryPool {
    entries: RwLock<Vec<PoolEntry>>,
    deltas: RwLock<HashMap<H256, PriorityDeltas>>,
    updated: AtomicU64,
}

impl InMemoryPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tx`, returning its id.
    pub fn add(&self, tx: Transaction) -> H256 {
        let entry = PoolEntry::new(tx);
        let txid = entry.txid;
        self.entries.write().push(entry);
        self.updated.fetch_add(1, Ordering::Relaxed);
        txid
    }

    /// Accumulate operator deltas for `txid`.
    pub fn prioritise(&self, txid: H256, priority_delta: f64, fee_delta: i64) {
        let mut deltas = self.deltas.write();
        let entry = deltas.entry(txid).or_default();
        entry.priority += priority_delta;
        entry.fee += fee_delta;
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every transaction confirmed by `block`.
    pub fn remove_for_block(&self, block: &Block) {
        let mined: HashSet<H256> = block.transactions.iter().map(Transaction::txid).collect();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| !mined.contains(&entry.txid));
        if entries.len() != before {
            self.updated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pending transaction count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PendingPool for InMemoryPool {
    fn entries(&self) -> Vec<PoolEntry> {
        self.entries.read().clone()
    }

    fn deltas_for(&self, txid: &H256) -> PriorityDeltas {
        self.deltas.read().get(txid).copied().unwrap_or_default()
    }

    fn transactions_updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }
}

// ============================================================================
// KEYS, ACCEPTANCE, VALIDATION, PEERS
// ============================================================================

/// Hands out one fixed payout script
#[derive(Default)]
pub struct StaticKeyManager {
    script: Option<Script>,
    kept: Mutex<Vec<Script>>,
}

impl StaticKeyManager {
    /// Always pay to `script`
    pub fn new(script: Script) -> Self {
        Self {
            script: Some(script),
            kept: Mutex::new(Vec::new()),
        }
    }

    /// Key manager with no keys
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scripts marked as used
    pub fn kept(&self) -> Vec<Script> {
        self.kept.lock().clone()
    }
}

impl KeyManager for StaticKeyManager {
    fn next_payout_script(&self) -> Option<Script> {
        self.script.clone()
    }

    fn keep_payout_script(&self, script: &Script) {
        self.kept.lock().push(script.clone());
    }
}

/// Connects solved blocks to an [`InMemoryChain`] and records every
/// submission.
pub struct RecordingAcceptance {
    chain: Arc<InMemoryChain>,
    pool: Option<Arc<InMemoryPool>>,
    submissions: Mutex<Vec<(H256, SubmitResult)>>,
}

impl RecordingAcceptance {
    /// Submit into `chain`
    pub fn new(chain: Arc<InMemoryChain>) -> Self {
        Self {
            chain,
            pool: None,
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Also evict confirmed transactions from `pool`.
    pub fn with_pool(mut self, pool: Arc<InMemoryPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Every submission so far, oldest first
    pub fn submissions(&self) -> Vec<(H256, SubmitResult)> {
        self.submissions.lock().clone()
    }

    /// Hashes of accepted blocks
    pub fn accepted(&self) -> Vec<H256> {
        self.submissions
            .lock()
            .iter()
            .filter(|(_, result)| *result == SubmitResult::Accepted)
            .map(|(hash, _)| *hash)
            .collect()
    }
}

impl BlockAcceptance for RecordingAcceptance {
    fn submit(&self, block: &Block) -> SubmitResult {
        let result = self.chain.connect_block(block);
        match &result {
            SubmitResult::Accepted => {
                if let Some(pool) = &self.pool {
                    pool.remove_for_block(block);
                }
            }
            SubmitResult::Stale => debug!("[qc-17] Submitted block is stale"),
            SubmitResult::Invalid(reason) => warn!(%reason, "[qc-17] Submitted block rejected"),
        }
        self.submissions.lock().push((block.hash(), result.clone()));
        result
    }
}

/// Validity check that accepts every template
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllValidator;

impl BlockValidator for AcceptAllValidator {
    fn test_block_validity(&self, _block: &Block, _tip: &ChainTip) -> Result<(), String> {
        Ok(())
    }
}

/// Script verifier that accepts every input
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllScripts;

impl ScriptVerifier for AcceptAllScripts {
    fn verify_inputs(&self, _tx: &Transaction, _view: &dyn UnspentOutputView) -> bool {
        true
    }
}

/// Peer count set by hand
#[derive(Debug, Default)]
pub struct FixedPeers(AtomicUsize);

impl FixedPeers {
    /// Report `count` peers
    pub fn new(count: usize) -> Self {
        Self(AtomicUsize::new(count))
    }

    /// Change the reported count
    pub fn set(&self, count: usize) {
        self.0.store(count, Ordering::Relaxed);
    }
}

impl PeerMonitor for FixedPeers {
    fn peer_count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}
