//! Transaction selection for block templates
//!
//! Greedy fill ordered by coin-age priority first and fee rate afterwards.
//! Transactions spending outputs of other pending transactions wait in an
//! arena until every pending parent has been placed.

use super::coin_view::CoinViewCache;
use super::entities::{FeeRate, PoolEntry, Selection, SelectionLimits};
use crate::error::BlockProductionError;
use crate::ports::{ChainSnapshot, PendingPool, ScriptVerifier, UnspentOutputView};
use primitive_types::H256;
use shared_types::{Amount, Transaction, COIN};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Priority above which a transaction needs no fee: one coin, one day
/// (144 blocks) old, in a 250 byte transaction.
pub const FREE_PRIORITY_THRESHOLD: f64 = COIN as f64 * 144.0 / 250.0;

/// Whether `priority` alone earns a place in the priority section.
pub fn allow_free(priority: f64) -> bool {
    priority > FREE_PRIORITY_THRESHOLD
}

/// Index of a candidate in the selection arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct CandidateId(usize);

#[derive(Debug)]
struct CandidateTx {
    tx: Arc<Transaction>,
    txid: H256,
    size: usize,
    priority: f64,
    fee_rate: FeeRate,
    /// Pending parents not yet placed in the template
    unresolved: HashSet<H256>,
    dropped: bool,
}

impl CandidateTx {
    fn new(entry: &PoolEntry) -> Self {
        Self {
            tx: Arc::clone(&entry.tx),
            txid: entry.txid,
            size: 0,
            priority: 0.0,
            fee_rate: FeeRate::default(),
            unresolved: HashSet::new(),
            dropped: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SortMode {
    Priority,
    Fee,
}

#[derive(Debug)]
struct QueueEntry {
    id: CandidateId,
    priority: f64,
    fee_rate: FeeRate,
    txid: H256,
    mode: SortMode,
}

impl QueueEntry {
    fn new(id: CandidateId, candidate: &CandidateTx, mode: SortMode) -> Self {
        Self {
            id,
            priority: candidate.priority,
            fee_rate: candidate.fee_rate,
            txid: candidate.txid,
            mode,
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let primary = match self.mode {
            SortMode::Fee => self
                .fee_rate
                .cmp(&other.fee_rate)
                .then_with(|| self.priority.total_cmp(&other.priority)),
            SortMode::Priority => self
                .priority
                .total_cmp(&other.priority)
                .then_with(|| self.fee_rate.cmp(&other.fee_rate)),
        };
        // Smaller txid pops first.
        primary.then_with(|| other.txid.cmp(&self.txid))
    }
}

/// Candidates for one selection pass.
#[derive(Default)]
struct CandidateSet {
    arena: Vec<CandidateTx>,
    /// Pending parent txid -> candidates waiting on it
    dependers: HashMap<H256, Vec<CandidateId>>,
    ready: Vec<CandidateId>,
    faults: Vec<BlockProductionError>,
}

impl CandidateSet {
    fn build(
        entries: &[PoolEntry],
        coins: &dyn UnspentOutputView,
        pool: &dyn PendingPool,
        height: u32,
        lock_cutoff: i64,
    ) -> Self {
        let by_txid: HashMap<H256, &PoolEntry> =
            entries.iter().map(|entry| (entry.txid, entry)).collect();
        let mut set = Self::default();

        for entry in entries {
            let tx = &entry.tx;
            if tx.is_coinbase() || !tx.is_final(height, lock_cutoff) {
                continue;
            }

            let mut orphan: Option<CandidateId> = None;
            let mut input_priority = 0.0f64;
            let mut total_in: Amount = 0;
            let mut missing = None;

            for input in &tx.inputs {
                let prevout = &input.prevout;
                let confirmed = coins.lookup(&prevout.txid).and_then(|coins| {
                    coins
                        .output(prevout.vout)
                        .map(|out| (out.value, coins.height))
                });
                if let Some((value, coin_height)) = confirmed {
                    let age = height.saturating_sub(coin_height);
                    input_priority += value as f64 * age as f64;
                    total_in += value;
                    continue;
                }

                let pending = by_txid
                    .get(&prevout.txid)
                    .and_then(|parent| parent.tx.outputs.get(prevout.vout as usize));
                let Some(parent_out) = pending else {
                    missing = Some(*prevout);
                    break;
                };

                let arena = &mut set.arena;
                let id = *orphan.get_or_insert_with(|| {
                    arena.push(CandidateTx::new(entry));
                    CandidateId(arena.len() - 1)
                });
                if set.arena[id.0].unresolved.insert(prevout.txid) {
                    set.dependers.entry(prevout.txid).or_default().push(id);
                }
                total_in += parent_out.value;
            }

            if let Some(missing) = missing {
                let fault = BlockProductionError::PoolConsistencyFault {
                    txid: entry.txid,
                    missing,
                };
                error!(error = %fault, "[qc-17] Dropping pool transaction from this selection");
                if let Some(id) = orphan {
                    set.arena[id.0].dropped = true;
                }
                set.faults.push(fault);
                continue;
            }

            let size = tx.serialized_size();
            let deltas = pool.deltas_for(&entry.txid);
            let priority = tx.compute_priority(input_priority, size) + deltas.priority;
            let fee_rate = FeeRate::new(total_in + deltas.fee - tx.value_out(), size);

            let id = match orphan {
                Some(id) => id,
                None => {
                    set.arena.push(CandidateTx::new(entry));
                    let id = CandidateId(set.arena.len() - 1);
                    set.ready.push(id);
                    id
                }
            };
            let candidate = &mut set.arena[id.0];
            candidate.size = size;
            candidate.priority = priority;
            candidate.fee_rate = fee_rate;
        }

        set
    }
}

/// Builds the ordered transaction list of a block template
#[derive(Clone, Debug)]
pub struct TransactionSelector {
    limits: SelectionLimits,
}

impl TransactionSelector {
    /// Create new transaction selector
    pub fn new(limits: SelectionLimits) -> Self {
        Self { limits }
    }

    /// Limits this selector enforces
    pub fn limits(&self) -> &SelectionLimits {
        &self.limits
    }

    /// Select transactions for a block on `snapshot.tip`.
    ///
    /// Time-locked transactions are compared against `lock_cutoff`. The
    /// result always satisfies the size and signature-operation ceilings
    /// and lists every transaction after its pending parents.
    #[tracing::instrument(
        skip(self, snapshot, pool, scripts),
        fields(height = snapshot.tip.height + 1)
    )]
    pub fn select(
        &self,
        snapshot: &ChainSnapshot,
        lock_cutoff: i64,
        pool: &dyn PendingPool,
        scripts: &dyn ScriptVerifier,
    ) -> Selection {
        let limits = &self.limits;
        let height = snapshot.tip.height + 1;
        let entries = pool.entries();
        let CandidateSet {
            mut arena,
            dependers,
            ready,
            faults,
        } = CandidateSet::build(&entries, snapshot.coins.as_ref(), pool, height, lock_cutoff);

        let mut mode = if limits.max_priority_size == 0 {
            SortMode::Fee
        } else {
            SortMode::Priority
        };
        let mut queue: BinaryHeap<QueueEntry> = ready
            .iter()
            .map(|&id| QueueEntry::new(id, &arena[id.0], mode))
            .collect();

        debug!(
            "Starting greedy selection: {} candidates ready, {} waiting on parents",
            queue.len(),
            arena.len() - queue.len()
        );

        let mut view = CoinViewCache::new(snapshot.coins.as_ref());
        let mut selection = Selection {
            block_size: limits.reserved_size,
            block_sigops: limits.reserved_sigops,
            faults,
            ..Selection::default()
        };

        while let Some(next) = queue.pop() {
            let candidate = &arena[next.id.0];
            let tx = Arc::clone(&candidate.tx);
            let txid = candidate.txid;
            let size = candidate.size;
            let priority = candidate.priority;
            let fee_rate = candidate.fee_rate;

            if selection.block_size + size >= limits.max_block_size {
                continue;
            }

            let legacy_sigops = tx.legacy_sigop_count();
            if selection.block_sigops + legacy_sigops >= limits.max_block_sigops {
                continue;
            }

            // Free transactions only fill the block up to its minimum size.
            let deltas = pool.deltas_for(&txid);
            if mode == SortMode::Fee
                && deltas.priority <= 0.0
                && deltas.fee <= 0
                && fee_rate < limits.min_relay_fee
                && selection.block_size + size >= limits.min_block_size
            {
                continue;
            }

            if mode == SortMode::Priority
                && (selection.block_size + size >= limits.max_priority_size || !allow_free(priority))
            {
                debug!(
                    size = selection.block_size,
                    "Priority section full, ordering by fee rate"
                );
                mode = SortMode::Fee;
                queue = queue
                    .into_iter()
                    .map(|entry| QueueEntry {
                        mode: SortMode::Fee,
                        ..entry
                    })
                    .collect();
            }

            if !view.have_inputs(&tx) {
                continue;
            }

            let fee = view.value_in(&tx) - tx.value_out();
            let sigops = legacy_sigops + p2sh_sigop_count(&mut view, &tx);
            if selection.block_sigops + sigops >= limits.max_block_sigops {
                continue;
            }

            if !scripts.verify_inputs(&tx, &view) {
                debug!(?txid, "Skipping transaction with failing input scripts");
                continue;
            }

            view.apply(&tx, height);

            if limits.log_selection_detail {
                quantum_telemetry::log_tx_event!(
                    info,
                    "qc-17",
                    "[qc-17] Selected transaction",
                    hex::encode(txid.as_bytes()),
                    priority = priority,
                    fee_rate = %fee_rate
                );
            }

            selection.transactions.push(tx);
            selection.fees.push(fee);
            selection.sigops.push(sigops);
            selection.block_size += size;
            selection.block_sigops += sigops;
            selection.total_fees += fee;

            if let Some(children) = dependers.get(&txid) {
                for &child in children {
                    let record = &mut arena[child.0];
                    if record.dropped || record.unresolved.is_empty() {
                        continue;
                    }
                    record.unresolved.remove(&txid);
                    if record.unresolved.is_empty() {
                        queue.push(QueueEntry::new(child, record, mode));
                    }
                }
            }
        }

        info!(
            "[qc-17] Transaction selection complete: selected={}, size={}/{}, sigops={}, fees={}",
            selection.transactions.len(),
            selection.block_size,
            limits.max_block_size,
            selection.block_sigops,
            selection.total_fees
        );

        selection
    }
}

/// Signature operations hidden in the redeem scripts of P2SH inputs.
fn p2sh_sigop_count(view: &mut CoinViewCache<'_>, tx: &Transaction) -> u32 {
    tx.inputs
        .iter()
        .filter_map(|input| {
            view.prev_output(&input.prevout)
                .filter(|out| out.script_pubkey.is_pay_to_script_hash())
                .map(|out| out.script_pubkey.p2sh_sigop_count(&input.script_sig))
        })
        .sum()
}
