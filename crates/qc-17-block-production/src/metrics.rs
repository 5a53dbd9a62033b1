//! Metrics collection for block production subsystem

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for block production
#[derive(Debug, Default)]
pub struct Metrics {
    /// Templates built and handed to a search strategy
    pub templates_built: AtomicU64,

    /// Non-coinbase transactions placed in built templates
    pub transactions_selected: AtomicU64,

    /// Invocations of a search strategy
    pub solver_runs: AtomicU64,

    /// Candidate witnesses checked against the target
    pub solution_target_checks: AtomicU64,

    /// Headers found that met the target
    pub blocks_found: AtomicU64,

    /// Found blocks accepted by the chain
    pub blocks_accepted: AtomicU64,

    /// Found blocks dropped because the tip moved
    pub blocks_stale: AtomicU64,

    /// Found blocks the chain rejected
    pub blocks_rejected: AtomicU64,

    /// Searches that ended on a cancellation signal
    pub search_cancellations: AtomicU64,

    /// Internal faults reported by a search strategy
    pub strategy_faults: AtomicU64,

    /// Pool transactions spending outputs nobody knows about
    pub pool_consistency_faults: AtomicU64,

    /// Template builds rejected by the validity check
    pub template_failures: AtomicU64,

    /// Total time spent mining (milliseconds)
    pub mining_time_ms: AtomicU64,

    /// Size of the most recent template (bytes)
    pub last_template_size: AtomicU64,

    /// Transaction count of the most recent template, coinbase excluded
    pub last_template_tx_count: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a template ready for search
    pub fn record_template_built(&self, tx_count: u64, size: u64) {
        self.templates_built.fetch_add(1, Ordering::Relaxed);
        self.transactions_selected
            .fetch_add(tx_count, Ordering::Relaxed);
        self.last_template_size.store(size, Ordering::Relaxed);
        self.last_template_tx_count
            .store(tx_count, Ordering::Relaxed);
    }

    /// Record one strategy invocation
    pub fn record_solver_run(&self) {
        self.solver_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one candidate witness checked against the target
    pub fn record_target_check(&self) {
        self.solution_target_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a header meeting the target
    pub fn record_block_found(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted block
    pub fn record_block_accepted(&self) {
        self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale block
    pub fn record_block_stale(&self) {
        self.blocks_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected block
    pub fn record_block_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled search
    pub fn record_cancellation(&self) {
        self.search_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a strategy fault
    pub fn record_strategy_fault(&self) {
        self.strategy_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record pool consistency faults seen during one selection
    pub fn record_pool_faults(&self, count: u64) {
        self.pool_consistency_faults
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record a failed template validity check
    pub fn record_template_failure(&self) {
        self.template_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record PoW mining time
    pub fn record_mining_time(&self, duration_ms: u64) {
        self.mining_time_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Get templates built
    pub fn get_templates_built(&self) -> u64 {
        self.templates_built.load(Ordering::Relaxed)
    }

    /// Get blocks found
    pub fn get_blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    /// Get blocks accepted
    pub fn get_blocks_accepted(&self) -> u64 {
        self.blocks_accepted.load(Ordering::Relaxed)
    }

    /// Get solution target checks
    pub fn get_solution_target_checks(&self) -> u64 {
        self.solution_target_checks.load(Ordering::Relaxed)
    }

    /// Get cancelled searches
    pub fn get_search_cancellations(&self) -> u64 {
        self.search_cancellations.load(Ordering::Relaxed)
    }

    /// Get average transactions per built template
    pub fn get_avg_transactions_per_template(&self) -> f64 {
        let templates = self.templates_built.load(Ordering::Relaxed);
        if templates == 0 {
            return 0.0;
        }
        let txs = self.transactions_selected.load(Ordering::Relaxed);
        txs as f64 / templates as f64
    }

    /// Fraction of found blocks the chain accepted
    pub fn get_acceptance_ratio(&self) -> f64 {
        let found = self.blocks_found.load(Ordering::Relaxed);
        if found == 0 {
            return 0.0;
        }
        self.blocks_accepted.load(Ordering::Relaxed) as f64 / found as f64
    }
}
