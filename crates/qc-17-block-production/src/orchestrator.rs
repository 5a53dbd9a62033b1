//! Mining orchestrator
//!
//! Owns template building and the per-worker search loop:
//!
//! ```text
//!  WaitingForPeers ──► BuildingTemplate ──► Searching ──┬─► Found ─────────┐
//!         ▲                   ▲                         ├─► StaleRestart ──┤
//!         │                   │                         ├─► TimedRebuild ──┤
//!         │                   │                         └─► Cancelled ─────┤
//!         │                   └────────────────────────────────────────────┘
//!         └──────────── no peers while peers are required
//! ```
//!
//! Workers share one orchestrator behind an `Arc` and run on blocking
//! threads. Chain access happens only while building a template and during
//! the restart checks between strategy runs; nothing is locked while a
//! strategy searches.

use crate::adapters::build_strategy;
use crate::config::{ConsensusParams, MinerConfig};
use crate::domain::{
    block_time, check_template, describe_difficulty, randomize_nonce, resolve_payout_script,
    target_from_compact, BlockTemplate, CancellationToken, ChainTip, CoinbaseAssembler,
    ExtraNonce, MinerState, SearchInput, SearchOutcome, SearchState, SelectionLimits,
    TransactionSelector, WorkerExit,
};
use crate::error::{BlockProductionError, Result};
use crate::metrics::Metrics;
use crate::ports::{
    Collaborators, MiningApi, PowSearchStrategy, SubmitResult, WorkerStatus,
};
use crate::utils::meets_target;
use parking_lot::Mutex;
use primitive_types::H256;
use shared_types::{BlockHeader, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often a waiting worker re-checks peers and sync state.
const PEER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep granularity while waiting, so shutdown is seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Registry entry for one running worker
struct WorkerSlot {
    token: CancellationToken,
    state: MinerState,
}

/// Drops a worker's registry entry when its loop ends, unwinding included.
struct Registration<'a> {
    workers: &'a Mutex<HashMap<usize, WorkerSlot>>,
    worker_id: usize,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.workers.lock().remove(&self.worker_id);
    }
}

/// State owned by a worker's own stack frame
struct WorkerState {
    id: usize,
    token: CancellationToken,
    extra_nonce: ExtraNonce,
    consecutive_failures: u32,
    mining_since: Instant,
}

/// What the search phase asks the worker loop to do next
enum SearchEnd {
    Rebuild,
    Exit(WorkerExit),
}

/// Block template builder and mining control loop
pub struct MiningOrchestrator {
    config: MinerConfig,
    params: ConsensusParams,
    payout_override: Option<Script>,
    selector: TransactionSelector,
    assembler: CoinbaseAssembler,
    collaborators: Collaborators,
    strategy: Arc<dyn PowSearchStrategy>,
    metrics: Arc<Metrics>,
    workers: Mutex<HashMap<usize, WorkerSlot>>,
    shutdown: AtomicBool,
}

impl MiningOrchestrator {
    /// Validate `config` and resolve the search strategy it names.
    pub fn new(
        config: MinerConfig,
        params: ConsensusParams,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let payout_override = config.payout_override_script()?;
        let limits = SelectionLimits::from_config(&config, &params);
        let strategy = build_strategy(config.search_strategy, &config);

        info!(
            strategy = %config.search_strategy,
            max_block_size = limits.max_block_size,
            max_priority_size = limits.max_priority_size,
            min_block_size = limits.min_block_size,
            "[qc-17] Mining orchestrator configured"
        );

        Ok(Self {
            assembler: CoinbaseAssembler::new(params.subsidy)
                .with_flags(config.coinbase_flags.as_bytes()),
            selector: TransactionSelector::new(limits),
            config,
            params,
            payout_override,
            collaborators,
            strategy,
            metrics: Arc::new(Metrics::new()),
            workers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Replace the configured search strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn PowSearchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shared metrics
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Policy configuration
    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Phase of every registered worker, ordered by id
    pub fn worker_states(&self) -> Vec<WorkerStatus> {
        let mut states: Vec<WorkerStatus> = self
            .workers
            .lock()
            .iter()
            .map(|(&worker_id, slot)| WorkerStatus {
                worker_id,
                state: slot.state,
            })
            .collect();
        states.sort_by_key(|status| status.worker_id);
        states
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stop every worker at its next check.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for slot in self.workers.lock().values() {
            slot.token.cancel();
        }
        info!("[qc-17] Mining shutdown requested");
    }

    /// Clear a previous shutdown so workers can be started again.
    pub fn resume(&self) {
        self.shutdown.store(false, Ordering::Relaxed);
    }

    /// Cancel every in-flight search; each worker rebuilds on the new tip.
    pub fn notify_tip_changed(&self, new_tip: H256) {
        let workers = self.workers.lock();
        debug!(
            ?new_tip,
            workers = workers.len(),
            "[qc-17] Chain tip changed, cancelling searches"
        );
        for slot in workers.values() {
            slot.token.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Template building
    // ------------------------------------------------------------------------

    /// Build a finalized template paying `payout`.
    ///
    /// The coinbase carries `OP_0` in place of the extra nonce. Retries
    /// whenever the tip moves between the snapshot and finalization.
    pub fn build_template(&self, payout: &Script) -> Result<BlockTemplate> {
        self.build_on_tip(payout).map(|(template, _)| template)
    }

    #[tracing::instrument(skip(self, payout), fields(height = tracing::field::Empty))]
    fn build_on_tip(&self, payout: &Script) -> Result<(BlockTemplate, ChainTip)> {
        let chain = &self.collaborators.chain;
        loop {
            if self.is_shutdown() {
                return Err(BlockProductionError::NotActive);
            }

            let snapshot = chain.snapshot();
            let tip = snapshot.tip;
            let height = tip.height + 1;
            tracing::Span::current().record("height", height);

            let lock_cutoff = if self.params.locktime_median_time_past {
                tip.median_time_past
            } else {
                chain.adjusted_time()
            };

            let selection = self.selector.select(
                &snapshot,
                lock_cutoff,
                self.collaborators.pool.as_ref(),
                self.collaborators.scripts.as_ref(),
            );
            let coinbase = self
                .assembler
                .assemble(height, selection.total_fees, payout, None)?;
            let mut template = BlockTemplate::new(height, coinbase, selection);

            let current = chain.tip();
            if current.hash != tip.hash {
                warn!(
                    built_on = ?tip.hash,
                    tip = ?current.hash,
                    "[qc-17] Chain tip moved while building template, retrying"
                );
                continue;
            }

            if !template.pool_faults.is_empty() {
                self.metrics
                    .record_pool_faults(template.pool_faults.len() as u64);
            }

            self.finalize_header(&mut template, &tip);
            if target_from_compact(template.block.header.bits).is_none() {
                return Err(unusable_bits(template.block.header.bits));
            }
            check_template(&template, self.selector.limits(), self.assembler.schedule())?;
            self.collaborators
                .validator
                .test_block_validity(&template.block, &tip)
                .map_err(BlockProductionError::TemplateInvalid)?;

            debug!(
                height,
                transactions = template.selected().len(),
                size = template.total_size,
                sigops = template.total_sigops,
                fees = template.total_fees,
                pool_faults = template.pool_faults.len(),
                "[qc-17] Template built"
            );
            return Ok((template, tip));
        }
    }

    fn finalize_header(&self, template: &mut BlockTemplate, tip: &ChainTip) {
        let chain = &self.collaborators.chain;
        let header = &mut template.block.header;

        header.version = match self.config.block_version_override {
            Some(version) if self.params.mine_blocks_on_demand => version,
            _ => chain.block_version(tip),
        };
        header.prev_block = tip.hash;
        header.reserved = H256::zero();
        header.time = block_time(tip, chain.adjusted_time());
        header.bits = chain.next_work_required(tip, header.time);
        header.nonce = randomize_nonce(&mut rand::thread_rng());
        header.solution.clear();

        template.tx_sigops[0] = template.coinbase().legacy_sigop_count();
        template.refresh_merkle_root();
    }

    /// Move the header time forward to `max(mtp + 1, adjusted time)`.
    ///
    /// Bits follow the new time only where difficulty may drop with it.
    fn update_time(&self, header: &mut BlockHeader, tip: &ChainTip) {
        let chain = &self.collaborators.chain;
        let new_time = block_time(tip, chain.adjusted_time());
        if header.time < new_time {
            header.time = new_time;
        }
        if self.params.pow_allow_min_difficulty_blocks {
            header.bits = chain.next_work_required(tip, header.time);
        }
    }

    // ------------------------------------------------------------------------
    // Worker loop
    // ------------------------------------------------------------------------

    /// Run one worker until shutdown, an on-demand stop, or a fatal error.
    pub fn run_search_loop(&self, worker_id: usize) -> Result<WorkerExit> {
        let token = self.register_worker(worker_id);
        let _registration = Registration {
            workers: &self.workers,
            worker_id,
        };
        let mut worker = WorkerState {
            id: worker_id,
            token,
            extra_nonce: ExtraNonce::default(),
            consecutive_failures: 0,
            mining_since: Instant::now(),
        };
        info!(
            worker_id,
            strategy = %self.strategy.kind(),
            "[qc-17] Mining worker started"
        );

        let result = self.worker_loop(&mut worker);

        self.metrics
            .record_mining_time(worker.mining_since.elapsed().as_millis() as u64);
        match &result {
            Ok(exit) => info!(worker_id, ?exit, "[qc-17] Mining worker stopped"),
            Err(e) => error!(worker_id, error = %e, "[qc-17] Mining worker terminated"),
        }
        result
    }

    fn worker_loop(&self, worker: &mut WorkerState) -> Result<WorkerExit> {
        loop {
            if self.is_shutdown() {
                return Ok(WorkerExit::Shutdown);
            }

            if !self.ready_to_mine() {
                self.metrics
                    .record_mining_time(worker.mining_since.elapsed().as_millis() as u64);
                if !self.wait_for_peers(worker.id) {
                    return Ok(WorkerExit::Shutdown);
                }
                worker.mining_since = Instant::now();
            }

            self.set_state(worker.id, MinerState::BuildingTemplate);
            worker.token.reset();
            let pool_generation = self.collaborators.pool.transactions_updated();

            let payout = match resolve_payout_script(
                self.payout_override.as_ref(),
                self.collaborators.keys.as_ref(),
            ) {
                Ok(script) => script,
                Err(e) => {
                    warn!(worker_id = worker.id, error = %e, "[qc-17] Cannot mine without a payout script");
                    self.pause(self.config.retry_delay());
                    continue;
                }
            };

            let (mut template, tip) = match self.prepare_template(worker, &payout) {
                Ok(prepared) => {
                    worker.consecutive_failures = 0;
                    prepared
                }
                Err(BlockProductionError::NotActive) => return Ok(WorkerExit::Shutdown),
                Err(e @ BlockProductionError::TemplateInvalid(_)) => {
                    self.metrics.record_template_failure();
                    worker.consecutive_failures += 1;
                    error!(
                        worker_id = worker.id,
                        failures = worker.consecutive_failures,
                        error = %e,
                        "[qc-17] Template failed validity check"
                    );
                    if worker.consecutive_failures >= self.config.max_consecutive_template_failures {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(worker_id = worker.id, error = %e, "[qc-17] Template build failed, retrying");
                    self.pause(self.config.retry_delay());
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.metrics.record_template_built(
                template.selected().len() as u64,
                template.total_size as u64,
            );
            info!(
                worker_id = worker.id,
                height = template.height,
                "[qc-17] Running miner with {} transactions in block ({} bytes)",
                template.selected().len(),
                template.total_size
            );

            match self.search(worker, &mut template, &tip, pool_generation, &payout) {
                Ok(SearchEnd::Rebuild) => {}
                Ok(SearchEnd::Exit(exit)) => return Ok(exit),
                Err(BlockProductionError::SearchCancelled) => {
                    debug!(worker_id = worker.id, "[qc-17] Search cancelled, rebuilding");
                }
                Err(e) if e.is_recoverable() => {
                    warn!(worker_id = worker.id, error = %e, "[qc-17] Search abandoned, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Build a template and stamp this worker's extra nonce into it.
    fn prepare_template(
        &self,
        worker: &mut WorkerState,
        payout: &Script,
    ) -> Result<(BlockTemplate, ChainTip)> {
        let (mut template, tip) = self.build_on_tip(payout)?;
        let extra_nonce = worker.extra_nonce.next(template.block.header.prev_block);
        let script_sig = self.assembler.script_sig(template.height, Some(extra_nonce))?;
        template.set_coinbase_script(script_sig);
        Ok((template, tip))
    }

    /// Search `template` nonce by nonce until a restart condition fires.
    ///
    /// Cancellation and strategy faults come back as recoverable errors.
    fn search(
        &self,
        worker: &mut WorkerState,
        template: &mut BlockTemplate,
        tip: &ChainTip,
        pool_generation: u64,
        payout: &Script,
    ) -> Result<SearchEnd> {
        self.set_state(worker.id, MinerState::Searching);

        let bits = template.block.header.bits;
        let target = target_from_compact(bits).ok_or_else(|| unusable_bits(bits))?;
        let mut state = SearchState::new(&template.block.header.nonce, target, pool_generation);

        loop {
            let input = SearchInput {
                preimage: template.block.header.preimage_bytes(),
                nonce: template.block.header.nonce,
            };
            let target = state.target;
            let token = &worker.token;
            let mut stop_on_demand = false;

            self.metrics.record_solver_run();
            let outcome = {
                let mut on_candidate = |witness: &[u8]| -> bool {
                    template.block.header.solution = witness.to_vec();
                    self.metrics.record_target_check();
                    let hash = template.block.header.hash();
                    if !meets_target(&hash, target) {
                        return false;
                    }
                    self.process_found_block(worker.id, &*template, hash, target, token, payout, &state);
                    stop_on_demand = self.params.mine_blocks_on_demand;
                    true
                };
                self.strategy
                    .run(&input, &mut on_candidate, &|| token.is_cancelled())
            };

            match outcome {
                Ok(SearchOutcome::Found(_)) => {
                    if stop_on_demand {
                        return Ok(SearchEnd::Exit(WorkerExit::BlockFoundOnDemand));
                    }
                    return Ok(SearchEnd::Rebuild);
                }
                Ok(SearchOutcome::Cancelled) => {
                    worker.token.reset();
                    self.metrics.record_cancellation();
                    return Err(BlockProductionError::SearchCancelled);
                }
                Ok(SearchOutcome::Exhausted) => {}
                Err(e) => {
                    self.metrics.record_strategy_fault();
                    return Err(e.into());
                }
            }

            if self.is_shutdown() {
                return Ok(SearchEnd::Exit(WorkerExit::Shutdown));
            }
            if !self.ready_to_mine() {
                debug!(worker_id = worker.id, "[qc-17] Lost peers, pausing search");
                return Ok(SearchEnd::Rebuild);
            }
            if state.low_bits_exhausted() {
                debug!(worker_id = worker.id, "[qc-17] Nonce space exhausted, rebuilding");
                return Ok(SearchEnd::Rebuild);
            }
            if self.collaborators.pool.transactions_updated() != state.pool_generation
                && state.elapsed() > self.config.template_refresh_interval()
            {
                debug!(worker_id = worker.id, "[qc-17] Pool changed, refreshing template");
                return Ok(SearchEnd::Rebuild);
            }
            if self.collaborators.chain.tip().hash != template.block.header.prev_block {
                debug!(worker_id = worker.id, "[qc-17] Tip moved, restarting on new tip");
                return Ok(SearchEnd::Rebuild);
            }

            template.block.header.nonce = state.advance();
            self.update_time(&mut template.block.header, tip);
            if self.params.pow_allow_min_difficulty_blocks {
                let bits = template.block.header.bits;
                state.target = target_from_compact(bits).ok_or_else(|| unusable_bits(bits))?;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_found_block(
        &self,
        worker_id: usize,
        template: &BlockTemplate,
        hash: H256,
        target: primitive_types::U256,
        token: &CancellationToken,
        payout: &Script,
        state: &SearchState,
    ) {
        self.metrics.record_block_found();
        let height = template.height;
        let block_hash = hex::encode(hash.as_bytes());
        quantum_telemetry::log_block_event!(
            info,
            "qc-17",
            "[qc-17] Proof-of-work solution found",
            height,
            block_hash,
            worker_id = worker_id,
            transactions = template.selected().len()
        );

        let prev_block = template.block.header.prev_block;
        let live_tip = self.collaborators.chain.tip();
        if live_tip.hash != prev_block {
            self.metrics.record_block_stale();
            let stale = BlockProductionError::Stale {
                expected: prev_block,
                actual: live_tip.hash,
            };
            warn!(worker_id, height, error = %stale, "[qc-17] Generated block is stale");
            return;
        }

        match self.collaborators.acceptance.submit(&template.block) {
            SubmitResult::Accepted => {
                token.reset();
                if self.payout_override.is_none() {
                    self.collaborators.keys.keep_payout_script(payout);
                }
                self.metrics.record_block_accepted();

                let event = serde_json::json!({
                    "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    "subsystem_id": "qc-17",
                    "event_type": "BlockProduced",
                    "correlation_id": uuid::Uuid::new_v4().to_string(),
                    "block_hash": block_hash,
                    "block_height": height,
                    "processing_time_ms": state.elapsed().as_millis() as u64,
                    "metadata": {
                        "worker_id": worker_id,
                        "nonce": hex::encode(template.block.header.nonce.as_bytes()),
                        "bits": format!("{:#010x}", template.block.header.bits),
                        "difficulty_target": describe_difficulty(target),
                        "strategy": self.strategy.kind().to_string(),
                        "template": template.summary(),
                    }
                });
                info!("EVENT_FLOW_JSON {}", event);
            }
            SubmitResult::Stale => {
                self.metrics.record_block_stale();
                warn!(worker_id, height, "[qc-17] Block acceptance reported stale block");
            }
            SubmitResult::Invalid(reason) => {
                self.metrics.record_block_rejected();
                warn!(worker_id, height, %reason, "[qc-17] Generated block was not accepted");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Worker bookkeeping
    // ------------------------------------------------------------------------

    fn register_worker(&self, worker_id: usize) -> CancellationToken {
        let token = CancellationToken::new();
        self.workers.lock().insert(
            worker_id,
            WorkerSlot {
                token: token.clone(),
                state: MinerState::BuildingTemplate,
            },
        );
        token
    }

    fn set_state(&self, worker_id: usize, state: MinerState) {
        if let Some(slot) = self.workers.lock().get_mut(&worker_id) {
            slot.state = state;
        }
    }

    /// Peers are connected and sync has finished, where either matters.
    fn ready_to_mine(&self) -> bool {
        if !self.params.mining_requires_peers {
            return true;
        }
        self.collaborators.peers.peer_count() > 0
            && (self.params.mine_during_initial_sync
                || !self.collaborators.chain.is_initial_sync())
    }

    /// Block until ready to mine. Returns `false` on shutdown.
    fn wait_for_peers(&self, worker_id: usize) -> bool {
        self.set_state(worker_id, MinerState::WaitingForPeers);
        debug!(worker_id, "[qc-17] Waiting for peers");
        loop {
            if self.is_shutdown() {
                return false;
            }
            if self.ready_to_mine() {
                return true;
            }
            self.pause(PEER_POLL_INTERVAL);
        }
    }

    /// Sleep for `duration`, waking early on shutdown.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// The chain handed out bits that decode to no usable target.
fn unusable_bits(bits: u32) -> BlockProductionError {
    BlockProductionError::ChainUnavailable(format!(
        "bits {:#010x} do not encode a usable target",
        bits
    ))
}

impl MiningApi for MiningOrchestrator {
    fn build_template(&self, payout: &Script) -> Result<BlockTemplate> {
        MiningOrchestrator::build_template(self, payout)
    }

    fn run_search_loop(&self, worker_id: usize) -> Result<WorkerExit> {
        MiningOrchestrator::run_search_loop(self, worker_id)
    }

    fn notify_tip_changed(&self, new_tip: H256) {
        MiningOrchestrator::notify_tip_changed(self, new_tip)
    }

    fn shutdown(&self) {
        MiningOrchestrator::shutdown(self)
    }
}
