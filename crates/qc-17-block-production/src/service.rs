//! Mining worker pool
//!
//! [`MinerService`] runs the orchestrator's search loop on a group of
//! blocking tasks and exposes start/stop/status through [`MinerControl`].

use crate::domain::WorkerExit;
use crate::error::{BlockProductionError, Result};
use crate::orchestrator::MiningOrchestrator;
use crate::ports::{MinerControl, MiningStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::H256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Starts and stops mining workers
pub struct MinerService {
    /// Shared by every worker
    orchestrator: Arc<MiningOrchestrator>,

    /// One handle per spawned worker
    handles: Mutex<Vec<JoinHandle<Result<WorkerExit>>>>,

    /// Whether `start` has been called without a matching `stop`
    is_active: AtomicBool,
}

impl MinerService {
    /// Service driving `orchestrator`
    pub fn new(orchestrator: Arc<MiningOrchestrator>) -> Self {
        Self {
            orchestrator,
            handles: Mutex::new(Vec::new()),
            is_active: AtomicBool::new(false),
        }
    }

    /// The orchestrator, for wiring tip notifications
    pub fn orchestrator(&self) -> &Arc<MiningOrchestrator> {
        &self.orchestrator
    }

    fn workers_running(&self) -> bool {
        self.handles.lock().iter().any(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl MinerControl for MinerService {
    async fn start(&self) -> Result<usize> {
        if self.is_active.swap(true, Ordering::SeqCst) {
            return Err(BlockProductionError::AlreadyRunning);
        }
        self.orchestrator.resume();

        let config = self.orchestrator.config();
        let worker_count = config.resolved_worker_count();
        info!("[qc-17] Starting block production");
        info!("  Workers: {}", worker_count);
        info!("  Search strategy: {}", config.search_strategy);

        let mut handles = self.handles.lock();
        for worker_id in 0..worker_count {
            let orchestrator = Arc::clone(&self.orchestrator);
            handles.push(tokio::task::spawn_blocking(move || {
                let _span = quantum_telemetry::subsystem_span!(
                    "mining_worker",
                    subsystem = "qc-17",
                    worker_id = worker_id
                )
                .entered();
                orchestrator.run_search_loop(worker_id)
            }));
        }
        Ok(worker_count)
    }

    /// Stop all workers and wait for them.
    ///
    /// Every worker is joined even when one failed; the first critical
    /// failure is returned.
    async fn stop(&self) -> Result<()> {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return Err(BlockProductionError::NotActive);
        }
        info!("[qc-17] Stopping block production");
        self.orchestrator.shutdown();

        let handles = std::mem::take(&mut *self.handles.lock());
        let mut first_critical = None;
        for (worker_id, handle) in handles.into_iter().enumerate() {
            let err = match handle.await {
                Ok(Ok(exit)) => {
                    debug!(worker_id, ?exit, "[qc-17] Worker joined");
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join) => BlockProductionError::InternalError(format!(
                    "worker {} task failed: {}",
                    worker_id, join
                )),
            };
            if err.is_critical() {
                error!(worker_id, error = %err, "[qc-17] Worker failed");
                first_critical.get_or_insert(err);
            } else {
                warn!(worker_id, error = %err, "[qc-17] Worker ended with error");
            }
        }
        info!("[qc-17] Mining stopped");
        first_critical.map_or(Ok(()), Err)
    }

    async fn status(&self) -> MiningStatus {
        let metrics = self.orchestrator.metrics();
        MiningStatus {
            active: self.is_active.load(Ordering::SeqCst) && self.workers_running(),
            workers: self.orchestrator.worker_states(),
            templates_built: metrics.get_templates_built(),
            blocks_found: metrics.get_blocks_found(),
            blocks_accepted: metrics.get_blocks_accepted(),
            solution_target_checks: metrics.get_solution_target_checks(),
        }
    }

    async fn notify_tip_changed(&self, new_tip: H256) {
        self.orchestrator.notify_tip_changed(new_tip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        AcceptAllScripts, AcceptAllValidator, FixedPeers, InMemoryChain, InMemoryPool,
        RecordingAcceptance, StaticKeyManager,
    };
    use crate::config::{ConsensusParams, MinerConfig};
    use crate::domain::{SearchInput, SearchOutcome, SearchStrategyKind};
    use crate::ports::{Collaborators, PowSearchStrategy, SearchStrategyError};
    use shared_types::{Block, BlockHeader, OutPoint, Script, Transaction, TxIn, TxOut, COIN};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const EASY_BITS: u32 = 0x207f_ffff;

    struct Fixture {
        chain: Arc<InMemoryChain>,
        acceptance: Arc<RecordingAcceptance>,
        service: MinerService,
    }

    fn fixture(workers: i32, params: ConsensusParams) -> Fixture {
        let mut genesis = Block {
            header: BlockHeader {
                version: 4,
                time: 1_700_000_000,
                bits: EASY_BITS,
                ..Default::default()
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxIn::new(OutPoint::null(), Script::new().push_int(0))],
                outputs: vec![TxOut {
                    value: 50 * COIN,
                    script_pubkey: Script::new(),
                }],
                lock_time: 0,
            }],
        };
        genesis.header.merkle_root = genesis.merkle_root();

        let chain = Arc::new(InMemoryChain::new(&genesis).with_next_bits(EASY_BITS));
        let pool = Arc::new(InMemoryPool::new());
        let acceptance =
            Arc::new(RecordingAcceptance::new(Arc::clone(&chain)).with_pool(Arc::clone(&pool)));
        let collaborators = Collaborators {
            chain: chain.clone(),
            pool,
            keys: Arc::new(StaticKeyManager::new(Script::pay_to_pubkey_hash(&[7; 20]))),
            acceptance: acceptance.clone(),
            validator: Arc::new(AcceptAllValidator),
            peers: Arc::new(FixedPeers::new(1)),
            scripts: Arc::new(AcceptAllScripts),
        };
        let config = MinerConfig {
            worker_count: workers,
            attempts_per_nonce: 32,
            cancel_poll_interval: 4,
            retry_delay_ms: 10,
            ..MinerConfig::default()
        };

        let orchestrator = Arc::new(MiningOrchestrator::new(config, params, collaborators).unwrap());
        let weak = Arc::downgrade(&orchestrator);
        chain.subscribe(move |hash| {
            if let Some(orchestrator) = weak.upgrade() {
                orchestrator.notify_tip_changed(hash);
            }
        });

        Fixture {
            chain,
            acceptance,
            service: MinerService::new(orchestrator),
        }
    }

    fn continuous() -> ConsensusParams {
        ConsensusParams {
            mine_blocks_on_demand: false,
            ..ConsensusParams::regtest()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_mine_stop() {
        let f = fixture(2, continuous());

        assert_eq!(assert_ok!(f.service.start().await), 2);
        assert!(matches!(
            f.service.start().await,
            Err(BlockProductionError::AlreadyRunning)
        ));

        for _ in 0..500 {
            if f.chain.height() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let running = f.service.status().await;
        assert!(running.active);

        assert_ok!(f.service.stop().await);

        let status = f.service.status().await;
        assert!(!status.active);
        assert!(status.workers.is_empty());
        assert!(f.chain.height() >= 3);
        assert_eq!(status.blocks_accepted as usize, f.acceptance.accepted().len());
        assert!(status.templates_built >= 3);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let f = fixture(1, continuous());
        let err = assert_err!(f.service.stop().await);
        assert!(matches!(err, BlockProductionError::NotActive));
    }

    struct PanickingStrategy;

    impl PowSearchStrategy for PanickingStrategy {
        fn kind(&self) -> SearchStrategyKind {
            SearchStrategyKind::Default
        }

        fn run(
            &self,
            _input: &SearchInput,
            _on_candidate: &mut dyn FnMut(&[u8]) -> bool,
            _is_cancelled: &dyn Fn() -> bool,
        ) -> std::result::Result<SearchOutcome, SearchStrategyError> {
            panic!("solver crashed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_reports_panicked_worker() {
        let f = fixture(1, continuous());
        let orchestrator = Arc::try_unwrap(f.service.orchestrator)
            .ok()
            .unwrap()
            .with_strategy(Arc::new(PanickingStrategy));
        let service = MinerService::new(Arc::new(orchestrator));

        assert_ok!(service.start().await);
        for _ in 0..500 {
            if !service.status().await.active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = assert_err!(service.stop().await);
        assert!(matches!(err, BlockProductionError::InternalError(ref msg) if msg.contains("worker 0")));
        assert!(err.is_critical());
        let status = service.status().await;
        assert!(!status.active);
        assert!(status.workers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_on_demand_workers_exit_after_one_block() {
        let f = fixture(1, ConsensusParams::regtest());

        assert_ok!(f.service.start().await);
        for _ in 0..500 {
            if !f.service.status().await.active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!f.service.status().await.active);
        assert_eq!(f.chain.height(), 1);
        assert_ok!(f.service.stop().await);

        // Restartable after a stop.
        assert_ok!(f.service.start().await);
        assert_ok!(f.service.stop().await);
    }
}
