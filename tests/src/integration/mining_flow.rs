//! # Mining Flow
//!
//! Drives `MinerService` end to end on a regtest-style network:
//!
//! 1. **Pool → Template → Block**: pending transactions, including a child
//!    listed before its parent, are mined in dependency order and leave the
//!    pool once their block connects.
//! 2. **Strategy selection**: the batch strategy mines through the same loop.
//! 3. **Tip change**: a block connected by someone else cancels the running
//!    searches without anything being submitted.

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use primitive_types::H256;
    use qc_17_block_production::adapters::memory::{
        AcceptAllScripts, AcceptAllValidator, FixedPeers, InMemoryChain, InMemoryPool,
        RecordingAcceptance, StaticKeyManager,
    };
    use qc_17_block_production::domain::target_from_compact;
    use qc_17_block_production::utils::meets_target;
    use qc_17_block_production::{
        BlockAcceptance, Collaborators, ConsensusParams, MinerConfig, MinerControl,
        MinerService, MiningOrchestrator, SearchStrategyKind, SubmitResult,
    };
    use quantum_telemetry::{init_logging, TelemetryConfig};
    use shared_types::{Block, BlockHeader, OutPoint, Script, Transaction, TxIn, TxOut, COIN};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const EASY_BITS: u32 = 0x207f_ffff;
    const HARD_BITS: u32 = 0x0300_0001;
    const GENESIS_TIME: u32 = 1_700_000_000;

    fn payout() -> Script {
        Script::pay_to_pubkey_hash(&[0x17; 20])
    }

    fn spend(prev: &Transaction, value: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::new(prev.txid(), 0), Script::new())],
            outputs: vec![TxOut {
                value,
                script_pubkey: Script::new(),
            }],
            lock_time: 0,
        }
    }

    /// Block on `prev` ground until it meets the easy target.
    fn solved_block(prev: H256, tag: i64, time: u32) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: 4,
                prev_block: prev,
                time,
                bits: EASY_BITS,
                ..Default::default()
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxIn::new(OutPoint::null(), Script::new().push_int(tag))],
                outputs: vec![TxOut {
                    value: 50 * COIN,
                    script_pubkey: Script::new(),
                }],
                lock_time: 0,
            }],
        };
        block.header.merkle_root = block.merkle_root();
        let target = target_from_compact(EASY_BITS).unwrap();
        let mut counter = 0u32;
        while !meets_target(&block.hash(), target) {
            counter += 1;
            block.header.solution = counter.to_le_bytes().to_vec();
        }
        block
    }

    /// Keeps full copies of submitted blocks.
    struct CapturingAcceptance {
        inner: RecordingAcceptance,
        blocks: Mutex<Vec<Block>>,
    }

    impl BlockAcceptance for CapturingAcceptance {
        fn submit(&self, block: &Block) -> SubmitResult {
            let result = self.inner.submit(block);
            if result == SubmitResult::Accepted {
                self.blocks.lock().push(block.clone());
            }
            result
        }
    }

    struct Node {
        genesis: Block,
        chain: Arc<InMemoryChain>,
        pool: Arc<InMemoryPool>,
        keys: Arc<StaticKeyManager>,
        acceptance: Arc<CapturingAcceptance>,
        service: MinerService,
    }

    fn node(config: MinerConfig, params: ConsensusParams, next_bits: u32, pending: &[Transaction]) -> Node {
        let genesis = solved_block(H256::zero(), 0, GENESIS_TIME);
        let chain = Arc::new(InMemoryChain::new(&genesis).with_next_bits(next_bits));
        let pool = Arc::new(InMemoryPool::new());
        for tx in pending {
            pool.add(tx.clone());
        }
        let keys = Arc::new(StaticKeyManager::new(payout()));
        let acceptance = Arc::new(CapturingAcceptance {
            inner: RecordingAcceptance::new(Arc::clone(&chain)).with_pool(Arc::clone(&pool)),
            blocks: Mutex::new(Vec::new()),
        });

        let collaborators = Collaborators {
            chain: chain.clone(),
            pool: pool.clone(),
            keys: keys.clone(),
            acceptance: acceptance.clone(),
            validator: Arc::new(AcceptAllValidator),
            peers: Arc::new(FixedPeers::new(0)),
            scripts: Arc::new(AcceptAllScripts),
        };
        let orchestrator =
            Arc::new(MiningOrchestrator::new(config, params, collaborators).unwrap());

        let weak = Arc::downgrade(&orchestrator);
        chain.subscribe(move |hash| {
            if let Some(orchestrator) = weak.upgrade() {
                orchestrator.notify_tip_changed(hash);
            }
        });

        Node {
            genesis,
            chain,
            pool,
            keys,
            acceptance,
            service: MinerService::new(orchestrator),
        }
    }

    fn miner_config(strategy: SearchStrategyKind) -> MinerConfig {
        MinerConfig {
            worker_count: 1,
            search_strategy: strategy,
            attempts_per_nonce: 32,
            cancel_poll_interval: 4,
            retry_delay_ms: 10,
            ..MinerConfig::default()
        }
    }

    fn continuous_regtest() -> ConsensusParams {
        ConsensusParams {
            mine_blocks_on_demand: false,
            ..ConsensusParams::regtest()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..1_000 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    /// Pending parent and child are mined in one block, parent first.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_transactions_mined_in_dependency_order() {
        let _ = init_logging(
            &TelemetryConfig::default()
                .with_log_level("warn")
                .on_network("regtest"),
        );

        let genesis_coinbase = solved_block(H256::zero(), 0, GENESIS_TIME).transactions[0].clone();
        let parent = spend(&genesis_coinbase, 49 * COIN);
        let child = spend(&parent, 48 * COIN);
        // Child first in pool order.
        let node = node(
            miner_config(SearchStrategyKind::Default),
            continuous_regtest(),
            EASY_BITS,
            &[child.clone(), parent.clone()],
        );
        assert_eq!(node.genesis.transactions[0], genesis_coinbase);

        assert_ok!(node.service.start().await);
        let chain = Arc::clone(&node.chain);
        assert!(wait_until(|| chain.height() >= 3).await);
        assert_ok!(node.service.stop().await);

        let blocks = node.acceptance.blocks.lock().clone();
        assert!(blocks.len() >= 3);
        let first = &blocks[0];
        assert_eq!(first.header.prev_block, node.genesis.hash());
        assert_eq!(first.transactions[1..].to_vec(), vec![parent, child]);

        let subsidy = ConsensusParams::regtest().subsidy.subsidy(1);
        let coinbase = &first.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.outputs[0].value, subsidy + 2 * COIN);
        assert_eq!(coinbase.outputs[0].script_pubkey, payout());

        // Later blocks only carry their coinbase and extend each other.
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.prev_block, pair[0].hash());
            assert_eq!(pair[1].transactions.len(), 1);
        }
        assert!(node.pool.is_empty());
        assert_eq!(node.keys.kept().len(), blocks.len());

        let status = node.service.status().await;
        assert!(!status.active);
        assert_eq!(status.blocks_accepted as usize, blocks.len());
    }

    /// The batch strategy drives the same loop and stops on demand.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_strategy_mines_on_demand() {
        let node = node(
            miner_config(SearchStrategyKind::Batch),
            ConsensusParams::regtest(),
            EASY_BITS,
            &[],
        );

        assert_ok!(node.service.start().await);
        let service = &node.service;
        let mut finished = false;
        for _ in 0..1_000 {
            if !service.status().await.active {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished);
        assert_ok!(node.service.stop().await);

        assert_eq!(node.chain.height(), 1);
        assert_eq!(node.acceptance.inner.accepted(), node.chain.block_hashes()[1..].to_vec());
    }

    /// A rival block cancels the unsolvable search and nothing is submitted.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_external_block_cancels_search() {
        let node = node(
            miner_config(SearchStrategyKind::Default),
            continuous_regtest(),
            HARD_BITS,
            &[],
        );
        let metrics = node.service.orchestrator().metrics();

        assert_ok!(node.service.start().await);
        assert!(wait_until(|| metrics.get_templates_built() >= 1).await);

        let rival = solved_block(node.genesis.hash(), 1, GENESIS_TIME + 60);
        assert_eq!(node.chain.connect_block(&rival), SubmitResult::Accepted);
        assert!(wait_until(|| metrics.get_search_cancellations() >= 1).await);

        assert_ok!(node.service.stop().await);
        assert!(node.acceptance.inner.submissions().is_empty());
        assert_eq!(metrics.get_blocks_found(), 0);
        assert_eq!(node.chain.height(), 1);
    }
}
