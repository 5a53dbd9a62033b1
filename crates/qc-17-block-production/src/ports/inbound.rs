//! Inbound ports (driving side - API)

use crate::domain::{BlockTemplate, MinerState, WorkerExit};
use crate::error::Result;
use async_trait::async_trait;
use primitive_types::H256;
use serde::Serialize;
use shared_types::Script;

/// Primary port: Template building and the per-worker search loop
///
/// Synchronous because workers run on blocking threads.
pub trait MiningApi: Send + Sync {
    /// Build and finalize a template paying `payout`
    fn build_template(&self, payout: &Script) -> Result<BlockTemplate>;

    /// Run one worker until shutdown, an on-demand stop or a fatal error
    fn run_search_loop(&self, worker_id: usize) -> Result<WorkerExit>;

    /// The chain tip moved; cancel every in-flight search
    fn notify_tip_changed(&self, new_tip: H256);

    /// Stop every worker at its next check
    fn shutdown(&self);
}

/// Primary port: Worker pool control
#[async_trait]
pub trait MinerControl: Send + Sync {
    /// Spawn the configured number of workers, returning how many started
    async fn start(&self) -> Result<usize>;

    /// Signal shutdown and wait for every worker to exit
    async fn stop(&self) -> Result<()>;

    /// Current mining status
    async fn status(&self) -> MiningStatus;

    /// Forward a tip change to every worker
    async fn notify_tip_changed(&self, new_tip: H256);
}

/// Snapshot of the worker pool
#[derive(Clone, Debug, Default, Serialize)]
pub struct MiningStatus {
    /// Whether workers are running
    pub active: bool,

    /// Per-worker phase, ordered by worker id
    pub workers: Vec<WorkerStatus>,

    /// Templates built since startup
    pub templates_built: u64,

    /// Blocks whose hash met the target
    pub blocks_found: u64,

    /// Found blocks the chain accepted
    pub blocks_accepted: u64,

    /// Candidate witnesses checked against the target
    pub solution_target_checks: u64,
}

/// One worker's phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    /// Worker id
    pub worker_id: usize,

    /// Current phase
    pub state: MinerState,
}
