//! Proof-of-work search strategies
//!
//! Both strategies derive witness `i` for a nonce as
//! `sha256(seed ‖ i_le)`; they differ only in how candidates are produced
//! and how often cancellation is observed.

use crate::config::MinerConfig;
use crate::domain::{SearchInput, SearchOutcome, SearchStrategyKind};
use crate::ports::{PowSearchStrategy, SearchStrategyError};
use crate::utils::derive_witness;
use rayon::prelude::*;
use std::sync::Arc;

/// Streams witnesses one at a time, polling cancellation every
/// `cancel_poll_interval` candidates.
#[derive(Clone, Debug)]
pub struct StreamingGrinder {
    attempts_per_nonce: u32,
    cancel_poll_interval: u32,
}

impl StreamingGrinder {
    /// Grinder trying `attempts_per_nonce` witnesses per nonce
    pub fn new(attempts_per_nonce: u32, cancel_poll_interval: u32) -> Self {
        Self {
            attempts_per_nonce,
            cancel_poll_interval: cancel_poll_interval.max(1),
        }
    }
}

impl PowSearchStrategy for StreamingGrinder {
    fn kind(&self) -> SearchStrategyKind {
        SearchStrategyKind::Default
    }

    fn run(
        &self,
        input: &SearchInput,
        on_candidate: &mut dyn FnMut(&[u8]) -> bool,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<SearchOutcome, SearchStrategyError> {
        if input.preimage.is_empty() {
            return Err(SearchStrategyError::InvalidInput("empty header preimage".into()));
        }
        let seed = input.seed();

        for index in 0..self.attempts_per_nonce {
            if index % self.cancel_poll_interval == 0 && is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }
            let witness = derive_witness(&seed, index);
            if on_candidate(&witness) {
                return Ok(SearchOutcome::Found(witness.to_vec()));
            }
        }
        Ok(SearchOutcome::Exhausted)
    }
}

/// Generates every witness for a nonce in parallel, then validates them in
/// index order.
///
/// Cancellation is observed before generation and between validations.
#[derive(Clone, Debug)]
pub struct BatchGrinder {
    attempts_per_nonce: u32,
}

impl BatchGrinder {
    /// Grinder producing batches of `attempts_per_nonce` witnesses
    pub fn new(attempts_per_nonce: u32) -> Self {
        Self { attempts_per_nonce }
    }
}

impl PowSearchStrategy for BatchGrinder {
    fn kind(&self) -> SearchStrategyKind {
        SearchStrategyKind::Batch
    }

    fn run(
        &self,
        input: &SearchInput,
        on_candidate: &mut dyn FnMut(&[u8]) -> bool,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<SearchOutcome, SearchStrategyError> {
        if input.preimage.is_empty() {
            return Err(SearchStrategyError::InvalidInput("empty header preimage".into()));
        }
        if is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }

        let seed = input.seed();
        let batch: Vec<[u8; 32]> = (0..self.attempts_per_nonce)
            .into_par_iter()
            .map(|index| derive_witness(&seed, index))
            .collect();

        if batch.len() != self.attempts_per_nonce as usize {
            return Err(SearchStrategyError::Internal(format!(
                "generated {} of {} witnesses",
                batch.len(),
                self.attempts_per_nonce
            )));
        }

        for witness in &batch {
            if is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }
            if on_candidate(witness) {
                return Ok(SearchOutcome::Found(witness.to_vec()));
            }
        }
        Ok(SearchOutcome::Exhausted)
    }
}

/// Resolve the configured strategy once at startup.
pub fn build_strategy(kind: SearchStrategyKind, config: &MinerConfig) -> Arc<dyn PowSearchStrategy> {
    match kind {
        SearchStrategyKind::Default => Arc::new(StreamingGrinder::new(
            config.attempts_per_nonce,
            config.cancel_poll_interval,
        )),
        SearchStrategyKind::Batch => Arc::new(BatchGrinder::new(config.attempts_per_nonce)),
    }
}
