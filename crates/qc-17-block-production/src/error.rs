//! Error types for block production subsystem

use crate::ports::SearchStrategyError;
use primitive_types::H256;
use shared_types::OutPoint;
use thiserror::Error;

/// Result type alias for block production operations
pub type Result<T> = std::result::Result<T, BlockProductionError>;

/// Errors that can occur during block production
#[derive(Clone, Debug, Error)]
pub enum BlockProductionError {
    /// A pool transaction spends an output found neither in the coin view
    /// nor in the pool itself
    #[error("Pool consistency fault: transaction {txid:?} spends unknown output {missing:?}")]
    PoolConsistencyFault {
        /// Offending transaction
        txid: H256,
        /// Output that could not be resolved
        missing: OutPoint,
    },

    /// Finalized template failed the external validity check
    #[error("Template invalid: {0}")]
    TemplateInvalid(String),

    /// No payout script from configuration or key manager
    #[error("No payout destination available")]
    NoPayoutDestination,

    /// Chain tip moved away from the block's parent
    #[error("Stale block: built on {expected:?}, tip is {actual:?}")]
    Stale {
        /// Parent the block was built on
        expected: H256,
        /// Current chain tip
        actual: H256,
    },

    /// Search observed cooperative cancellation
    #[error("Search cancelled")]
    SearchCancelled,

    /// Internal fault inside a proof-of-work search strategy
    #[error("Search strategy fault: {0}")]
    SearchStrategyFault(String),

    /// Chain state collaborator returned something unusable
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Mining not currently active
    #[error("Mining not active")]
    NotActive,

    /// Mining already running
    #[error("Mining already running")]
    AlreadyRunning,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error, such as a worker task that panicked
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl BlockProductionError {
    /// Check if error is recoverable (should retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolConsistencyFault { .. }
                | Self::NoPayoutDestination
                | Self::Stale { .. }
                | Self::SearchCancelled
                | Self::SearchStrategyFault(_)
                | Self::ChainUnavailable(_)
        )
    }

    /// Check if error is critical (should stop the worker)
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::InternalError(_))
    }
}

impl From<SearchStrategyError> for BlockProductionError {
    fn from(err: SearchStrategyError) -> Self {
        Self::SearchStrategyFault(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverability() {
        assert!(BlockProductionError::NoPayoutDestination.is_recoverable());
        assert!(BlockProductionError::SearchCancelled.is_recoverable());
        assert!(BlockProductionError::Stale {
            expected: H256::zero(),
            actual: H256::repeat_byte(1)
        }
        .is_recoverable());
        assert!(!BlockProductionError::TemplateInvalid("bad".into()).is_recoverable());
        assert!(!BlockProductionError::InvalidConfig("x".into()).is_recoverable());
    }

    #[test]
    fn test_error_criticality() {
        assert!(BlockProductionError::InvalidConfig("no strategy".into()).is_critical());
        assert!(!BlockProductionError::TemplateInvalid("bad".into()).is_critical());
        assert!(!BlockProductionError::SearchStrategyFault("oops".into()).is_critical());
    }

    #[test]
    fn test_strategy_error_conversion() {
        let err: BlockProductionError = SearchStrategyError::Internal("gpu lost".into()).into();
        assert!(matches!(err, BlockProductionError::SearchStrategyFault(ref msg) if msg.contains("gpu lost")));
        assert!(err.is_recoverable());
    }
}
