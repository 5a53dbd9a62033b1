//! Configuration types for block production

use crate::domain::{
    FeeRate, SearchStrategyKind, SelectionLimits, SubsidySchedule, DEFAULT_RESERVED_SIGOPS,
    DEFAULT_RESERVED_SIZE, MAX_COINBASE_FLAGS_SIZE,
};
use crate::error::{BlockProductionError, Result};
use serde::Deserialize;
use shared_types::Script;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Smallest block size a miner may be configured with.
pub const MIN_BLOCK_MAX_SIZE: usize = 1000;

/// Miner policy configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Largest block to build, in bytes (clamped to consensus limits)
    pub block_max_size: usize,

    /// Bytes filled by coin-age priority before ordering by fee
    pub block_priority_size: usize,

    /// Size up to which free transactions are still included
    pub block_min_size: usize,

    /// Free-transaction threshold, base units per 1000 bytes
    pub min_relay_fee_per_kb: i64,

    /// Hex HASH160 to pay every coinbase to, bypassing the key manager
    pub payout_address_override: Option<String>,

    /// Proof-of-work search strategy
    pub search_strategy: SearchStrategyKind,

    /// Mining workers; zero or negative means one per CPU
    pub worker_count: i32,

    /// Log every selected transaction's priority and fee rate
    pub log_selection_detail: bool,

    /// Rebuild after this long when the pool has changed (seconds)
    pub template_refresh_interval_secs: u64,

    /// Pause before retrying a recoverable failure (milliseconds)
    pub retry_delay_ms: u64,

    /// Consecutive invalid templates before a worker gives up
    pub max_consecutive_template_failures: u32,

    /// Witnesses a strategy tries per nonce
    pub attempts_per_nonce: u32,

    /// Witnesses between cancellation checks
    pub cancel_poll_interval: u32,

    /// Header version for networks that mine blocks on demand
    pub block_version_override: Option<i32>,

    /// Appended to every coinbase unlocking script
    pub coinbase_flags: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            block_max_size: crate::DEFAULT_BLOCK_MAX_SIZE,
            block_priority_size: crate::DEFAULT_BLOCK_PRIORITY_SIZE,
            block_min_size: 0,
            min_relay_fee_per_kb: crate::DEFAULT_MIN_RELAY_FEE,
            payout_address_override: None,
            search_strategy: SearchStrategyKind::Default,
            worker_count: -1,
            log_selection_detail: false,
            template_refresh_interval_secs: 60,
            retry_delay_ms: 1000,
            max_consecutive_template_failures: 3,
            attempts_per_nonce: 4096,
            cancel_poll_interval: 64,
            block_version_override: None,
            coinbase_flags: String::new(),
        }
    }
}

impl MinerConfig {
    /// Defaults overridden by `QC_*` environment variables.
    ///
    /// - `QC_BLOCK_MAX_SIZE`, `QC_BLOCK_PRIORITY_SIZE`, `QC_BLOCK_MIN_SIZE`
    /// - `QC_MIN_RELAY_FEE`: base units per 1000 bytes
    /// - `QC_MINER_ADDRESS`: hex HASH160 payout override
    /// - `QC_SEARCH_STRATEGY`: `default` or `batch`
    /// - `QC_MINER_THREADS`: worker count, `-1` for one per CPU
    /// - `QC_PRINT_PRIORITY`: `true`/`1` to log selection detail
    /// - `QC_COINBASE_FLAGS`: text appended to coinbase scripts
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `QC_*` name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(size) = parse_value(&lookup, "QC_BLOCK_MAX_SIZE")? {
            config.block_max_size = size;
        }
        if let Some(size) = parse_value(&lookup, "QC_BLOCK_PRIORITY_SIZE")? {
            config.block_priority_size = size;
        }
        if let Some(size) = parse_value(&lookup, "QC_BLOCK_MIN_SIZE")? {
            config.block_min_size = size;
        }
        if let Some(fee) = parse_value(&lookup, "QC_MIN_RELAY_FEE")? {
            config.min_relay_fee_per_kb = fee;
        }
        if let Some(address) = lookup("QC_MINER_ADDRESS") {
            config.payout_address_override = Some(address);
        }
        if let Some(strategy) = parse_value(&lookup, "QC_SEARCH_STRATEGY")? {
            config.search_strategy = strategy;
        }
        if let Some(threads) = parse_value(&lookup, "QC_MINER_THREADS")? {
            config.worker_count = threads;
        }
        if let Some(flag) = lookup("QC_PRINT_PRIORITY") {
            config.log_selection_detail = flag == "true" || flag == "1";
        }
        if let Some(flags) = lookup("QC_COINBASE_FLAGS") {
            config.coinbase_flags = flags;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no worker could run with.
    pub fn validate(&self) -> Result<()> {
        if self.min_relay_fee_per_kb < 0 {
            return Err(BlockProductionError::InvalidConfig(
                "min_relay_fee_per_kb must not be negative".into(),
            ));
        }
        if self.attempts_per_nonce == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "attempts_per_nonce must be positive".into(),
            ));
        }
        if self.cancel_poll_interval == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "cancel_poll_interval must be positive".into(),
            ));
        }
        if self.max_consecutive_template_failures == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "max_consecutive_template_failures must be positive".into(),
            ));
        }
        if self.coinbase_flags.len() > MAX_COINBASE_FLAGS_SIZE {
            return Err(BlockProductionError::InvalidConfig(format!(
                "coinbase_flags is {} bytes, limit {}",
                self.coinbase_flags.len(),
                MAX_COINBASE_FLAGS_SIZE
            )));
        }
        self.payout_override_script()?;
        Ok(())
    }

    /// Pay-to-pubkey-hash script for the configured override, if any.
    pub fn payout_override_script(&self) -> Result<Option<Script>> {
        let Some(address) = &self.payout_address_override else {
            return Ok(None);
        };
        let bytes = hex::decode(address.trim().trim_start_matches("0x")).map_err(|e| {
            BlockProductionError::InvalidConfig(format!("payout address '{address}': {e}"))
        })?;
        let key_hash: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            BlockProductionError::InvalidConfig(format!(
                "payout address must be 20 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Some(Script::pay_to_pubkey_hash(&key_hash)))
    }

    /// Worker count with "one per CPU" resolved.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count <= 0 {
            num_cpus::get()
        } else {
            self.worker_count as usize
        }
    }

    /// Pool-change rebuild interval
    pub fn template_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.template_refresh_interval_secs)
    }

    /// Retry pause
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn parse_value<T>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            BlockProductionError::InvalidConfig(format!("{name}='{raw}': {e}"))
        }),
        None => Ok(None),
    }
}

/// Network consensus parameters the miner depends on
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Consensus block size limit
    pub max_block_size: usize,

    /// Consensus signature-operation limit
    pub max_block_sigops: u32,

    /// Wait for peers before mining
    pub mining_requires_peers: bool,

    /// Stop a worker after each found block (regtest)
    pub mine_blocks_on_demand: bool,

    /// Difficulty may drop with block time, so bits follow header time
    pub pow_allow_min_difficulty_blocks: bool,

    /// Time-locks compare against median time past instead of block time
    pub locktime_median_time_past: bool,

    /// Mine while the node is still syncing
    pub mine_during_initial_sync: bool,

    /// Block subsidy
    pub subsidy: SubsidySchedule,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_block_size: crate::MAX_BLOCK_SIZE,
            max_block_sigops: crate::MAX_BLOCK_SIGOPS,
            mining_requires_peers: true,
            mine_blocks_on_demand: false,
            pow_allow_min_difficulty_blocks: false,
            locktime_median_time_past: true,
            mine_during_initial_sync: false,
            subsidy: SubsidySchedule::default(),
        }
    }
}

impl ConsensusParams {
    /// Single-node regression-test network
    pub fn regtest() -> Self {
        Self {
            mining_requires_peers: false,
            mine_blocks_on_demand: true,
            pow_allow_min_difficulty_blocks: true,
            mine_during_initial_sync: true,
            subsidy: SubsidySchedule {
                halving_interval: 150,
                ..SubsidySchedule::default()
            },
            ..Self::default()
        }
    }
}

impl SelectionLimits {
    /// Limits from policy, clamped to what consensus allows.
    ///
    /// The block size stays within `[1000, max_block_size - 1000]`; the
    /// priority and minimum sizes never exceed it.
    pub fn from_config(config: &MinerConfig, params: &ConsensusParams) -> Self {
        let ceiling = params
            .max_block_size
            .saturating_sub(DEFAULT_RESERVED_SIZE)
            .max(MIN_BLOCK_MAX_SIZE);
        let max_block_size = config.block_max_size.clamp(MIN_BLOCK_MAX_SIZE, ceiling);

        Self {
            max_block_size,
            max_priority_size: config.block_priority_size.min(max_block_size),
            min_block_size: config.block_min_size.min(max_block_size),
            min_relay_fee: FeeRate::per_kb(config.min_relay_fee_per_kb),
            max_block_sigops: params.max_block_sigops,
            reserved_size: DEFAULT_RESERVED_SIZE,
            reserved_sigops: DEFAULT_RESERVED_SIGOPS,
            log_selection_detail: config.log_selection_detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = MinerConfig::default();
        assert_eq!(config.block_max_size, 2_000_000);
        assert_eq!(config.block_priority_size, 27_000);
        assert_eq!(config.search_strategy, SearchStrategyKind::Default);
        assert_eq!(config.template_refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_resolution() {
        let mut config = MinerConfig::default();
        assert_eq!(config.resolved_worker_count(), num_cpus::get());
        config.worker_count = 0;
        assert_eq!(config.resolved_worker_count(), num_cpus::get());
        config.worker_count = 3;
        assert_eq!(config.resolved_worker_count(), 3);
    }

    #[test]
    fn test_size_clamping() {
        let params = ConsensusParams::default();

        let tiny = MinerConfig {
            block_max_size: 10,
            block_priority_size: 50_000,
            block_min_size: 80_000,
            ..MinerConfig::default()
        };
        let limits = SelectionLimits::from_config(&tiny, &params);
        assert_eq!(limits.max_block_size, 1000);
        assert_eq!(limits.max_priority_size, 1000);
        assert_eq!(limits.min_block_size, 1000);

        let huge = MinerConfig {
            block_max_size: 10_000_000,
            ..MinerConfig::default()
        };
        let limits = SelectionLimits::from_config(&huge, &params);
        assert_eq!(limits.max_block_size, params.max_block_size - 1000);
        assert_eq!(limits.max_priority_size, 27_000);
        assert_eq!(limits.min_block_size, 0);
    }

    #[test]
    fn test_payout_override() {
        let config = MinerConfig {
            payout_address_override: Some("11".repeat(20)),
            ..MinerConfig::default()
        };
        let script = config.payout_override_script().unwrap().unwrap();
        assert_eq!(script, Script::pay_to_pubkey_hash(&[0x11; 20]));

        let short = MinerConfig {
            payout_address_override: Some("abcd".into()),
            ..MinerConfig::default()
        };
        assert!(matches!(
            short.validate(),
            Err(BlockProductionError::InvalidConfig(_))
        ));

        let garbage = MinerConfig {
            payout_address_override: Some("zz".into()),
            ..MinerConfig::default()
        };
        assert!(garbage.payout_override_script().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = MinerConfig {
            attempts_per_nonce: 0,
            ..MinerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: MinerConfig =
            serde_json::from_str(r#"{"search_strategy": "batch", "worker_count": 2}"#).unwrap();
        assert_eq!(config.search_strategy, SearchStrategyKind::Batch);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.block_max_size, 2_000_000);

        let unknown = serde_json::from_str::<MinerConfig>(r#"{"search_strategy": "tromp"}"#);
        assert!(unknown.is_err());
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup() {
        let config = MinerConfig::from_lookup(lookup(&[
            ("QC_SEARCH_STRATEGY", "batch"),
            ("QC_MINER_THREADS", " 2 "),
            ("QC_PRINT_PRIORITY", "1"),
            ("QC_COINBASE_FLAGS", "/qc17/"),
        ]))
        .unwrap();
        assert_eq!(config.search_strategy, SearchStrategyKind::Batch);
        assert_eq!(config.worker_count, 2);
        assert!(config.log_selection_detail);
        assert_eq!(config.coinbase_flags, "/qc17/");
        assert_eq!(config.block_max_size, 2_000_000);

        assert!(matches!(
            MinerConfig::from_lookup(lookup(&[("QC_SEARCH_STRATEGY", "gpu")])),
            Err(BlockProductionError::InvalidConfig(_))
        ));
        assert!(matches!(
            MinerConfig::from_lookup(lookup(&[("QC_BLOCK_MAX_SIZE", "lots")])),
            Err(BlockProductionError::InvalidConfig(msg)) if msg.contains("QC_BLOCK_MAX_SIZE")
        ));
    }

    #[test]
    fn test_validate_rejects_long_coinbase_flags() {
        let fits = MinerConfig {
            coinbase_flags: "x".repeat(MAX_COINBASE_FLAGS_SIZE),
            ..MinerConfig::default()
        };
        assert!(fits.validate().is_ok());

        let too_long = MinerConfig {
            coinbase_flags: "x".repeat(MAX_COINBASE_FLAGS_SIZE + 1),
            ..MinerConfig::default()
        };
        assert!(matches!(
            too_long.validate(),
            Err(BlockProductionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_regtest_params() {
        let params = ConsensusParams::regtest();
        assert!(!params.mining_requires_peers);
        assert!(params.mine_blocks_on_demand);
        assert!(params.pow_allow_min_difficulty_blocks);
        assert_eq!(params.max_block_size, ConsensusParams::default().max_block_size);
    }
}
