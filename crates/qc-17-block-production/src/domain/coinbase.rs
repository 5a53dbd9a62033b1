//! Coinbase transaction assembly
//!
//! The coinbase is the first transaction of every block. It has one input
//! spending the null outpoint, whose unlocking script carries the block
//! height and the worker's extra nonce, and one output paying the subsidy
//! plus all fees to the miner.

use crate::error::{BlockProductionError, Result};
use crate::ports::KeyManager;
use serde::Deserialize;
use shared_types::{Amount, OutPoint, Script, Transaction, TxIn, TxOut, COIN};

/// Longest coinbase unlocking script consensus allows.
pub const MAX_COINBASE_SCRIPT_SIG_SIZE: usize = 100;

/// Longest flag string that still leaves room for the height and extra
/// nonce pushes.
pub const MAX_COINBASE_FLAGS_SIZE: usize = MAX_COINBASE_SCRIPT_SIG_SIZE - 12;

/// Block subsidy with periodic halving
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubsidySchedule {
    /// Subsidy of the first block
    pub initial_subsidy: Amount,
    /// Blocks between halvings
    pub halving_interval: u32,
}

impl Default for SubsidySchedule {
    fn default() -> Self {
        Self {
            initial_subsidy: 125 * COIN / 10,
            halving_interval: 840_000,
        }
    }
}

impl SubsidySchedule {
    /// Subsidy of the block at `height`. Zero after 64 halvings.
    pub fn subsidy(&self, height: u32) -> Amount {
        if self.halving_interval == 0 {
            return self.initial_subsidy;
        }
        let halvings = height / self.halving_interval;
        if halvings >= 64 {
            return 0;
        }
        self.initial_subsidy >> halvings
    }
}

/// Builds coinbase transactions
#[derive(Clone, Debug, Default)]
pub struct CoinbaseAssembler {
    schedule: SubsidySchedule,
    flags: Vec<u8>,
}

impl CoinbaseAssembler {
    /// Assembler paying subsidies from `schedule`
    pub fn new(schedule: SubsidySchedule) -> Self {
        Self {
            schedule,
            flags: Vec::new(),
        }
    }

    /// Append `flags` to every coinbase unlocking script.
    pub fn with_flags(mut self, flags: impl Into<Vec<u8>>) -> Self {
        self.flags = flags.into();
        self
    }

    /// Subsidy schedule in use
    pub fn schedule(&self) -> &SubsidySchedule {
        &self.schedule
    }

    /// Unlocking script `<height> <extra_nonce> ‖ flags`.
    ///
    /// Without an extra nonce the second element is `OP_0`.
    pub fn script_sig(&self, height: u32, extra_nonce: Option<u32>) -> Result<Script> {
        let script = Script::new().push_int(height as i64);
        let script = match extra_nonce {
            Some(extra) => script.push_num(extra as i64),
            None => script.push_int(0),
        };
        let mut bytes = script.as_bytes().to_vec();
        bytes.extend_from_slice(&self.flags);

        if bytes.len() > MAX_COINBASE_SCRIPT_SIG_SIZE {
            return Err(BlockProductionError::TemplateInvalid(format!(
                "coinbase script is {} bytes, limit {}",
                bytes.len(),
                MAX_COINBASE_SCRIPT_SIG_SIZE
            )));
        }
        Ok(Script::from_bytes(bytes))
    }

    /// Coinbase for `height` paying `subsidy(height) + total_fees` to
    /// `payout`.
    pub fn assemble(
        &self,
        height: u32,
        total_fees: Amount,
        payout: &Script,
        extra_nonce: Option<u32>,
    ) -> Result<Transaction> {
        let script_sig = self.script_sig(height, extra_nonce)?;
        Ok(Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::null(), script_sig)],
            outputs: vec![TxOut {
                value: self.schedule.subsidy(height) + total_fees,
                script_pubkey: payout.clone(),
            }],
            lock_time: 0,
        })
    }
}

/// Payout script: the configured override if any, otherwise a fresh script
/// from the key manager.
pub fn resolve_payout_script(
    override_script: Option<&Script>,
    keys: &dyn KeyManager,
) -> Result<Script> {
    if let Some(script) = override_script {
        return Ok(script.clone());
    }
    keys.next_payout_script()
        .ok_or(BlockProductionError::NoPayoutDestination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::StaticKeyManager;
    use shared_types::script::OP_0;

    fn payout() -> Script {
        Script::pay_to_pubkey_hash(&[9; 20])
    }

    #[test]
    fn test_subsidy_halving() {
        let schedule = SubsidySchedule::default();
        assert_eq!(schedule.subsidy(0), 1_250_000_000);
        assert_eq!(schedule.subsidy(839_999), 1_250_000_000);
        assert_eq!(schedule.subsidy(840_000), 625_000_000);
        assert_eq!(schedule.subsidy(840_000 * 2), 312_500_000);
        assert_eq!(schedule.subsidy(840_000 * 63), 0);
        assert_eq!(
            SubsidySchedule {
                initial_subsidy: 50 * COIN,
                halving_interval: 150,
            }
            .subsidy(150 * 64),
            0
        );
    }

    #[test]
    fn test_coinbase_shape() {
        let assembler = CoinbaseAssembler::default();
        let coinbase = assembler.assemble(1000, 7_500, &payout(), None).unwrap();

        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.inputs.len(), 1);
        assert_eq!(coinbase.outputs.len(), 1);
        assert_eq!(coinbase.outputs[0].value, 1_250_000_000 + 7_500);
        assert_eq!(coinbase.outputs[0].script_pubkey, payout());
        // height push, then OP_0 placeholder
        let script = coinbase.inputs[0].script_sig.as_bytes();
        assert_eq!(script, &[0x02, 0xe8, 0x03, OP_0]);
    }

    #[test]
    fn test_extra_nonce_in_script() {
        let assembler = CoinbaseAssembler::default().with_flags(b"/qc/".to_vec());
        let script = assembler.script_sig(17, Some(3)).unwrap();
        // Heights above 16 and every extra nonce are data pushes.
        assert_eq!(script.as_bytes(), &[0x01, 17, 0x01, 3, b'/', b'q', b'c', b'/']);
    }

    #[test]
    fn test_script_sig_size_limit() {
        let assembler = CoinbaseAssembler::default().with_flags(vec![0u8; 95]);
        let result = assembler.script_sig(500_000, Some(1));
        assert!(matches!(result, Err(BlockProductionError::TemplateInvalid(_))));
    }

    #[test]
    fn test_payout_resolution() {
        let keys = StaticKeyManager::new(payout());
        let override_script = Script::pay_to_pubkey_hash(&[1; 20]);

        assert_eq!(
            resolve_payout_script(Some(&override_script), &keys).unwrap(),
            override_script
        );
        assert_eq!(resolve_payout_script(None, &keys).unwrap(), payout());
        assert!(matches!(
            resolve_payout_script(None, &StaticKeyManager::empty()),
            Err(BlockProductionError::NoPayoutDestination)
        ));
    }
}
