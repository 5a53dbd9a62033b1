//! Block templates and header finalization

use super::entities::{ChainTip, Selection};
use crate::error::BlockProductionError;
use crate::utils::hashing::u256_to_hash;
use primitive_types::{H256, U256};
use rand::RngCore;
use serde::Serialize;
use shared_types::{Amount, Block, BlockHeader, Script, Transaction};
use std::sync::Arc;

/// Candidate block plus the per-transaction accounting used to build it.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    /// Block with the coinbase at index 0
    pub block: Block,
    /// Height the block will have
    pub height: u32,
    /// Fee per transaction; slot 0 holds minus the total fees
    pub tx_fees: Vec<Amount>,
    /// Signature operations per transaction; slot 0 is the coinbase
    pub tx_sigops: Vec<u32>,
    /// Running block size from selection, reserve included
    pub total_size: usize,
    /// Running signature operations from selection, reserve included
    pub total_sigops: u32,
    /// Fees collected by the coinbase
    pub total_fees: Amount,
    /// Pool transactions dropped for unresolvable inputs
    pub pool_faults: Vec<BlockProductionError>,
}

impl BlockTemplate {
    /// Template for `height` from a selection and its coinbase.
    pub fn new(height: u32, coinbase: Transaction, selection: Selection) -> Self {
        let Selection {
            transactions,
            fees,
            sigops,
            block_size,
            block_sigops,
            total_fees,
            faults,
        } = selection;

        let mut tx_fees = Vec::with_capacity(fees.len() + 1);
        tx_fees.push(-total_fees);
        tx_fees.extend(fees);

        let mut tx_sigops = Vec::with_capacity(sigops.len() + 1);
        tx_sigops.push(coinbase.legacy_sigop_count());
        tx_sigops.extend(sigops);

        let mut txs = Vec::with_capacity(transactions.len() + 1);
        txs.push(coinbase);
        txs.extend(transactions.into_iter().map(Arc::unwrap_or_clone));

        let mut template = Self {
            block: Block {
                header: BlockHeader::default(),
                transactions: txs,
            },
            height,
            tx_fees,
            tx_sigops,
            total_size: block_size,
            total_sigops: block_sigops,
            total_fees,
            pool_faults: faults,
        };
        template.refresh_merkle_root();
        template
    }

    /// Coinbase transaction
    pub fn coinbase(&self) -> &Transaction {
        // `new` always places the coinbase first.
        &self.block.transactions[0]
    }

    /// Transactions after the coinbase
    pub fn selected(&self) -> &[Transaction] {
        &self.block.transactions[1..]
    }

    /// Replace the coinbase unlocking script and refresh dependent fields.
    pub fn set_coinbase_script(&mut self, script_sig: Script) {
        if let Some(input) = self.block.transactions[0].inputs.first_mut() {
            input.script_sig = script_sig;
        }
        self.tx_sigops[0] = self.block.transactions[0].legacy_sigop_count();
        self.refresh_merkle_root();
    }

    /// Recompute the header's merkle root from the transaction list.
    pub fn refresh_merkle_root(&mut self) {
        self.block.header.merkle_root = self.block.merkle_root();
    }

    /// Header summary for logs and status reports.
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            height: self.height,
            prev_block: self.block.header.prev_block,
            transactions: self.selected().len(),
            total_size: self.total_size,
            total_sigops: self.total_sigops,
            total_fees: self.total_fees,
            pool_faults: self.pool_faults.len(),
        }
    }
}

/// Compact description of a template
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateSummary {
    /// Height
    pub height: u32,
    /// Parent hash
    pub prev_block: H256,
    /// Selected transactions, coinbase excluded
    pub transactions: usize,
    /// Running size, reserve included
    pub total_size: usize,
    /// Running sigops, reserve included
    pub total_sigops: u32,
    /// Fees collected
    pub total_fees: Amount,
    /// Pool transactions dropped for unresolvable inputs
    pub pool_faults: usize,
}

/// Header time for a block on `tip`: strictly after the median time past
/// and no earlier than the network-adjusted clock.
pub fn block_time(tip: &ChainTip, adjusted_time: i64) -> u32 {
    let time = (tip.median_time_past + 1).max(adjusted_time);
    time.clamp(0, u32::MAX as i64) as u32
}

/// Random starting nonce with the top and bottom 16 bits cleared.
///
/// The low bits leave room to count up before the low-bits rebuild trigger
/// fires, the high bits keep the counter from wrapping.
pub fn randomize_nonce<R: RngCore + ?Sized>(rng: &mut R) -> H256 {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    let nonce = U256::from_little_endian(&bytes);
    u256_to_hash((nonce << 32) >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hashing::hash_to_u256;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared_types::{OutPoint, TxIn, TxOut};

    fn coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::null(), Script::new().push_int(5).push_int(0))],
            outputs: vec![TxOut {
                value: 1_000,
                script_pubkey: Script::new(),
            }],
            lock_time: 0,
        }
    }

    fn tip(mtp: i64) -> ChainTip {
        ChainTip {
            hash: H256::repeat_byte(3),
            height: 4,
            time: mtp as u32,
            median_time_past: mtp,
            bits: 0x207f_ffff,
        }
    }

    #[test]
    fn test_template_layout() {
        let paid = Transaction {
            version: 2,
            inputs: vec![TxIn::new(OutPoint::new(H256::repeat_byte(1), 0), Script::new())],
            outputs: vec![],
            lock_time: 0,
        };
        let selection = Selection {
            transactions: vec![Arc::new(paid.clone())],
            fees: vec![40],
            sigops: vec![2],
            block_size: 1_100,
            block_sigops: 102,
            total_fees: 40,
            faults: vec![],
        };

        let template = BlockTemplate::new(5, coinbase(), selection);

        assert_eq!(template.tx_fees, vec![-40, 40]);
        assert_eq!(template.tx_sigops, vec![0, 2]);
        assert!(template.coinbase().is_coinbase());
        assert_eq!(template.selected(), &[paid]);
        assert_eq!(template.block.header.merkle_root, template.block.merkle_root());
        let summary = template.summary();
        assert_eq!(summary.transactions, 1);
        assert_eq!(summary.total_fees, 40);
        assert_eq!(summary.pool_faults, 0);
    }

    #[test]
    fn test_coinbase_script_refreshes_merkle_root() {
        let mut template = BlockTemplate::new(5, coinbase(), Selection::default());
        let before = template.block.header.merkle_root;

        template.set_coinbase_script(Script::new().push_int(5).push_num(1));

        assert_ne!(template.block.header.merkle_root, before);
        assert_eq!(template.block.header.merkle_root, template.block.merkle_root());
    }

    #[test]
    fn test_block_time_rule() {
        assert_eq!(block_time(&tip(1_000), 900), 1_001);
        assert_eq!(block_time(&tip(1_000), 1_001), 1_001);
        assert_eq!(block_time(&tip(1_000), 5_000), 5_000);
    }

    #[test]
    fn test_nonce_bits_cleared() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..64 {
            let nonce = randomize_nonce(&mut rng);
            let value = hash_to_u256(&nonce);
            assert_eq!(value.low_u64() & 0xffff, 0);
            assert!(value < U256::one() << 240);
        }
    }
}
