//! Layered coin view used while filling a template.
//!
//! Selection spends confirmed outputs and creates new ones as transactions
//! are appended. Those changes live in an overlay so the base view stays
//! untouched.

use crate::ports::UnspentOutputView;
use primitive_types::H256;
use shared_types::{Amount, Coins, OutPoint, Transaction, TxOut};
use std::collections::HashMap;

/// Copy-on-read overlay over an [`UnspentOutputView`].
pub struct CoinViewCache<'a> {
    base: &'a dyn UnspentOutputView,
    cache: HashMap<H256, Coins>,
}

impl<'a> CoinViewCache<'a> {
    /// Empty overlay on top of `base`.
    pub fn new(base: &'a dyn UnspentOutputView) -> Self {
        Self {
            base,
            cache: HashMap::new(),
        }
    }

    fn fetch(&mut self, txid: &H256) -> Option<&mut Coins> {
        if !self.cache.contains_key(txid) {
            let coins = self.base.lookup(txid)?;
            self.cache.insert(*txid, coins);
        }
        self.cache.get_mut(txid)
    }

    /// Whether `txid` still has unspent outputs.
    pub fn have_coins(&mut self, txid: &H256) -> bool {
        self.fetch(txid).is_some_and(|coins| !coins.is_pruned())
    }

    /// Output spent by `outpoint`, if still unspent.
    pub fn prev_output(&mut self, outpoint: &OutPoint) -> Option<TxOut> {
        self.fetch(&outpoint.txid)
            .and_then(|coins| coins.output(outpoint.vout).cloned())
    }

    /// Whether every input of `tx` spends an unspent output.
    pub fn have_inputs(&mut self, tx: &Transaction) -> bool {
        tx.is_coinbase()
            || tx
                .inputs
                .iter()
                .all(|input| self.prev_output(&input.prevout).is_some())
    }

    /// Sum of the outputs spent by `tx`. Unknown inputs count as zero.
    pub fn value_in(&mut self, tx: &Transaction) -> Amount {
        if tx.is_coinbase() {
            return 0;
        }
        tx.inputs
            .iter()
            .filter_map(|input| self.prev_output(&input.prevout))
            .map(|out| out.value)
            .sum()
    }

    /// Spend the inputs of `tx` and add its outputs at `height`.
    pub fn apply(&mut self, tx: &Transaction, height: u32) {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                if let Some(coins) = self.fetch(&input.prevout.txid) {
                    coins.spend(input.prevout.vout);
                }
            }
        }
        self.cache
            .insert(tx.txid(), Coins::from_transaction(tx, height));
    }
}

impl UnspentOutputView for CoinViewCache<'_> {
    fn lookup(&self, txid: &H256) -> Option<Coins> {
        match self.cache.get(txid) {
            Some(coins) => Some(coins.clone()),
            None => self.base.lookup(txid),
        }
    }
}
