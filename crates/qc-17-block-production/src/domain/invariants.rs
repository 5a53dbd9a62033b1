//! Invariant checkers for block production
//!
//! These functions enforce the properties that MUST hold for every
//! template handed to a search strategy.

use super::coinbase::{SubsidySchedule, MAX_COINBASE_SCRIPT_SIG_SIZE};
use super::entities::SelectionLimits;
use super::template::BlockTemplate;
use crate::error::{BlockProductionError, Result};
use primitive_types::H256;
use std::collections::{HashMap, HashSet};

/// Size budget: the running size, reserve included, stays below the
/// configured maximum.
pub fn check_block_size(template: &BlockTemplate, limits: &SelectionLimits) -> Result<()> {
    if template.total_size >= limits.max_block_size && !template.selected().is_empty() {
        return Err(BlockProductionError::TemplateInvalid(format!(
            "block size {} reaches limit {}",
            template.total_size, limits.max_block_size
        )));
    }
    Ok(())
}

/// Signature-operation budget.
pub fn check_sigops(template: &BlockTemplate, limits: &SelectionLimits) -> Result<()> {
    if template.total_sigops >= limits.max_block_sigops {
        return Err(BlockProductionError::TemplateInvalid(format!(
            "block sigops {} reach limit {}",
            template.total_sigops, limits.max_block_sigops
        )));
    }
    Ok(())
}

/// Coinbase at index 0 only, with one null input, a short unlocking
/// script and one output worth exactly subsidy plus fees.
pub fn check_coinbase(template: &BlockTemplate, schedule: &SubsidySchedule) -> Result<()> {
    let invalid = |reason: String| Err(BlockProductionError::TemplateInvalid(reason));

    let coinbase = template.coinbase();
    if !coinbase.is_coinbase() {
        return invalid("first transaction is not a coinbase".into());
    }
    if template.selected().iter().any(|tx| tx.is_coinbase()) {
        return invalid("coinbase found after index 0".into());
    }
    let script_len = coinbase.inputs[0].script_sig.len();
    if script_len > MAX_COINBASE_SCRIPT_SIG_SIZE {
        return invalid(format!("coinbase script is {script_len} bytes"));
    }
    if coinbase.outputs.len() != 1 {
        return invalid(format!("coinbase has {} outputs", coinbase.outputs.len()));
    }

    let expected = schedule.subsidy(template.height) + template.total_fees;
    if coinbase.outputs[0].value != expected {
        return invalid(format!(
            "coinbase pays {}, expected {}",
            coinbase.outputs[0].value, expected
        ));
    }
    Ok(())
}

/// Dependency order: no transaction appears before a parent that is also in
/// the block, and none appears twice.
pub fn check_dependency_order(template: &BlockTemplate) -> Result<()> {
    let positions: HashMap<H256, usize> = template
        .block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.txid(), i))
        .collect();
    if positions.len() != template.block.transactions.len() {
        return Err(BlockProductionError::TemplateInvalid(
            "duplicate transaction in template".into(),
        ));
    }

    let mut seen = HashSet::with_capacity(positions.len());
    for tx in &template.block.transactions {
        for input in &tx.inputs {
            if positions.contains_key(&input.prevout.txid) && !seen.contains(&input.prevout.txid) {
                return Err(BlockProductionError::TemplateInvalid(format!(
                    "transaction {:?} precedes its parent {:?}",
                    tx.txid(),
                    input.prevout.txid
                )));
            }
        }
        seen.insert(tx.txid());
    }
    Ok(())
}

/// Run every template check.
pub fn check_template(
    template: &BlockTemplate,
    limits: &SelectionLimits,
    schedule: &SubsidySchedule,
) -> Result<()> {
    check_block_size(template, limits)?;
    check_sigops(template, limits)?;
    check_coinbase(template, schedule)?;
    check_dependency_order(template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coinbase::CoinbaseAssembler;
    use crate::domain::entities::Selection;
    use shared_types::{OutPoint, Script, Transaction, TxIn, TxOut};
    use std::sync::Arc;

    fn tx(prev: H256, tag: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::new(prev, 0), Script::new().push_int(tag))],
            outputs: vec![TxOut {
                value: 10,
                script_pubkey: Script::new(),
            }],
            lock_time: 0,
        }
    }

    fn template_with(txs: Vec<Transaction>, fees: i64) -> BlockTemplate {
        let assembler = CoinbaseAssembler::default();
        let coinbase = assembler.assemble(10, fees, &Script::new(), None).unwrap();
        let count = txs.len();
        let selection = Selection {
            transactions: txs.into_iter().map(Arc::new).collect(),
            fees: vec![0; count],
            sigops: vec![0; count],
            block_size: 1_000 + 100 * count,
            block_sigops: 100,
            total_fees: fees,
            faults: vec![],
        };
        BlockTemplate::new(10, coinbase, selection)
    }

    #[test]
    fn test_valid_template_passes() {
        let parent = tx(H256::repeat_byte(1), 1);
        let child = tx(parent.txid(), 2);
        let template = template_with(vec![parent, child], 0);
        assert!(check_template(&template, &SelectionLimits::default(), &SubsidySchedule::default()).is_ok());
    }

    #[test]
    fn test_child_before_parent_rejected() {
        let parent = tx(H256::repeat_byte(1), 1);
        let child = tx(parent.txid(), 2);
        let template = template_with(vec![child, parent], 0);
        assert!(check_dependency_order(&template).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let a = tx(H256::repeat_byte(1), 1);
        let template = template_with(vec![a.clone(), a], 0);
        assert!(check_dependency_order(&template).is_err());
    }

    #[test]
    fn test_coinbase_value_mismatch() {
        let mut template = template_with(vec![], 50);
        assert!(check_coinbase(&template, &SubsidySchedule::default()).is_ok());

        template.total_fees = 49;
        assert!(check_coinbase(&template, &SubsidySchedule::default()).is_err());
    }

    #[test]
    fn test_budgets() {
        let template = template_with(vec![tx(H256::zero(), 1)], 0);
        let tight = SelectionLimits {
            max_block_size: 1_100,
            max_block_sigops: 100,
            ..SelectionLimits::default()
        };
        assert!(check_block_size(&template, &tight).is_err());
        assert!(check_sigops(&template, &tight).is_err());
        assert!(check_block_size(&template, &SelectionLimits::default()).is_ok());
    }
}
