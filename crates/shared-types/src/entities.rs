//! # Core Domain Entities
//!
//! UTXO chain entities shared by every subsystem.
//!
//! ## Clusters
//!
//! - **Transactions**: `OutPoint`, `TxIn`, `TxOut`, `Transaction`
//! - **Blocks**: `BlockHeader`, `Block`
//! - **Unspent outputs**: `Coins`
//!
//! Hashes are [`H256`] values holding the 32 serialized bytes. When a hash is
//! compared against a difficulty target it is read as a little-endian
//! 256-bit integer.

use crate::encoding::{
    compact_size_len, write_compact_size, write_var_bytes, Decodable, Encodable, Reader,
};
use crate::errors::DecodeError;
use crate::hashing::sha256d;
use crate::script::Script;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

pub use primitive_types::{H256, U256};

/// Amount in base units.
pub type Amount = i64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// Upper bound on any single amount.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Lock times below this are block heights; at or above, UNIX timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence value that opts an input out of lock-time enforcement.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

/// Serialized length of a header preimage (everything but nonce and solution).
pub const HEADER_PREIMAGE_SIZE: usize = 4 + 32 + 32 + 32 + 4 + 4;

// =============================================================================
// CLUSTER A: TRANSACTIONS
// =============================================================================

/// Reference to a specific output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction that created the output.
    pub txid: H256,
    /// Output index within that transaction.
    pub vout: u32,
}

impl OutPoint {
    /// Create an outpoint.
    pub fn new(txid: H256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The outpoint a coinbase input references.
    pub fn null() -> Self {
        Self {
            txid: H256::zero(),
            vout: u32::MAX,
        }
    }

    /// True for the coinbase placeholder outpoint.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent.
    pub prevout: OutPoint,
    /// Unlocking script.
    pub script_sig: Script,
    /// Sequence number.
    pub sequence: u32,
}

impl TxIn {
    /// Input spending `prevout` with an unlocking script and final sequence.
    pub fn new(prevout: OutPoint, script_sig: Script) -> Self {
        Self {
            prevout,
            script_sig,
            sequence: SEQUENCE_FINAL,
        }
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in base units.
    pub value: Amount,
    /// Locking script.
    pub script_pubkey: Script,
}

/// A transparent UTXO transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction format version.
    pub version: i32,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Earliest height or time at which the transaction may be mined.
    pub lock_time: u32,
}

impl Transaction {
    /// Transaction id: double SHA-256 of the canonical encoding.
    pub fn txid(&self) -> H256 {
        sha256d(&self.encode())
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        self.encoded_len()
    }

    /// A coinbase has exactly one input and that input spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of output values.
    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Whether the transaction may be included in a block at `height`, with
    /// time-based lock times compared against `cutoff_time`.
    pub fn is_final(&self, height: u32, cutoff_time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let threshold = if self.lock_time < LOCKTIME_THRESHOLD {
            height as i64
        } else {
            cutoff_time
        };
        if (self.lock_time as i64) < threshold {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
    }

    /// Signature operations counted without looking at spent outputs.
    pub fn legacy_sigop_count(&self) -> u32 {
        let inputs: u32 = self
            .inputs
            .iter()
            .map(|input| input.script_sig.sigop_count(false))
            .sum();
        let outputs: u32 = self
            .outputs
            .iter()
            .map(|output| output.script_pubkey.sigop_count(false))
            .sum();
        inputs + outputs
    }

    /// Size used for priority: each input's unlocking script (up to 110
    /// bytes) plus 41 bytes of fixed input overhead is discounted, so
    /// spending old outputs is not penalised for the bytes it needs.
    pub fn modified_size(&self, size: usize) -> usize {
        self.inputs.iter().fold(size, |acc, input| {
            let offset = 41 + input.script_sig.len().min(110);
            if acc > offset {
                acc - offset
            } else {
                acc
            }
        })
    }

    /// Input priority normalised by modified size.
    pub fn compute_priority(&self, input_priority: f64, size: usize) -> f64 {
        match self.modified_size(size) {
            0 => 0.0,
            modified => input_priority / modified as f64,
        }
    }
}

impl Encodable for OutPoint {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: reader.read_h256()?,
            vout: reader.read_u32()?,
        })
    }
}

impl Encodable for Transaction {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.encode_to(out);
            write_var_bytes(out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(out, output.script_pubkey.as_bytes());
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl Decodable for Transaction {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let version = reader.read_i32()?;

        let input_count = reader.read_compact_size()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxIn {
                prevout: OutPoint::decode_from(reader)?,
                script_sig: Script::from_bytes(reader.read_var_bytes()?),
                sequence: reader.read_u32()?,
            });
        }

        let output_count = reader.read_compact_size()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOut {
                value: reader.read_i64()?,
                script_pubkey: Script::from_bytes(reader.read_var_bytes()?),
            });
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time: reader.read_u32()?,
        })
    }
}

// =============================================================================
// CLUSTER B: BLOCKS
// =============================================================================

/// Block header.
///
/// Field order is the serialization order.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block.
    pub prev_block: H256,
    /// Merkle root of the block's transaction ids.
    pub merkle_root: H256,
    /// Auxiliary hash; zero for regular blocks.
    pub reserved: H256,
    /// Block timestamp (UNIX seconds).
    pub time: u32,
    /// Difficulty target in compact form.
    pub bits: u32,
    /// 256-bit nonce.
    pub nonce: H256,
    /// Proof-of-work solution bytes.
    #[serde_as(as = "Bytes")]
    pub solution: Vec<u8>,
}

impl BlockHeader {
    /// Every field except nonce and solution, in serialization order.
    ///
    /// This is the input the proof-of-work search hashes over.
    pub fn preimage_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_PREIMAGE_SIZE);
        self.write_preimage(&mut out);
        out
    }

    fn write_preimage(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_block.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(self.reserved.as_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
    }

    /// Read a header preimage back. Nonce is zero and solution empty.
    pub fn decode_preimage(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let header = Self::read_preimage(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    fn read_preimage(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_block: reader.read_h256()?,
            merkle_root: reader.read_h256()?,
            reserved: reader.read_h256()?,
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: H256::zero(),
            solution: Vec::new(),
        })
    }

    /// Block hash: double SHA-256 of the full header encoding.
    pub fn hash(&self) -> H256 {
        sha256d(&self.encode())
    }
}

impl Encodable for BlockHeader {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.write_preimage(out);
        out.extend_from_slice(self.nonce.as_bytes());
        write_var_bytes(out, &self.solution);
    }

    fn encoded_len(&self) -> usize {
        HEADER_PREIMAGE_SIZE
            + 32
            + compact_size_len(self.solution.len() as u64)
            + self.solution.len()
    }
}

impl Decodable for BlockHeader {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut header = Self::read_preimage(reader)?;
        header.nonce = reader.read_h256()?;
        header.solution = reader.read_var_bytes()?;
        Ok(header)
    }
}

/// A full block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: BlockHeader,
    /// Transactions; index 0 is the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Merkle root over transaction ids. An odd level duplicates its last
    /// node; an empty block has a zero root.
    pub fn merkle_root(&self) -> H256 {
        let txids: Vec<H256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(txids)
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        self.encoded_len()
    }
}

/// Merkle root of a list of leaf hashes.
pub fn merkle_root(mut level: Vec<H256>) -> H256 {
    if level.is_empty() {
        return H256::zero();
    }
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                sha256d(&buf)
            })
            .collect();
    }
    level[0]
}

impl Encodable for Block {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header.encode_to(out);
        write_compact_size(out, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_to(out);
        }
    }
}

impl Decodable for Block {
    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode_from(reader)?;
        let count = reader.read_compact_size()?;
        let mut transactions = Vec::new();
        for _ in 0..count {
            transactions.push(Transaction::decode_from(reader)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

// =============================================================================
// CLUSTER C: UNSPENT OUTPUTS
// =============================================================================

/// Unspent outputs of one transaction, as held by a coin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coins {
    /// Height of the block that included the transaction.
    pub height: u32,
    /// Whether the transaction was a coinbase.
    pub is_coinbase: bool,
    /// Outputs by index; `None` once spent.
    pub outputs: Vec<Option<TxOut>>,
}

impl Coins {
    /// All outputs of `tx`, unspent, created at `height`.
    pub fn from_transaction(tx: &Transaction, height: u32) -> Self {
        Self {
            height,
            is_coinbase: tx.is_coinbase(),
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        }
    }

    /// Unspent output at `index`.
    pub fn output(&self, index: u32) -> Option<&TxOut> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    /// Mark the output at `index` spent, returning it.
    pub fn spend(&mut self, index: u32) -> Option<TxOut> {
        self.outputs.get_mut(index as usize).and_then(Option::take)
    }

    /// True once every output is spent.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }
}
