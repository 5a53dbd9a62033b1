//! # Script
//!
//! Locking/unlocking scripts as opaque byte strings, plus the small amount of
//! structure block production needs: a builder for coinbase and payout
//! scripts, instruction iteration, and signature-operation counting.
//!
//! Script *execution* is not implemented here; it belongs to the validation
//! subsystem.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

/// Push an empty byte vector (numeric zero).
pub const OP_0: u8 = 0x00;
/// Next byte is the push length.
pub const OP_PUSHDATA1: u8 = 0x4c;
/// Next two bytes are the push length.
pub const OP_PUSHDATA2: u8 = 0x4d;
/// Next four bytes are the push length.
pub const OP_PUSHDATA4: u8 = 0x4e;
/// Push numeric -1.
pub const OP_1NEGATE: u8 = 0x4f;
/// Push numeric 1.
pub const OP_1: u8 = 0x51;
/// Push numeric 16.
pub const OP_16: u8 = 0x60;
/// Duplicate the top stack item.
pub const OP_DUP: u8 = 0x76;
/// Push 1 if the top two items are equal.
pub const OP_EQUAL: u8 = 0x87;
/// `OP_EQUAL` followed by `OP_VERIFY`.
pub const OP_EQUALVERIFY: u8 = 0x88;
/// RIPEMD160(SHA256(x)).
pub const OP_HASH160: u8 = 0xa9;
/// Verify a single signature.
pub const OP_CHECKSIG: u8 = 0xac;
/// `OP_CHECKSIG` followed by `OP_VERIFY`.
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
/// Verify m-of-n signatures.
pub const OP_CHECKMULTISIG: u8 = 0xae;
/// `OP_CHECKMULTISIG` followed by `OP_VERIFY`.
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Sigops charged for a multisig whose key count is not statically known.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// A serialized script.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(#[serde_as(as = "Bytes")] Vec<u8>);

/// One decoded script instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// The opcode byte (for pushes, the push opcode itself).
    pub opcode: u8,
    /// Pushed data; empty for non-push opcodes.
    pub data: &'a [u8],
}

impl Script {
    /// Empty script.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw script bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Script length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the script has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a bare opcode.
    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.0.push(opcode);
        self
    }

    /// Append a small integer the way `CScript << int64` does: `OP_0`,
    /// `OP_1NEGATE` and `OP_1..OP_16` use their dedicated opcodes, anything
    /// else is pushed as minimally-encoded script-number bytes.
    pub fn push_int(self, n: i64) -> Self {
        match n {
            0 => self.push_opcode(OP_0),
            -1 => self.push_opcode(OP_1NEGATE),
            1..=16 => self.push_opcode(OP_1 + (n as u8) - 1),
            _ => self.push_slice(&encode_script_num(n)),
        }
    }

    /// Append a script number as a data push, even for values that have a
    /// dedicated opcode. Zero becomes an empty push.
    pub fn push_num(self, n: i64) -> Self {
        self.push_slice(&encode_script_num(n))
    }

    /// Append a data push using the smallest push opcode.
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.0.push(len as u8);
        } else if len <= 0xff {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else if len <= 0xffff {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OP_PUSHDATA4);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
        self
    }

    /// `OP_DUP OP_HASH160 <key_hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn pay_to_pubkey_hash(key_hash: &[u8; 20]) -> Self {
        Self::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(key_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    }

    /// True for the exact `OP_HASH160 <20 bytes> OP_EQUAL` template.
    pub fn is_pay_to_script_hash(&self) -> bool {
        self.0.len() == 23 && self.0[0] == OP_HASH160 && self.0[1] == 0x14 && self.0[22] == OP_EQUAL
    }

    /// Iterate instructions; iteration stops at the first malformed push.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            bytes: &self.0,
            pos: 0,
            failed: false,
        }
    }

    /// True when every instruction is a push (numeric opcodes included) and
    /// the script parses completely.
    pub fn is_push_only(&self) -> bool {
        let mut iter = self.instructions();
        let all_push = iter.by_ref().all(|ins| ins.opcode <= OP_16);
        all_push && !iter.failed
    }

    /// Count signature operations.
    ///
    /// With `accurate == false` every multisig is charged
    /// [`MAX_PUBKEYS_PER_MULTISIG`]; with `accurate == true` a preceding
    /// `OP_1..OP_16` supplies the key count.
    pub fn sigop_count(&self, accurate: bool) -> u32 {
        let mut count = 0u32;
        let mut last_opcode: Option<u8> = None;
        for ins in self.instructions() {
            match ins.opcode {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    count += match last_opcode {
                        Some(op) if accurate && (OP_1..=OP_16).contains(&op) => {
                            (op - OP_1 + 1) as u32
                        }
                        _ => MAX_PUBKEYS_PER_MULTISIG as u32,
                    };
                }
                _ => {}
            }
            last_opcode = Some(ins.opcode);
        }
        count
    }

    /// Sigops of the redeem script carried by `script_sig`, which spends this
    /// (P2SH) script. Zero when this is not P2SH or `script_sig` is not
    /// push-only.
    pub fn p2sh_sigop_count(&self, script_sig: &Script) -> u32 {
        if !self.is_pay_to_script_hash() {
            return self.sigop_count(true);
        }
        let mut redeem: &[u8] = &[];
        for ins in script_sig.instructions() {
            if ins.opcode > OP_16 {
                return 0;
            }
            redeem = ins.data;
        }
        Script::from_bytes(redeem.to_vec()).sigop_count(true)
    }
}

/// Iterator over script instructions.
pub struct Instructions<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        let opcode = self.bytes[self.pos];
        self.pos += 1;

        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => self.read_len(1)?,
            OP_PUSHDATA2 => self.read_len(2)?,
            OP_PUSHDATA4 => self.read_len(4)?,
            _ => 0,
        };
        if self.bytes.len() - self.pos < len {
            self.failed = true;
            return None;
        }
        let data = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Some(Instruction { opcode, data })
    }
}

impl Instructions<'_> {
    fn read_len(&mut self, width: usize) -> Option<usize> {
        if self.bytes.len() - self.pos < width {
            self.failed = true;
            return None;
        }
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(&self.bytes[self.pos..self.pos + width]);
        self.pos += width;
        Some(u32::from_le_bytes(buf) as usize)
    }
}

/// Minimal little-endian sign-magnitude encoding used for script numbers.
pub fn encode_script_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_num_encoding() {
        assert!(encode_script_num(0).is_empty());
        assert_eq!(encode_script_num(1), vec![0x01]);
        assert_eq!(encode_script_num(-1), vec![0x81]);
        assert_eq!(encode_script_num(127), vec![0x7f]);
        assert_eq!(encode_script_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_script_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_script_num(500_000), vec![0x20, 0xa1, 0x07]);
    }

    #[test]
    fn test_push_int_uses_small_opcodes() {
        assert_eq!(Script::new().push_int(0).as_bytes(), &[OP_0]);
        assert_eq!(Script::new().push_int(16).as_bytes(), &[OP_16]);
        assert_eq!(Script::new().push_int(17).as_bytes(), &[0x01, 0x11]);
        // push_num always emits a data push
        assert_eq!(Script::new().push_num(1).as_bytes(), &[0x01, 0x01]);
        assert_eq!(Script::new().push_num(0).as_bytes(), &[0x00]);
    }

    #[test]
    fn test_pushdata_variants() {
        let script = Script::new().push_slice(&[0xab; 80]);
        assert_eq!(script.as_bytes()[0], OP_PUSHDATA1);
        assert_eq!(script.as_bytes()[1], 80);

        let script = Script::new().push_slice(&[0xab; 300]);
        assert_eq!(script.as_bytes()[0], OP_PUSHDATA2);

        let ins: Vec<_> = script.instructions().collect();
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0].data.len(), 300);
    }

    #[test]
    fn test_p2pkh_shape_and_sigops() {
        let script = Script::pay_to_pubkey_hash(&[7u8; 20]);
        assert_eq!(script.len(), 25);
        assert!(!script.is_pay_to_script_hash());
        assert_eq!(script.sigop_count(false), 1);
    }

    #[test]
    fn test_multisig_sigop_counting() {
        let script = Script::new()
            .push_int(2)
            .push_slice(&[2u8; 33])
            .push_slice(&[3u8; 33])
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG);
        assert_eq!(script.sigop_count(false), 20);
        assert_eq!(script.sigop_count(true), 2);
    }

    #[test]
    fn test_p2sh_redeem_sigops() {
        let redeem = Script::new()
            .push_int(1)
            .push_slice(&[2u8; 33])
            .push_int(1)
            .push_opcode(OP_CHECKMULTISIG);
        let p2sh = Script::new()
            .push_opcode(OP_HASH160)
            .push_slice(&[9u8; 20])
            .push_opcode(OP_EQUAL);
        assert!(p2sh.is_pay_to_script_hash());

        let script_sig = Script::new().push_slice(&[0u8; 72]).push_slice(redeem.as_bytes());
        assert_eq!(p2sh.p2sh_sigop_count(&script_sig), 1);

        let non_push_sig = Script::new().push_opcode(OP_DUP);
        assert_eq!(p2sh.p2sh_sigop_count(&non_push_sig), 0);
    }

    #[test]
    fn test_truncated_push_stops_iteration() {
        let script = Script::from_bytes(vec![0x05, 0x01, 0x02]);
        assert_eq!(script.instructions().count(), 0);
        assert!(!script.is_push_only());
    }
}
