//! Compact difficulty encoding
//!
//! Headers carry the target as a 32-bit "compact" number: the top byte is a
//! base-256 exponent, the low 23 bits a mantissa and bit 23 a sign.
//!
//! **IMPORTANT**: the target is a CEILING:
//! - HIGHER target number = EASIER (more valid hashes below it)
//! - LOWER target number = HARDER (fewer valid hashes below it)

use primitive_types::U256;

/// Compact value decoded into its parts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecodedTarget {
    /// Decoded magnitude
    pub target: U256,
    /// Sign bit was set with a non-zero mantissa
    pub negative: bool,
    /// Magnitude does not fit in 256 bits
    pub overflow: bool,
}

/// Decode compact `bits` without judging the result.
pub fn decode_compact(bits: u32) -> DecodedTarget {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    let negative = word != 0 && bits & 0x0080_0000 != 0;

    let target = if overflow {
        U256::zero()
    } else if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3) as usize)
    };

    DecodedTarget {
        target,
        negative,
        overflow,
    }
}

/// Target usable for proof-of-work checks, or `None` when the bits encode a
/// negative, zero or overflowing value.
pub fn target_from_compact(bits: u32) -> Option<U256> {
    let decoded = decode_compact(bits);
    if decoded.negative || decoded.overflow || decoded.target.is_zero() {
        return None;
    }
    Some(decoded.target)
}

/// Human-readable difficulty for logs: leading zero bits the target demands.
pub fn describe_difficulty(target: U256) -> String {
    let zero_bits = 256 - target.bits();
    format!("{} leading zero bits (target {:#x})", zero_bits, target)
}
