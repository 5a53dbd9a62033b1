//! Hashing utilities for block production
//!
//! Hashes and nonces travel as [`H256`] in serialized byte order. Target
//! comparisons read them as little-endian 256-bit integers.

use primitive_types::{H256, U256};
use sha2::{Digest, Sha256};

/// Interpret a serialized hash as a 256-bit integer.
#[inline]
pub fn hash_to_u256(hash: &H256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Inverse of [`hash_to_u256`].
#[inline]
pub fn u256_to_hash(value: U256) -> H256 {
    let mut bytes = [0u8; 32];
    value.to_little_endian(&mut bytes);
    H256::from(bytes)
}

/// Check if hash meets difficulty target
///
/// Returns true if hash <= target
#[inline]
pub fn meets_target(hash: &H256, target: U256) -> bool {
    hash_to_u256(hash) <= target
}

/// Seed handed to search strategies: `sha256(preimage ‖ nonce)`.
pub fn search_seed(preimage: &[u8], nonce: &H256) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(preimage);
    hasher.update(nonce.as_bytes());
    hasher.finalize().into()
}

/// Candidate witness number `index` derived from a search seed.
#[inline]
pub fn derive_witness(seed: &[u8; 32], index: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(index.to_le_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_hash_conversion() {
        let value = U256::from(0x1234_5678u64) << 200;
        assert_eq!(hash_to_u256(&u256_to_hash(value)), value);

        // Low-order byte first in serialized form.
        let one = u256_to_hash(U256::one());
        assert_eq!(one.as_bytes()[0], 1);
        assert_eq!(one.as_bytes()[31], 0);
    }

    #[test]
    fn test_meets_target() {
        assert!(meets_target(&H256::zero(), U256::zero()));
        assert!(meets_target(&H256::repeat_byte(0xff), U256::MAX));
        assert!(!meets_target(&H256::repeat_byte(0xff), U256::from(1)));

        let mut bytes = [0u8; 32];
        bytes[0] = 2;
        assert!(!meets_target(&H256::from(bytes), U256::from(1)));
        assert!(meets_target(&H256::from(bytes), U256::from(2)));
    }

    #[test]
    fn test_seed_depends_on_nonce() {
        let preimage = [7u8; 108];
        let a = search_seed(&preimage, &H256::zero());
        let b = search_seed(&preimage, &H256::from_low_u64_be(1));
        assert_ne!(a, b);
        assert_eq!(a, search_seed(&preimage, &H256::zero()));
    }

    #[test]
    fn test_witnesses_differ_by_index() {
        let seed = [1u8; 32];
        assert_ne!(derive_witness(&seed, 0), derive_witness(&seed, 1));
        assert_eq!(derive_witness(&seed, 5), derive_witness(&seed, 5));
    }
}
