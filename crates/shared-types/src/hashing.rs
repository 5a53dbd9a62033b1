//! Hash functions used for chain identifiers.

use primitive_types::H256;
use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256 of `data`, as a hash in serialized byte order.
#[inline]
pub fn sha256d(data: &[u8]) -> H256 {
    H256::from(sha256(&sha256(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256d_is_double_sha256() {
        let once = sha256(b"quantum");
        let twice = sha256(&once);
        assert_eq!(sha256d(b"quantum"), H256::from(twice));
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(digest[0], 0xba);
        assert_eq!(digest[31], 0xad);
    }
}
