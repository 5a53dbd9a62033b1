//! Utility modules for block production

pub mod hashing;

pub use hashing::{derive_witness, hash_to_u256, meets_target, search_seed, u256_to_hash};
