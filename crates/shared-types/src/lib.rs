//! # Shared Types Crate
//!
//! Chain primitives shared by every Quantum-Chain subsystem: transactions,
//! blocks, scripts, unspent-output records and their canonical encoding.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: hashed and size-accounted byte layouts are
//!   defined once, in [`encoding`], and every subsystem uses them.
//! - **Consensus-exact encoding**: little-endian integers and compact-size
//!   prefixes, so txids, merkle roots and header hashes are reproducible.
//! - **No execution here**: scripts are data; validation lives elsewhere.

pub mod encoding;
pub mod entities;
pub mod errors;
pub mod hashing;
pub mod script;

pub use encoding::{Decodable, Encodable, Reader};
pub use entities::*;
pub use errors::*;
pub use hashing::{sha256, sha256d};
pub use script::Script;
