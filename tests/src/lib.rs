//! # Quantum-Chain Test Suite
//!
//! Unified test crate for flows that span more than one crate.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Miner service against in-memory collaborators
//!     └── mining_flow.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qc-tests
//! cargo test -p qc-tests integration::
//! ```

#![allow(dead_code)]

pub mod integration;
