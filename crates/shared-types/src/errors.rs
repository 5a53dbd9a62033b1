//! # Error Types
//!
//! Defines error types shared across subsystems.

use thiserror::Error;

/// Errors raised while decoding canonical chain encodings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    #[error("Unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A compact-size integer used a longer encoding than necessary.
    #[error("Non-canonical compact size: {0}")]
    NonCanonicalCompactSize(u64),

    /// A declared length does not fit in memory on this platform.
    #[error("Length overflow: {0}")]
    LengthOverflow(u64),

    /// Bytes were left over after the value was decoded.
    #[error("Trailing bytes after value: {0}")]
    TrailingBytes(usize),
}
