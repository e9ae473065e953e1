//! Wire error types.

use thiserror::Error;

/// Errors raised while framing or decoding packets.
#[derive(Debug, Error)]
pub enum WireError {
    /// A header declared a total size smaller than the header itself.
    #[error("packet size {0} is smaller than the header")]
    SizeTooSmall(u32),
    /// A header declared a total size above the configured maximum.
    #[error("packet size {size} exceeds maximum {max}")]
    SizeTooLarge {
        /// Declared packet size.
        size: u32,
        /// Configured maximum.
        max: u32,
    },
    /// A payload is too large to be described by a `u32` size field.
    #[error("payload of {0} bytes cannot be framed")]
    PayloadTooLarge(usize),
    /// A state path request was built with a non state path type.
    #[error("packet type {0:#x} is not a state path type")]
    NotStatePath(u32),
    /// Underlying transport error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
