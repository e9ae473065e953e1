//! Node error types.
//!
//! Errors handed to callers never carry the node address; host and port
//! only appear in logs.

use std::fmt;

use thiserror::Error;

/// Failure talking to the peer node.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The connection never became ready, or it closed.
    #[error("connection failed")]
    Unavailable,
    /// A request/response exchange missed its deadline.
    #[error("node did not respond in time")]
    Timeout,
}

impl NodeError {
    /// Error code surfaced to REST clients.
    pub fn code(self) -> &'static str {
        "ServiceUnavailable"
    }
}

/// Outcome of the challenge handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyResult {
    /// The peer was verified.
    Success = 0,
    /// An i/o error (or close) interrupted verification.
    IoError = 1,
    /// The peer sent malformed data.
    MalformedData = 2,
    /// The peer failed the challenge.
    FailedChallenge = 3,
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::IoError => "i/o error",
            Self::MalformedData => "malformed data",
            Self::FailedChallenge => "failed challenge",
        };
        f.write_str(name)
    }
}

/// A failed handshake.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("verify failed with {0}")]
pub struct VerifyError(pub VerifyResult);

impl From<VerifyError> for NodeError {
    fn from(_: VerifyError) -> Self {
        Self::Unavailable
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
