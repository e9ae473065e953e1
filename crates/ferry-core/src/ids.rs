//! Opaque identifiers handed out by the gateway.
//!
//! Client ids are the only key the subscription registry knows a WebSocket
//! client by. They are 20 bytes from the thread-local CSPRNG, base32 encoded
//! to 32 characters.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::encoding::base32_encode;

/// Number of random bytes behind a [`ClientId`].
pub const CLIENT_ID_BYTES: usize = 20;

/// Length of an encoded [`ClientId`].
pub const CLIENT_ID_LEN: usize = 32;

/// Unique identifier for a connected WebSocket client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; CLIENT_ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(base32_encode(&bytes))
    }

    /// Wrap an existing value (tests, logs replay).
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for ClientId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}
