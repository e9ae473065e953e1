//! # ferry-core
//!
//! Foundation pieces shared by every ferry crate:
//!
//! - [`ids::ClientId`]: opaque CSPRNG-backed WebSocket client identifiers
//! - [`encoding`]: RFC 4648 base32
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod encoding;
pub mod ids;
pub mod logging;

pub use ids::ClientId;
