//! # ferry-node
//!
//! Authenticated connections to the peer node.
//!
//! - [`ConnectionService::lease`] hands out one shared, cached connection and
//!   re-dials lazily after it closes
//! - [`ConnectionService::single_use`] opens a dedicated connection for one
//!   [`SingleUseConnection::push_pull`] exchange
//! - [`ChallengeAuthenticator`] runs the Ed25519 challenge handshake on every
//!   new transport

#![deny(unsafe_code)]

pub mod auth;
pub mod challenge;
pub mod connection;
pub mod errors;
pub mod metrics;
pub mod service;
pub mod transport;

pub use auth::{Authenticator, ChallengeAuthenticator};
pub use connection::{Connection, SingleUseConnection};
pub use errors::{NodeError, Result, VerifyError, VerifyResult};
pub use service::{ConnectionService, ServiceOptions};
pub use transport::{BoxTransport, Dialer, NodeFramed, NodeIdentity, TcpDialer};
