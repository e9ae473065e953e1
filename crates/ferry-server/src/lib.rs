//! # ferry-server
//!
//! Axum HTTP + `WebSocket` gateway surface.
//!
//! - `WebSocket` sessions: uid handshake, subscribe/unsubscribe control
//!   messages, heartbeat, per-client outbound queues
//! - Subscription registry with channel activation callbacks
//! - Entity bus bridging an external change feed into channels
//! - HTTP endpoints: health, node health, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{ApiError, ChannelError, ProtocolError};
pub use server::FerryServer;
pub use shutdown::ShutdownCoordinator;
