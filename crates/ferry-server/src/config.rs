//! Server configuration.

use std::time::Duration;

use ferry_settings::FerrySettings;

use crate::bridge::channels::DEFAULT_NETWORK_ID;
use crate::websocket::session::SessionOptions;

/// Configuration for the gateway server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Let address channels go without an address.
    pub allow_optional_address: bool,
    /// Network identifier for namespace alias addresses.
    pub network_id: u8,
    /// Per-session tunables.
    pub session: SessionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            allow_optional_address: false,
            network_id: DEFAULT_NETWORK_ID,
            session: SessionOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    ///
    /// Zero intervals are raised to one millisecond and the heartbeat
    /// timeout is never shorter than the interval.
    pub fn from_settings(settings: &FerrySettings) -> Self {
        let server = &settings.server;
        let interval = Duration::from_millis(server.heartbeat_interval_ms.max(1));
        let timeout = Duration::from_millis(server.heartbeat_timeout_ms).max(interval);
        Self {
            host: server.host.clone(),
            port: server.port,
            max_message_size: server.max_message_size,
            allow_optional_address: settings.websocket.allow_optional_address,
            network_id: settings.websocket.network_id,
            session: SessionOptions {
                queue_size: server.client_queue_size.max(1),
                heartbeat_interval: interval,
                heartbeat_timeout: timeout,
            },
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
