//! Settings sections.
//!
//! Every section deserializes with `#[serde(default)]` so a settings file
//! only needs to carry the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FerrySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Peer node the gateway talks to.
    pub node: NodeSettings,
    /// Gateway key pair used in the node handshake.
    pub identity: IdentitySettings,
    /// WebSocket channel policy.
    pub websocket: WebSocketSettings,
    /// Change feed bridged onto the entity bus.
    pub feed: FeedSettings,
    /// Node push endpoint bridged onto the entity bus.
    pub push: PushSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per WebSocket client.
    pub client_queue_size: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_message_size: 64 * 1024,
            client_queue_size: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

/// Peer node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSettings {
    /// Node host.
    pub host: String,
    /// Node port.
    pub port: u16,
    /// Node public key, hex encoded (32 bytes).
    pub public_key: String,
    /// Deadline for one-shot request/response exchanges in milliseconds.
    pub timeout_ms: u64,
    /// Optional bound on dial + handshake in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,
    /// Largest packet accepted from the node in bytes.
    pub max_packet_size: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7900,
            public_key: String::new(),
            timeout_ms: 1_000,
            handshake_timeout_ms: None,
            max_packet_size: 16 * 1024 * 1024,
        }
    }
}

impl NodeSettings {
    /// Decode the configured node public key.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        decode_key("node.publicKey", &self.public_key)
    }
}

/// Gateway identity settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Ed25519 private key seed, hex encoded (32 bytes).
    ///
    /// Empty means a fresh key is generated at startup.
    pub private_key: String,
}

impl IdentitySettings {
    /// Decode the private key seed, `None` when not configured.
    pub fn private_key_bytes(&self) -> Result<Option<[u8; 32]>> {
        if self.private_key.is_empty() {
            return Ok(None);
        }
        decode_key("identity.privateKey", &self.private_key).map(Some)
    }
}

/// WebSocket channel policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Allow address channels (`confirmedAdded`, `status`, ...) without an
    /// address parameter.
    pub allow_optional_address: bool,
    /// Network identifier used to derive namespace alias addresses.
    pub network_id: u8,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            allow_optional_address: false,
            network_id: 0x98,
        }
    }
}

/// Change feed filter bridged onto the entity bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Source namespace (`database.collection`).
    pub namespace: String,
    /// Operation code to keep (`i` for inserts).
    pub operation: String,
    /// Event kind published on the bus for each change.
    pub event: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            namespace: "catapult.blocks".to_string(),
            operation: "i".to_string(),
            event: "block".to_string(),
        }
    }
}

/// Node push endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushSettings {
    /// Bridge pushed entities at all.
    pub enabled: bool,
    /// Push endpoint host.
    pub host: String,
    /// Push endpoint port.
    pub port: u16,
    /// Deadline for connecting in milliseconds.
    pub connect_timeout_ms: u64,
    /// Pause before reconnecting after the endpoint goes away, in
    /// milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 7902,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl PushSettings {
    /// `host:port` of the push endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn decode_key(name: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| SettingsError::InvalidValue(format!("{name} is not hex: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        SettingsError::InvalidValue(format!("{name} must be 32 bytes, got {}", bytes.len()))
    })
}
