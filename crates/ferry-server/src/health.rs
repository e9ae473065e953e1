//! Bodies of the `/health` and `/node/health` endpoints.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};

/// Gateway liveness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `"ok"` whenever the server answers.
    pub status: &'static str,
    /// Whole seconds since startup.
    pub uptime_secs: u64,
    /// Connected WebSocket clients.
    pub connections: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
}

impl HealthReport {
    /// Snapshot the live counters.
    pub fn collect(started: Instant, connections: usize, channels: usize) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections,
            channels,
        }
    }
}

/// Whether the peer node answered a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// The node completed a request/response exchange.
    Up,
    /// The node could not be reached or stayed silent.
    Down,
}

impl NodeStatus {
    /// Label used in responses and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// `{"status": {"apiNode": "up" | "down"}}`.
    pub fn body(self) -> Value {
        json!({ "status": { "apiNode": self.as_str() } })
    }
}
