//! Fan-out of channel data to subscribed clients.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::registry::Subscribers;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Sends one channel's data to all of its current subscribers.
#[derive(Clone)]
pub struct Broadcaster {
    channel: Arc<str>,
    subscribers: Subscribers,
}

impl Broadcaster {
    /// Broadcaster for `channel`.
    pub fn new(channel: &str, subscribers: Subscribers) -> Self {
        Self {
            channel: Arc::from(channel),
            subscribers,
        }
    }

    /// Channel this broadcaster serves.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Format `data` once as `{"topic": channel, "data": data}` and queue it
    /// for every subscriber.
    ///
    /// A subscriber that cannot take the message is closed; the others still
    /// receive it. Returns the number of successful deliveries.
    pub fn send(&self, data: &Value) -> usize {
        let view = json!({ "topic": &*self.channel, "data": data });
        let text = match serde_json::to_string(&view) {
            Ok(text) => Arc::new(text),
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "failed to serialize channel data");
                return 0;
            }
        };

        let mut delivered = 0;
        for client in self.subscribers.snapshot() {
            if client.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                warn!(
                    channel = %self.channel,
                    client_id = %client.id,
                    "error sending data to websocket, closing client"
                );
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                client.close();
            }
        }
        debug!(channel = %self.channel, delivered, "broadcast channel data");
        delivered
    }

    /// Close every current subscriber.
    pub fn close(&self) {
        for client in self.subscribers.snapshot() {
            client.close();
        }
    }
}
