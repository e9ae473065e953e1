//! Process-wide entity event bus and the bridge feeding it.
//!
//! [`EntityBridge`] holds the only subscription to the external
//! [`ChangeFeed`] and republishes each change on the [`EntityBus`]. Any
//! number of listeners attach to the bus without touching the feed.

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::feed::{ChangeFeed, ChangeFilter, FeedError};
use crate::metrics::{BUS_EVENTS_TOTAL, BUS_LAGGED_TOTAL};

/// Kind published when the upstream feed reports an error.
pub const ERROR_KIND: &str = "error";

/// Default number of events buffered per listener.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// An event on the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct BusEvent {
    /// Event name (`block`, `error`, ...).
    pub kind: Arc<str>,
    /// Entity the event concerns, when it is scoped to one (an address).
    pub key: Option<Arc<str>>,
    /// Event payload.
    pub data: Arc<Value>,
}

impl BusEvent {
    /// Unscoped event.
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: Arc::from(kind),
            key: None,
            data: Arc::new(data),
        }
    }

    /// Event scoped to `key`.
    pub fn keyed(kind: &str, key: &str, data: Value) -> Self {
        Self {
            key: Some(Arc::from(key)),
            ..Self::new(kind, data)
        }
    }
}

/// Multi-listener event bus.
#[derive(Clone)]
pub struct EntityBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EntityBus {
    /// Bus buffering `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many listeners were attached.
    pub fn publish(&self, event: BusEvent) -> usize {
        counter!(BUS_EVENTS_TOTAL, "kind" => event.kind.to_string()).increment(1);
        self.tx.send(event).unwrap_or(0)
    }

    /// Publish an unscoped event of `kind`.
    pub fn emit(&self, kind: &str, data: Value) -> usize {
        self.publish(BusEvent::new(kind, data))
    }

    /// Listener for every event.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Listener for the given kinds only.
    pub fn listen(&self, kinds: &[&str]) -> BusListener {
        BusListener {
            rx: self.tx.subscribe(),
            kinds: kinds.iter().map(|kind| Arc::from(*kind)).collect(),
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EntityBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// A bus listener filtered by event kind.
pub struct BusListener {
    rx: broadcast::Receiver<BusEvent>,
    kinds: Vec<Arc<str>>,
}

impl BusListener {
    /// Next matching event; `None` once the bus is gone.
    ///
    /// A listener that falls behind skips the overwritten events.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.kinds.contains(&event.kind) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus listener lagged, dropped events");
                    counter!(BUS_LAGGED_TOTAL).increment(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Republishes one filtered change subscription on the bus.
pub struct EntityBridge {
    feed: Arc<dyn ChangeFeed>,
    filter: ChangeFilter,
    kind: String,
    bus: EntityBus,
}

impl EntityBridge {
    /// Bridge changes matching `filter` to `kind` events on `bus`.
    pub fn new(feed: Arc<dyn ChangeFeed>, filter: ChangeFilter, kind: &str, bus: EntityBus) -> Self {
        Self {
            feed,
            filter,
            kind: kind.to_string(),
            bus,
        }
    }

    /// Subscribe to the feed and forward until it ends.
    ///
    /// Only the subscription itself can fail; errors inside the feed become
    /// [`ERROR_KIND`] events.
    #[instrument(skip_all, fields(kind = %self.kind, namespace = %self.filter.namespace))]
    pub async fn run(self) -> Result<(), FeedError> {
        let mut changes = self.feed.subscribe(self.filter.clone()).await?;
        info!("entity bridge subscribed");

        while let Some(item) = changes.next().await {
            match item {
                Ok(change) => {
                    let listeners = self.bus.emit(&self.kind, change.document);
                    debug!(listeners, "change published");
                }
                Err(e) => {
                    warn!(error = %e, "change feed error");
                    let _ = self.bus.emit(ERROR_KIND, json!({ "message": e.to_string() }));
                }
            }
        }

        info!("change feed ended");
        Ok(())
    }
}
