//! Channel subscriptions.
//!
//! A channel exists exactly while it has at least one subscriber. The
//! first subscriber activates it, the last one leaving deactivates it, and
//! [`ChannelCallbacks`] hear about both transitions once each.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use ferry_core::ClientId;

use super::connection::ClientConnection;
use crate::errors::ChannelError;

/// Live, read-only view of one channel's subscribers.
///
/// Handed to [`ChannelCallbacks::channel_activated`]; it keeps tracking the
/// channel as clients come and go.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<RwLock<IndexMap<ClientId, Arc<ClientConnection>>>>,
}

impl Subscribers {
    /// Current subscribers in subscription order.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().values().cloned().collect()
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether `client` is subscribed.
    pub fn contains(&self, client: &ClientId) -> bool {
        self.inner.read().contains_key(client)
    }

    fn insert(&self, client: Arc<ClientConnection>) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(&client.id) {
            return false;
        }
        let _ = inner.insert(client.id.clone(), client);
        true
    }

    fn remove(&self, client: &ClientId) -> bool {
        self.inner.write().shift_remove(client).is_some()
    }
}

/// Hooks fired by [`SubscriptionRegistry`] on channel transitions.
///
/// Called with the registry lock held; implementations must not call back
/// into the registry.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelCallbacks: Send + Sync {
    /// First subscriber arriving. An error rejects the subscription and the
    /// channel is not created.
    fn channel_activated(&self, channel: &str, subscribers: Subscribers)
    -> Result<(), ChannelError>;

    /// A client joined a channel.
    fn client_added(&self, channel: &str, client: &ClientConnection);

    /// Last subscriber left.
    fn channel_deactivated(&self, channel: &str);
}

/// Tracks which clients are subscribed to which channels.
pub struct SubscriptionRegistry {
    callbacks: Arc<dyn ChannelCallbacks>,
    channels: Mutex<IndexMap<String, Subscribers>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new(callbacks: Arc<dyn ChannelCallbacks>) -> Self {
        Self {
            callbacks,
            channels: Mutex::new(IndexMap::new()),
        }
    }

    /// Subscribe `client` to `channel`, activating the channel if needed.
    ///
    /// Subscribing twice is a no-op.
    pub fn add(&self, channel: &str, client: Arc<ClientConnection>) -> Result<(), ChannelError> {
        let mut channels = self.channels.lock();
        let subscribers = if let Some(subscribers) = channels.get(channel) {
            subscribers.clone()
        } else {
            let subscribers = Subscribers::default();
            self.callbacks
                .channel_activated(channel, subscribers.clone())?;
            let _ = channels.insert(channel.to_string(), subscribers.clone());
            debug!(channel, "channel activated");
            subscribers
        };

        if subscribers.insert(Arc::clone(&client)) {
            self.callbacks.client_added(channel, &client);
            debug!(channel, client_id = %client.id, "client subscribed");
        }
        Ok(())
    }

    /// Unsubscribe `client` from `channel`, deactivating the channel when it
    /// empties. Unknown channels and clients are ignored.
    pub fn delete(&self, channel: &str, client: &ClientId) {
        let mut channels = self.channels.lock();
        Self::delete_locked(&mut channels, self.callbacks.as_ref(), channel, client);
    }

    /// Channels `client` is subscribed to, in channel creation order.
    pub fn client_channels(&self, client: &ClientId) -> Vec<String> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(client))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Remove `client` from every channel.
    pub fn delete_client(&self, client: &ClientId) {
        let mut channels = self.channels.lock();
        let names: Vec<String> = channels.keys().cloned().collect();
        for channel in names {
            Self::delete_locked(&mut channels, self.callbacks.as_ref(), &channel, client);
        }
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Subscribers of `channel`, if it is live.
    pub fn subscribers(&self, channel: &str) -> Option<Subscribers> {
        self.channels.lock().get(channel).cloned()
    }

    fn delete_locked(
        channels: &mut IndexMap<String, Subscribers>,
        callbacks: &dyn ChannelCallbacks,
        channel: &str,
        client: &ClientId,
    ) {
        let Some(subscribers) = channels.get(channel) else {
            return;
        };
        if !subscribers.remove(client) || !subscribers.is_empty() {
            return;
        }
        let _ = channels.shift_remove(channel);
        debug!(channel, "all subscriptions to channel have been removed");
        callbacks.channel_deactivated(channel);
    }
}
