//! Channel naming and the registry callbacks that feed channels from the
//! entity bus.
//!
//! Channel names are `category` or `category/param`:
//!
//! | category             | param                           |
//! |----------------------|---------------------------------|
//! | `block`              | none                            |
//! | `finalizedBlock`     | none                            |
//! | `confirmedAdded`     | address or namespace id         |
//! | `unconfirmedAdded`   | address or namespace id         |
//! | `unconfirmedRemoved` | address or namespace id         |
//! | `status`             | address or namespace id         |
//!
//! Address channels accept a missing param only when optional addresses are
//! allowed. A namespace id param is matched through its alias address on
//! the configured network.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use metrics::gauge;
use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use ferry_core::encoding::{base32_encode, is_base32};

use super::bus::{BusEvent, BusListener, ERROR_KIND, EntityBus};
use crate::errors::ChannelError;
use crate::metrics::CHANNELS_ACTIVE;
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::connection::ClientConnection;
use crate::websocket::registry::{ChannelCallbacks, Subscribers};

static NAMESPACE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{16}$").unwrap());

/// Length of an encoded address.
pub const ADDRESS_LEN: usize = 39;

/// Length of a decoded address.
pub const ADDRESS_BYTES: usize = 24;

/// Network id used when none is configured (public test network).
pub const DEFAULT_NETWORK_ID: u8 = 0x98;

const BLOCK_MARKER: [u8; 8] = [0x49, 0x6A, 0xCA, 0x80, 0xE4, 0xD8, 0xF2, 0x9F];
const FINALIZED_BLOCK_MARKER: [u8; 8] = [0x54, 0x79, 0xCE, 0x31, 0xA0, 0x32, 0x48, 0x4D];

/// Channel category, the part of a channel name before `/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelCategory {
    /// New blocks.
    Block,
    /// Newly finalized blocks.
    FinalizedBlock,
    /// Transactions confirmed for an address.
    ConfirmedAdded,
    /// Transactions entering the unconfirmed cache.
    UnconfirmedAdded,
    /// Transactions leaving the unconfirmed cache.
    UnconfirmedRemoved,
    /// Transaction status changes.
    Status,
}

impl ChannelCategory {
    /// Every category.
    pub const ALL: [Self; 6] = [
        Self::Block,
        Self::FinalizedBlock,
        Self::ConfirmedAdded,
        Self::UnconfirmedAdded,
        Self::UnconfirmedRemoved,
        Self::Status,
    ];

    /// Name used in channel names and as the bus event kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::FinalizedBlock => "finalizedBlock",
            Self::ConfirmedAdded => "confirmedAdded",
            Self::UnconfirmedAdded => "unconfirmedAdded",
            Self::UnconfirmedRemoved => "unconfirmedRemoved",
            Self::Status => "status",
        }
    }

    /// Parse a category name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.name() == name)
    }

    /// Single-character marker of address channels.
    pub const fn marker(self) -> Option<char> {
        match self {
            Self::Block | Self::FinalizedBlock => None,
            Self::ConfirmedAdded => Some('a'),
            Self::UnconfirmedAdded => Some('u'),
            Self::UnconfirmedRemoved => Some('r'),
            Self::Status => Some('s'),
        }
    }

    /// Whether the channel is scoped by address.
    pub const fn is_address_channel(self) -> bool {
        self.marker().is_some()
    }

    /// Marker that starts the node's push topics for this category.
    ///
    /// Block topics are the bare 8-byte marker; address topics are the
    /// marker byte followed by the decoded address.
    pub fn topic_marker(self) -> &'static [u8] {
        match self {
            Self::Block => &BLOCK_MARKER,
            Self::FinalizedBlock => &FINALIZED_BLOCK_MARKER,
            Self::ConfirmedAdded => b"a",
            Self::UnconfirmedAdded => b"u",
            Self::UnconfirmedRemoved => b"r",
            Self::Status => b"s",
        }
    }
}

/// Scope of an address channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelParam {
    /// Encoded address (39 base32 characters).
    Address(String),
    /// Namespace id and the alias address events for it carry.
    NamespaceId {
        /// Namespace id (16 hex characters), uppercased.
        id: String,
        /// Encoded alias address on the configured network.
        alias: String,
    },
}

impl ChannelParam {
    /// Address matched against [`BusEvent::key`].
    pub fn key(&self) -> &str {
        match self {
            Self::Address(address) => address,
            Self::NamespaceId { alias, .. } => alias,
        }
    }
}

/// Encoded alias address of a namespace: network id with the alias flag,
/// the id in little-endian order, zero padding.
pub fn namespace_alias(namespace_id: u64, network_id: u8) -> String {
    let mut bytes = [0u8; ADDRESS_BYTES];
    bytes[0] = network_id | 0x01;
    bytes[1..9].copy_from_slice(&namespace_id.to_le_bytes());
    base32_encode(&bytes)
}

/// A parsed channel name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Category.
    pub category: ChannelCategory,
    /// Scope, for address channels.
    pub param: Option<ChannelParam>,
}

impl ChannelSpec {
    /// Whether a bus event belongs on this channel.
    pub fn matches(&self, event: &BusEvent) -> bool {
        if &*event.kind != self.category.name() {
            return false;
        }
        match &self.param {
            None => true,
            Some(param) => event.key.as_deref() == Some(param.key()),
        }
    }
}

/// Validates channel names.
#[derive(Clone, Copy, Debug)]
pub struct ChannelDescriptors {
    allow_optional_address: bool,
    network_id: u8,
}

impl Default for ChannelDescriptors {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ChannelDescriptors {
    /// Descriptors; `allow_optional_address` lets address channels go
    /// without a param.
    pub fn new(allow_optional_address: bool) -> Self {
        Self {
            allow_optional_address,
            network_id: DEFAULT_NETWORK_ID,
        }
    }

    /// Resolve namespace aliases on `network_id`.
    #[must_use]
    pub fn with_network_id(mut self, network_id: u8) -> Self {
        self.network_id = network_id;
        self
    }

    /// Parse and validate `channel`.
    pub fn parse(&self, channel: &str) -> Result<ChannelSpec, ChannelError> {
        let (name, param) = match channel.split_once('/') {
            Some((name, param)) => (name, Some(param).filter(|p| !p.is_empty())),
            None => (channel, None),
        };
        let category = ChannelCategory::from_name(name)
            .ok_or_else(|| ChannelError::UnknownCategory(name.to_string()))?;

        let param = match (category.is_address_channel(), param) {
            (false, None) => None,
            (false, Some(_)) => return Err(ChannelError::UnexpectedParam),
            (true, None) if self.allow_optional_address => None,
            (true, None) => return Err(ChannelError::MissingAddress),
            (true, Some(param)) => Some(self.parse_param(param)?),
        };
        Ok(ChannelSpec { category, param })
    }

    fn parse_param(self, param: &str) -> Result<ChannelParam, ChannelError> {
        if NAMESPACE_ID.is_match(param) {
            let id = u64::from_str_radix(param, 16)
                .map_err(|_| ChannelError::InvalidParam(param.to_string()))?;
            Ok(ChannelParam::NamespaceId {
                id: param.to_ascii_uppercase(),
                alias: namespace_alias(id, self.network_id),
            })
        } else if param.len() == ADDRESS_LEN && is_base32(param) {
            Ok(ChannelParam::Address(param.to_string()))
        } else {
            Err(ChannelError::InvalidParam(param.to_string()))
        }
    }
}

/// Registry callbacks wiring live channels to the entity bus.
///
/// Each active channel owns one forwarding task that feeds matching bus
/// events, in order, into the channel's [`Broadcaster`]. An upstream
/// [`ERROR_KIND`] event closes the channel's subscribers.
pub struct ChannelHub {
    descriptors: ChannelDescriptors,
    bus: EntityBus,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ChannelHub {
    /// Hub over `bus`.
    pub fn new(descriptors: ChannelDescriptors, bus: EntityBus) -> Self {
        Self {
            descriptors,
            bus,
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Number of channels with a running forwarder.
    pub fn active_channels(&self) -> usize {
        self.forwarders.lock().len()
    }

    /// Stop every forwarder.
    pub fn shutdown(&self) {
        for (_, forwarder) in self.forwarders.lock().drain() {
            forwarder.abort();
        }
        gauge!(CHANNELS_ACTIVE).set(0.0);
    }
}

impl ChannelCallbacks for ChannelHub {
    fn channel_activated(
        &self,
        channel: &str,
        subscribers: Subscribers,
    ) -> Result<(), ChannelError> {
        let spec = self.descriptors.parse(channel)?;
        let broadcaster = Broadcaster::new(channel, subscribers);
        let listener = self.bus.listen(&[spec.category.name(), ERROR_KIND]);
        let forwarder = tokio::spawn(forward(listener, spec, broadcaster));

        if let Some(previous) = self.forwarders.lock().insert(channel.to_string(), forwarder) {
            previous.abort();
        }
        gauge!(CHANNELS_ACTIVE).increment(1.0);
        info!(channel, "subscribing to channel");
        Ok(())
    }

    fn client_added(&self, channel: &str, client: &ClientConnection) {
        debug!(channel, client_id = %client.id, "client added to channel");
    }

    fn channel_deactivated(&self, channel: &str) {
        if let Some(forwarder) = self.forwarders.lock().remove(channel) {
            forwarder.abort();
            gauge!(CHANNELS_ACTIVE).decrement(1.0);
        }
        info!(channel, "unsubscribed from channel");
    }
}

impl Drop for ChannelHub {
    fn drop(&mut self) {
        for (_, forwarder) in self.forwarders.get_mut().drain() {
            forwarder.abort();
        }
    }
}

#[instrument(skip_all, fields(channel = %broadcaster.channel()))]
async fn forward(mut listener: BusListener, spec: ChannelSpec, broadcaster: Broadcaster) {
    while let Some(event) = listener.recv().await {
        if &*event.kind == ERROR_KIND {
            debug!("upstream error, closing channel subscribers");
            broadcaster.close();
        } else if spec.matches(&event) {
            let _ = broadcaster.send(&event.data);
        }
    }
}
