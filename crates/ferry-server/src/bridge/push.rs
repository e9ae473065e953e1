//! Entities pushed by the node.
//!
//! The node publishes each entity under a binary topic: the bare 8-byte
//! marker for block categories, or a marker byte followed by the 24-byte
//! address for address categories (see [`ChannelCategory::topic_marker`]).
//! [`PushBridge`] decodes the topic into a category and an address and
//! republishes the entity on the [`EntityBus`] as a keyed event.
//!
//! On the wire ([`TcpPushFeed`]) every message is one little-endian
//! `u32`-length-delimited frame: `topic length (u8) | topic | JSON entity`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, instrument, warn};

use ferry_core::encoding::base32_encode;

use super::bus::{BusEvent, ERROR_KIND, EntityBus};
use super::channels::{ADDRESS_BYTES, ChannelCategory};
use super::feed::FeedError;

/// Largest push frame accepted.
pub const MAX_PUSH_FRAME: usize = 4 * 1024 * 1024;

/// One entity pushed by the node.
#[derive(Clone, Debug, PartialEq)]
pub struct PushMessage {
    /// Binary topic the entity was published under.
    pub topic: Bytes,
    /// The entity.
    pub payload: Value,
}

/// A push topic or frame that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    /// No category uses this topic.
    #[error("unknown push topic {0}")]
    UnknownTopic(String),
    /// The address part of an address topic has the wrong size.
    #[error("push topic address must be {ADDRESS_BYTES} bytes, got {0}")]
    AddressSize(usize),
    /// The frame is too short for its declared topic.
    #[error("truncated push frame")]
    Truncated,
    /// The topic is longer than a frame can carry.
    #[error("push topic too long ({0} bytes)")]
    TopicTooLong(usize),
    /// The entity is not JSON.
    #[error("push payload is not JSON: {0}")]
    Payload(String),
}

impl PushMessage {
    /// Message for `category`, scoped to the decoded `address` when given.
    pub fn new(category: ChannelCategory, address: Option<&[u8]>, payload: Value) -> Self {
        let mut topic = BytesMut::from(category.topic_marker());
        if let Some(address) = address {
            topic.extend_from_slice(address);
        }
        Self {
            topic: topic.freeze(),
            payload,
        }
    }

    /// Frame body: `topic length | topic | JSON`.
    pub fn to_frame(&self) -> Result<Bytes, PushError> {
        let topic_len =
            u8::try_from(self.topic.len()).map_err(|_| PushError::TopicTooLong(self.topic.len()))?;
        let payload = self.payload.to_string();
        let mut frame = BytesMut::with_capacity(1 + self.topic.len() + payload.len());
        frame.put_u8(topic_len);
        frame.extend_from_slice(&self.topic);
        frame.extend_from_slice(payload.as_bytes());
        Ok(frame.freeze())
    }

    /// Parse a frame body.
    pub fn from_frame(mut frame: Bytes) -> Result<Self, PushError> {
        let (&topic_len, _) = frame.split_first().ok_or(PushError::Truncated)?;
        let topic_len = usize::from(topic_len);
        if frame.len() < 1 + topic_len {
            return Err(PushError::Truncated);
        }
        let mut topic = frame.split_to(1 + topic_len);
        let topic = topic.split_off(1);
        let payload =
            serde_json::from_slice(&frame).map_err(|e| PushError::Payload(e.to_string()))?;
        Ok(Self { topic, payload })
    }
}

/// Category and encoded address of a push topic.
pub fn decode_topic(topic: &[u8]) -> Result<(ChannelCategory, Option<String>), PushError> {
    for category in ChannelCategory::ALL {
        let Some(rest) = topic.strip_prefix(category.topic_marker()) else {
            continue;
        };
        if !category.is_address_channel() {
            if rest.is_empty() {
                return Ok((category, None));
            }
            continue;
        }
        if rest.len() != ADDRESS_BYTES {
            return Err(PushError::AddressSize(rest.len()));
        }
        return Ok((category, Some(base32_encode(rest))));
    }
    Err(PushError::UnknownTopic(hex::encode_upper(topic)))
}

/// Stream of pushed entities.
pub type PushStream = BoxStream<'static, Result<PushMessage, FeedError>>;

/// A source of node-pushed entities.
#[async_trait]
pub trait PushFeed: Send + Sync {
    /// Connect and stream every pushed entity.
    ///
    /// Errors inside the stream are non-fatal; the stream ends when the
    /// source closes.
    async fn subscribe(&self) -> Result<PushStream, FeedError>;
}

/// [`PushFeed`] reading frames from the node's push endpoint over TCP.
#[derive(Clone, Debug)]
pub struct TcpPushFeed {
    address: String,
    connect_timeout: Duration,
}

impl TcpPushFeed {
    /// Feed from `host:port`, giving up on connecting after
    /// `connect_timeout`.
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

/// Codec framing push messages.
pub fn push_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .max_frame_length(MAX_PUSH_FRAME)
        .new_codec()
}

#[async_trait]
impl PushFeed for TcpPushFeed {
    async fn subscribe(&self) -> Result<PushStream, FeedError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| FeedError::Source(format!("connection to {} timed out", self.address)))?
            .map_err(|e| FeedError::Source(format!("connection to {} failed: {e}", self.address)))?;
        info!(address = %self.address, "connected to node push endpoint");

        let frames = FramedRead::new(stream, push_codec()).map(|frame| match frame {
            Ok(frame) => PushMessage::from_frame(frame.freeze())
                .map_err(|e| FeedError::Source(e.to_string())),
            Err(e) => Err(FeedError::Source(format!("push read failed: {e}"))),
        });
        Ok(frames.boxed())
    }
}

/// Republishes node-pushed entities on the bus.
pub struct PushBridge {
    feed: Arc<dyn PushFeed>,
    bus: EntityBus,
}

impl PushBridge {
    /// Bridge `feed` onto `bus`.
    pub fn new(feed: Arc<dyn PushFeed>, bus: EntityBus) -> Self {
        Self { feed, bus }
    }

    /// Subscribe and forward until the feed ends.
    ///
    /// Failing to subscribe, a feed error, and the end of the feed are all
    /// published as [`ERROR_KIND`] events so channel subscribers learn that
    /// the stream broke. Messages under unknown topics are skipped.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<(), FeedError> {
        let mut messages = match self.feed.subscribe().await {
            Ok(messages) => messages,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        info!("push bridge subscribed");

        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => self.publish(message),
                Err(e) => {
                    warn!(error = %e, "push feed error");
                    self.report(&e);
                }
            }
        }

        info!("push feed ended");
        let _ = self
            .bus
            .emit(ERROR_KIND, json!({ "message": "node push feed closed" }));
        Ok(())
    }

    /// [`run`](Self::run) again `reconnect_delay` after every return.
    pub async fn run_reconnecting(&self, reconnect_delay: Duration) {
        loop {
            if let Err(e) = self.run().await {
                warn!(error = %e, "node push endpoint unavailable");
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    fn publish(&self, message: PushMessage) {
        match decode_topic(&message.topic) {
            Ok((category, Some(address))) => {
                let listeners =
                    self.bus
                        .publish(BusEvent::keyed(category.name(), &address, message.payload));
                debug!(kind = category.name(), %address, listeners, "pushed entity published");
            }
            Ok((category, None)) => {
                let listeners = self.bus.emit(category.name(), message.payload);
                debug!(kind = category.name(), listeners, "pushed entity published");
            }
            Err(e) => warn!(error = %e, "skipping pushed entity"),
        }
    }

    fn report(&self, error: &FeedError) {
        let _ = self
            .bus
            .emit(ERROR_KIND, json!({ "message": error.to_string() }));
    }
}
