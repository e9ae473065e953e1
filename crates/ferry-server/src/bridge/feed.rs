//! External change sources.

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::ready;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// One change reported by the source.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// Where the change happened (`database.collection`).
    pub namespace: String,
    /// Operation code (`i` insert, `u` update, `d` delete).
    pub operation: String,
    /// The changed document.
    pub document: Value,
}

/// Which changes a subscription wants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Namespace to watch.
    pub namespace: String,
    /// Operation to keep.
    pub operation: String,
}

impl ChangeFilter {
    /// Whether `change` passes the filter.
    pub fn matches(&self, change: &ChangeEvent) -> bool {
        change.namespace == self.namespace && change.operation == self.operation
    }
}

/// Change source failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The feed supports a single subscription and it is taken.
    #[error("change feed already subscribed")]
    AlreadySubscribed,
    /// The source reported an error.
    #[error("change feed error: {0}")]
    Source(String),
}

/// Stream of filtered changes.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, FeedError>>;

/// A source of document changes, such as a database change stream.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription delivering the changes `filter` keeps.
    ///
    /// Errors inside the stream are non-fatal; the stream ends when the
    /// source does.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, FeedError>;
}

type FeedItem = Result<ChangeEvent, FeedError>;

/// In-process [`ChangeFeed`] fed through a [`MemoryFeedHandle`].
pub struct MemoryChangeFeed {
    rx: Mutex<Option<mpsc::Receiver<FeedItem>>>,
}

/// Producer side of a [`MemoryChangeFeed`]. The feed ends once every handle
/// is dropped.
#[derive(Clone)]
pub struct MemoryFeedHandle {
    tx: mpsc::Sender<FeedItem>,
}

impl MemoryChangeFeed {
    /// Create a feed buffering up to `capacity` changes.
    pub fn new(capacity: usize) -> (Self, MemoryFeedHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            MemoryFeedHandle { tx },
        )
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, FeedError> {
        let rx = self.rx.lock().take().ok_or(FeedError::AlreadySubscribed)?;
        let changes = stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(changes
            .filter(move |item| {
                ready(match item {
                    Ok(change) => filter.matches(change),
                    Err(_) => true,
                })
            })
            .boxed())
    }
}

impl MemoryFeedHandle {
    /// Report a change. Returns `false` once the feed is gone.
    pub async fn push(&self, change: ChangeEvent) -> bool {
        self.tx.send(Ok(change)).await.is_ok()
    }

    /// Report an insert of `document` into `namespace`.
    pub async fn insert(&self, namespace: &str, document: Value) -> bool {
        self.push(ChangeEvent {
            namespace: namespace.to_string(),
            operation: "i".to_string(),
            document,
        })
        .await
    }

    /// Report a source error.
    pub async fn fail(&self, message: &str) -> bool {
        self.tx
            .send(Err(FeedError::Source(message.to_string())))
            .await
            .is_ok()
    }
}
