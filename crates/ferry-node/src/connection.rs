//! Authenticated node connections.
//!
//! [`Connection`] is the long-lived, shareable connection handed out by
//! [`ConnectionService::lease`](crate::ConnectionService::lease).
//! [`SingleUseConnection`] carries exactly one request/response exchange and
//! is consumed by it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferry_wire::Packet;

use crate::errors::{NodeError, Result};
use crate::transport::NodeFramed;

/// Depth of the queue holding packets the node pushes unprompted.
const INBOUND_QUEUE: usize = 64;

/// A ready, authenticated connection shared by every leaseholder.
pub struct Connection {
    sink: Mutex<SplitSink<NodeFramed, Bytes>>,
    inbound: Mutex<mpsc::Receiver<Packet>>,
    closed: CancellationToken,
    close_watchers: AtomicUsize,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Wrap an authenticated transport and start reading from it.
    pub fn new(framed: NodeFramed) -> Self {
        let (sink, stream) = framed.split();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_loop(stream, tx, closed.clone()));

        Self {
            sink: Mutex::new(sink),
            inbound: Mutex::new(rx),
            closed,
            close_watchers: AtomicUsize::new(0),
            reader,
        }
    }

    /// Write already framed bytes.
    ///
    /// Resolves once the write completes. Fails with
    /// [`NodeError::Unavailable`] if the transport closes first or the write
    /// errors (which also closes the connection).
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let _watch = CloseWatch::register(&self.close_watchers);
        if self.closed.is_cancelled() {
            return Err(NodeError::Unavailable);
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(payload).await
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(NodeError::Unavailable),
            result = write => result.map_err(|e| {
                warn!(error = %e, "node write failed");
                self.closed.cancel();
                NodeError::Unavailable
            }),
        }
    }

    /// Next packet the node pushed on this connection.
    ///
    /// Returns `None` once the connection is closed and drained.
    pub async fn recv(&self) -> Option<Packet> {
        self.inbound.lock().await.recv().await
    }

    /// Close the transport. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "error closing node transport");
        }
    }

    /// Whether the transport has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the transport closes.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Number of `send` calls currently watching for close.
    pub fn pending_sends(&self) -> usize {
        self.close_watchers.load(Ordering::Acquire)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader.abort();
    }
}

/// Registers one in-flight close watcher for the lifetime of the guard.
struct CloseWatch<'a>(&'a AtomicUsize);

impl<'a> CloseWatch<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        let _ = counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for CloseWatch<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn read_loop(
    mut stream: SplitStream<NodeFramed>,
    inbound: mpsc::Sender<Packet>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            item = stream.next() => match item {
                Some(Ok(packet)) => {
                    if inbound.try_send(packet).is_err() {
                        debug!("dropping unsolicited node packet");
                    }
                }
                // An error alone does not close the connection; the stream
                // ends right after a fatal one.
                Some(Err(e)) => warn!(error = %e, "node connection error"),
                None => break,
            },
        }
    }
    debug!("node connection closed");
    closed.cancel();
}

/// A connection dedicated to a single request/response exchange.
pub struct SingleUseConnection {
    framed: NodeFramed,
}

impl SingleUseConnection {
    pub(crate) fn new(framed: NodeFramed) -> Self {
        Self { framed }
    }

    /// Send `request` and wait for exactly one complete packet.
    ///
    /// `timeout` covers both the write and the read. The transport is closed
    /// afterwards whatever the outcome.
    pub async fn push_pull(mut self, request: Bytes, timeout: Duration) -> Result<Packet> {
        let exchange = async {
            self.framed.send(request).await.map_err(|e| {
                warn!(error = %e, "node write failed");
                NodeError::Unavailable
            })?;
            match self.framed.next().await {
                Some(Ok(packet)) => Ok(packet),
                Some(Err(e)) => {
                    warn!(error = %e, "node connection error");
                    Err(NodeError::Unavailable)
                }
                None => Err(NodeError::Unavailable),
            }
        };

        let result = tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or(Err(NodeError::Timeout));

        match &result {
            Ok(packet) => debug!(packet_type = %packet.packet_type, "push-pull completed"),
            Err(NodeError::Timeout) => {
                metrics::counter!(crate::metrics::NODE_PUSH_PULL_TIMEOUTS_TOTAL).increment(1);
                warn!(timeout_ms = timeout.as_millis() as u64, "push-pull timed out");
            }
            Err(_) => {}
        }
        drop(self.framed);
        result
    }
}
