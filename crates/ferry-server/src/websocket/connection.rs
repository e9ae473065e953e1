//! One subscribed WebSocket peer, as seen by channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ferry_core::ClientId;

/// A connected WebSocket client.
///
/// Frames are queued on a bounded outbox drained by the session's writer,
/// so everything sent to one client arrives in order. Closing is a signal
/// to the session; the socket itself belongs to the session task.
pub struct ClientConnection {
    /// Server-assigned id, also the client's key in every channel.
    pub id: ClientId,
    outbox: mpsc::Sender<Arc<String>>,
    shutdown: CancellationToken,
    opened_at: Instant,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl ClientConnection {
    /// Client `id` writing through `outbox`.
    pub fn new(id: ClientId, outbox: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            outbox,
            shutdown: CancellationToken::new(),
            opened_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// `false` means the frame was not queued: the client is closing, its
    /// outbox is full, or its writer is gone. The last two count as drops.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbox.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Frames that could not be queued.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the session to close the socket. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection is asked to close.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Record inbound traffic (a message, ping or pong).
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Time since the connection opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}
