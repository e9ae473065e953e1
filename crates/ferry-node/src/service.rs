//! Connection service: the cached lease plus one-shot connections.
//!
//! ```text
//! Idle ──lease──▶ Connecting ──ok──▶ Ready ──close──▶ Idle
//!                     │
//!                     └──err──▶ Idle
//! ```
//!
//! Leases issued while an attempt is in flight await that same attempt. The
//! attempt runs on its own task so dropping every waiter does not stall it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use parking_lot::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use ferry_wire::{Packet, PacketCodec};

use crate::auth::Authenticator;
use crate::connection::{Connection, SingleUseConnection};
use crate::errors::{NodeError, Result};
use crate::metrics::{NODE_CONNECTION_FAILURES_TOTAL, NODE_DIALS_TOTAL, NODE_LEASES_TOTAL};
use crate::transport::{Dialer, NodeFramed, NodeIdentity};

type Attempt = Shared<BoxFuture<'static, Result<Arc<Connection>>>>;

enum Slot {
    Idle,
    Connecting { generation: u64, attempt: Attempt },
    Ready { generation: u64, connection: Arc<Connection> },
}

/// Tunables for [`ConnectionService`].
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    /// Deadline for [`ConnectionService::request`] exchanges.
    pub request_timeout: Duration,
    /// Optional bound on dial + handshake.
    pub handshake_timeout: Option<Duration>,
    /// Largest packet accepted from the node.
    pub max_packet_size: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            handshake_timeout: None,
            max_packet_size: ferry_wire::codec::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

struct Inner {
    node: NodeIdentity,
    dialer: Arc<dyn Dialer>,
    authenticator: Arc<dyn Authenticator>,
    options: ServiceOptions,
    slot: Mutex<Slot>,
    generation: Mutex<u64>,
}

/// Hands out authenticated connections to the configured node.
#[derive(Clone)]
pub struct ConnectionService {
    inner: Arc<Inner>,
}

impl ConnectionService {
    /// Create a service; nothing is dialed until the first lease.
    pub fn new(
        node: NodeIdentity,
        dialer: Arc<dyn Dialer>,
        authenticator: Arc<dyn Authenticator>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                node,
                dialer,
                authenticator,
                options,
                slot: Mutex::new(Slot::Idle),
                generation: Mutex::new(0),
            }),
        }
    }

    /// The shared, cached connection.
    ///
    /// Returns the ready connection without I/O when one is cached, joins an
    /// in-flight attempt when one exists, and otherwise dials and
    /// authenticates. Failures leave nothing cached.
    pub async fn lease(&self) -> Result<Arc<Connection>> {
        counter!(NODE_LEASES_TOTAL).increment(1);
        let attempt = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                Slot::Ready { connection, .. } if !connection.is_closed() => {
                    return Ok(Arc::clone(connection));
                }
                Slot::Connecting { attempt, .. } => attempt.clone(),
                Slot::Ready { .. } | Slot::Idle => {
                    let generation = self.inner.next_generation();
                    let attempt = spawn_attempt(Arc::clone(&self.inner), generation);
                    *slot = Slot::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    attempt
                }
            }
        };
        attempt.await
    }

    /// A fresh authenticated connection that is never cached.
    pub async fn single_use(&self) -> Result<SingleUseConnection> {
        let framed = self.inner.establish().await?;
        Ok(SingleUseConnection::new(framed))
    }

    /// One request/response exchange on a single-use connection, bounded by
    /// the configured request timeout.
    pub async fn request(&self, request: Bytes) -> Result<Packet> {
        self.single_use()
            .await?
            .push_pull(request, self.inner.options.request_timeout)
            .await
    }

    /// Whether a ready connection is cached.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Ready { connection, .. } if !connection.is_closed())
    }

    /// The configured request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.inner.options.request_timeout
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    async fn establish(&self) -> Result<NodeFramed> {
        let host = self.node.host.as_str();
        let port = self.node.port;
        info!(host, port, "connecting to node");
        counter!(NODE_DIALS_TOTAL).increment(1);

        let handshake = async {
            let transport = self.dialer.dial(&self.node).await.map_err(|e| {
                warn!(host, port, error = %e, "failed to connect to node");
                NodeError::Unavailable
            })?;
            let codec = PacketCodec::with_max_packet_size(self.options.max_packet_size);
            let mut framed = Framed::new(transport, codec);
            self.authenticator
                .authenticate(&mut framed, &self.node)
                .await
                .map_err(|e| {
                    warn!(host, port, error = %e, "node handshake failed");
                    NodeError::from(e)
                })?;
            Ok(framed)
        };

        let result = match self.options.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake).await.unwrap_or_else(|_| {
                warn!(host, port, "node handshake timed out");
                Err(NodeError::Unavailable)
            }),
            None => handshake.await,
        };
        if result.is_err() {
            counter!(NODE_CONNECTION_FAILURES_TOTAL).increment(1);
        }
        result
    }

    fn settle(&self, generation: u64, result: &Result<Arc<Connection>>) {
        let mut slot = self.slot.lock();
        let current = matches!(&*slot, Slot::Connecting { generation: g, .. } if *g == generation);
        if !current {
            return;
        }
        *slot = match result {
            Ok(connection) => Slot::Ready {
                generation,
                connection: Arc::clone(connection),
            },
            Err(_) => Slot::Idle,
        };
    }

    fn invalidate(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if matches!(&*slot, Slot::Ready { generation: g, .. } if *g == generation) {
            *slot = Slot::Idle;
            info!(generation, "node connection closed, lease invalidated");
        }
    }
}

fn spawn_attempt(inner: Arc<Inner>, generation: u64) -> Attempt {
    let task = tokio::spawn(async move {
        let result = inner
            .establish()
            .await
            .map(|framed| Arc::new(Connection::new(framed)));
        inner.settle(generation, &result);

        if let Ok(connection) = &result {
            debug!(generation, "node connection ready");
            let token = connection.close_token();
            let watcher = Arc::downgrade(&inner);
            drop(tokio::spawn(async move {
                token.cancelled().await;
                if let Some(inner) = watcher.upgrade() {
                    inner.invalidate(generation);
                }
            }));
        }
        result
    });

    async move { task.await.unwrap_or(Err(NodeError::Unavailable)) }
        .boxed()
        .shared()
}
