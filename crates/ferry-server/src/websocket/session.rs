//! WebSocket session lifecycle: a single connected client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use ferry_core::ClientId;

use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{Liveness, watch_liveness};
use super::registry::SubscriptionRegistry;
use crate::errors::ProtocolError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_PROTOCOL_ERRORS_TOTAL,
};

/// How long the writer gets to flush a close frame once the session ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Per-session tunables.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Outbound queue depth per client.
    pub queue_size: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Silence after which the client is dropped.
    pub heartbeat_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Live clients by id.
pub type ClientTable = DashMap<ClientId, Arc<ClientConnection>>;

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Channel subscriptions.
    pub registry: Arc<SubscriptionRegistry>,
    /// Connected clients, subscribed or not.
    pub clients: Arc<ClientTable>,
    /// Per-session tunables.
    pub options: SessionOptions,
    /// Server shutdown signal.
    pub shutdown: CancellationToken,
}

/// Handshake frame carrying the client's id.
pub fn uid_message(client_id: &ClientId) -> String {
    json!({ "uid": client_id.as_str() }).to_string()
}

/// Run a WebSocket session for a connected client.
///
/// 1. Sends `{"uid": ...}` with the server-assigned id
/// 2. Applies inbound subscribe/unsubscribe messages to the registry
/// 3. Forwards queued channel data and periodic Ping frames
/// 4. Closes on protocol errors, transport errors, idleness or shutdown
/// 5. Removes the client from every channel on disconnect
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(ws: WebSocket, client_id: ClientId, ctx: SessionContext) {
    let SessionContext {
        registry,
        clients,
        options,
        shutdown,
    } = ctx;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(options.queue_size.max(1));
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));
    let _ = clients.insert(client_id.clone(), Arc::clone(&connection));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if let Err(e) = ws_tx.send(Message::Text(uid_message(&client_id).into())).await {
        warn!(error = %e, "error sending data to websocket");
        finish(&connection, &registry, &clients, connection_start);
        return;
    }

    let heartbeat_stop = CancellationToken::new();
    let heartbeat = tokio::spawn({
        let connection = Arc::clone(&connection);
        let stop = heartbeat_stop.clone();
        async move {
            let liveness = watch_liveness(
                Arc::clone(&connection),
                options.heartbeat_interval,
                options.heartbeat_timeout,
                stop,
            )
            .await;
            if liveness == Liveness::Unresponsive {
                warn!(
                    idle_ms = connection.idle_for().as_millis() as u64,
                    "client unresponsive, disconnecting"
                );
                connection.close();
            }
        }
    });

    let outbound_conn = Arc::clone(&connection);
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(options.heartbeat_interval);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = outbound_conn.closed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        outbound_conn.close();
    });

    loop {
        let msg = tokio::select! {
            () = connection.closed() => break,
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            msg = ws_rx.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let e = ProtocolError::NotUtf8(data.len());
                    warn!(error = %e, "closing websocket");
                    counter!(WS_PROTOCOL_ERRORS_TOTAL).increment(1);
                    break;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.touch();
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "error from websocket");
                break;
            }
            None => break,
        };

        connection.touch();
        if let Err(e) = handle_message(&connection, &text, &registry) {
            warn!(error = %e, "closing websocket");
            counter!(WS_PROTOCOL_ERRORS_TOTAL).increment(1);
            break;
        }
    }

    heartbeat_stop.cancel();
    finish(&connection, &registry, &clients, connection_start);
    let _ = heartbeat.await;
    if tokio::time::timeout(WRITER_DRAIN, outbound).await.is_err() {
        debug!("websocket writer did not drain in time");
    }
}

fn finish(
    connection: &ClientConnection,
    registry: &SubscriptionRegistry,
    clients: &ClientTable,
    started: Instant,
) {
    connection.close();
    registry.delete_client(&connection.id);
    let _ = clients.remove(&connection.id);

    info!(
        dropped = connection.drop_count(),
        age_ms = connection.age().as_millis() as u64,
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
