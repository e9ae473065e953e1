//! `FerryServer`: Axum HTTP + WebSocket gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use dashmap::DashMap;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use ferry_core::ClientId;
use ferry_node::ConnectionService;
use ferry_wire::requests;

use crate::bridge::bus::EntityBus;
use crate::bridge::channels::{ChannelDescriptors, ChannelHub};
use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::health::{HealthReport, NodeStatus};
use crate::metrics::{NODE_HEALTH_CHECKS_TOTAL, render};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::{ChannelCallbacks, SubscriptionRegistry};
use crate::websocket::session::{ClientTable, SessionContext, run_ws_session};

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    session: SessionContext,
    sessions: TaskTracker,
    hub: Arc<ChannelHub>,
    node: ConnectionService,
    max_message_size: usize,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The gateway server.
pub struct FerryServer {
    config: ServerConfig,
    registry: Arc<SubscriptionRegistry>,
    hub: Arc<ChannelHub>,
    bus: EntityBus,
    node: ConnectionService,
    clients: Arc<ClientTable>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl FerryServer {
    /// Create a server publishing `bus` events to WebSocket channels and
    /// checking node health through `node`.
    pub fn new(config: ServerConfig, bus: EntityBus, node: ConnectionService) -> Self {
        let descriptors = ChannelDescriptors::new(config.allow_optional_address)
            .with_network_id(config.network_id);
        let hub = Arc::new(ChannelHub::new(descriptors, bus.clone()));
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&hub) as Arc<dyn ChannelCallbacks>
        ));
        Self {
            config,
            registry,
            hub,
            bus,
            node,
            clients: Arc::new(DashMap::new()),
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: SessionContext {
                registry: Arc::clone(&self.registry),
                clients: Arc::clone(&self.clients),
                options: self.config.session,
                shutdown: self.shutdown.token(),
            },
            sessions: self.shutdown.tracker(),
            hub: Arc::clone(&self.hub),
            node: self.node.clone(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/node/health", get(node_health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the server task. The task is tracked
    /// by the [`ShutdownCoordinator`], as is every WebSocket session.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "ferry server listening");
        let handle = self.shutdown.spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "http server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// The event bus feeding channels.
    pub fn bus(&self) -> &EntityBus {
        &self.bus
    }

    /// Channel subscriptions.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connected WebSocket clients.
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop forwarding bus events to channels.
    pub fn close_channels(&self) {
        self.hub.shutdown();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.session.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let AppState {
        session,
        sessions,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size).on_upgrade(move |socket| {
        sessions.track_future(run_ws_session(socket, ClientId::generate(), session))
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(
        state.start_time,
        state.session.clients.len(),
        state.hub.active_channels(),
    ))
}

async fn node_health_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let request = requests::node_info().to_bytes()?;
    match state.node.request(request).await {
        Ok(response) => {
            counter!(NODE_HEALTH_CHECKS_TOTAL, "status" => NodeStatus::Up.as_str()).increment(1);
            debug!(packet_type = response.packet_type.code(), "node answered ping");
            Ok(Json(NodeStatus::Up.body()))
        }
        Err(e) => {
            counter!(NODE_HEALTH_CHECKS_TOTAL, "status" => NodeStatus::Down.as_str()).increment(1);
            warn!(error = %e, "node health check failed");
            Err(e.into())
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
