//! # ferry
//!
//! Gateway binary: wires the node connection service, the entity bridges and
//! the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;

use ferry_core::logging::{LogFormat, init_subscriber};
use ferry_node::{ChallengeAuthenticator, ConnectionService, NodeIdentity, ServiceOptions, TcpDialer};
use ferry_server::bridge::{
    ChangeFilter, EntityBridge, EntityBus, MemoryChangeFeed, PushBridge, TcpPushFeed,
};
use ferry_server::shutdown::DEFAULT_DRAIN_TIMEOUT;
use ferry_server::{FerryServer, ServerConfig};
use ferry_settings::FerrySettings;

/// Capacity of the in-process change feed.
const FEED_CAPACITY: usize = 1024;

/// Ferry gateway server.
#[derive(Parser, Debug)]
#[command(name = "ferry", about = "Blockchain REST gateway transport")]
struct Cli {
    /// Settings file (defaults to `~/.ferry/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn load_settings(&self) -> Result<FerrySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(ferry_settings::settings_path);
        let mut settings = ferry_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

fn node_service(settings: &FerrySettings) -> Result<ConnectionService> {
    let node = &settings.node;
    let public_key = node
        .public_key_bytes()
        .context("node.publicKey must be a 32-byte hex key")?;
    let seed = settings
        .identity
        .private_key_bytes()
        .context("identity.privateKey must be a 32-byte hex key")?
        .unwrap_or_else(|| {
            tracing::warn!("no identity.privateKey configured, using an ephemeral key");
            rand::random()
        });

    Ok(ConnectionService::new(
        NodeIdentity {
            host: node.host.clone(),
            port: node.port,
            public_key,
        },
        Arc::new(TcpDialer),
        Arc::new(ChallengeAuthenticator::new(SigningKey::from_bytes(&seed))),
        ServiceOptions {
            request_timeout: Duration::from_millis(node.timeout_ms),
            handshake_timeout: node.handshake_timeout_ms.map(Duration::from_millis),
            max_packet_size: node.max_packet_size,
        },
    ))
}

fn push_bridge(settings: &FerrySettings, bus: EntityBus) -> Option<PushBridge> {
    let push = &settings.push;
    if !push.enabled {
        tracing::info!("node push bridge disabled");
        return None;
    }
    let feed = TcpPushFeed::new(push.address(), Duration::from_millis(push.connect_timeout_ms));
    Some(PushBridge::new(Arc::new(feed), bus))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let node = node_service(&settings)?;
    let bus = EntityBus::default();

    let metrics = ferry_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = FerryServer::new(ServerConfig::from_settings(&settings), bus.clone(), node)
        .with_metrics(metrics);

    // The feed handle stays alive for the lifetime of the process; a database
    // adapter takes its place as the producer.
    let (feed, _feed_handle) = MemoryChangeFeed::new(FEED_CAPACITY);
    let bridge = EntityBridge::new(
        Arc::new(feed),
        ChangeFilter {
            namespace: settings.feed.namespace.clone(),
            operation: settings.feed.operation.clone(),
        },
        &settings.feed.event,
        bus.clone(),
    );
    let stop = server.shutdown().token();
    let _bridge = server.shutdown().spawn(async move {
        tokio::select! {
            () = stop.cancelled() => {}
            result = bridge.run() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "entity bridge stopped");
                }
            }
        }
    });

    if let Some(push) = push_bridge(&settings, bus) {
        let stop = server.shutdown().token();
        let reconnect_delay = Duration::from_millis(settings.push.reconnect_delay_ms);
        let _push = server.shutdown().spawn(async move {
            tokio::select! {
                () = stop.cancelled() => {}
                () = push.run_reconnecting(reconnect_delay) => {}
            }
        });
    }

    let (addr, _server_task) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("ferry listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown().drain(DEFAULT_DRAIN_TIMEOUT).await {
        tracing::warn!("exiting with tasks still running");
    }
    server.close_channels();

    tracing::info!("Shutdown complete");
    Ok(())
}
