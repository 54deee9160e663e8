// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `logd` process entry point: wires the storage engine, transaction table,
//! and watch hub into both external interfaces named in spec.md §6 — the
//! TCP session protocol and the HTTP shim — and applies the configured
//! schema, if any, before accepting connections.

use anyhow::{Context, Result};
use logd_app_core::config::ConfigService;
use logd_app_core::server_config::{debug_logging_enabled, SchemaSource, ServerConfig};
use logd_config_fs::FsConfigStore;
use logd_http::AppState as HttpState;
use logd_node::Node;
use logd_session::{Engine, SessionConfig};
use logd_storage::Storage;
use logd_txn::TxTable;
use logd_watch::WatchHub;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};

const CONFIG_KEY: &str = "server";
const DEFAULT_SESSION_ADDR: &str = "127.0.0.1:7420";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:7421";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config();
    let storage = Storage::new();
    apply_configured_schema(&storage, &config)?;

    let txs = Arc::new(TxTable::new(storage.clone(), config.tx.timeout()));
    let hub = WatchHub::new();
    let engine = Engine { storage: storage.clone(), txs: txs.clone(), hub };

    let session_addr = std::env::var("LOGD_SESSION_ADDR").unwrap_or_else(|_| DEFAULT_SESSION_ADDR.to_string());
    let http_addr = std::env::var("LOGD_HTTP_ADDR").unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string());

    let session_listener = TcpListener::bind(&session_addr).await.context("bind session listener")?;
    info!(addr = %session_addr, "session protocol listening");
    let session_loop = tokio::spawn(run_session_listener(session_listener, engine));

    let http_router = logd_http::router(HttpState { storage, txs });
    let http_listener = TcpListener::bind(&http_addr).await.context("bind http listener")?;
    info!(addr = %http_addr, "http shim listening");
    let http_loop = tokio::spawn(async move {
        if let Err(err) = axum::serve(http_listener, http_router).await {
            warn!(?err, "http server exited");
        }
    });

    tokio::select! {
        res = session_loop => res.context("session listener task panicked")?,
        res = http_loop => res.context("http listener task panicked")?,
    }

    Ok(())
}

fn init_tracing() {
    let level = if debug_logging_enabled() { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_config() -> ServerConfig {
    let store = match FsConfigStore::new() {
        Ok(store) => store,
        Err(err) => {
            warn!(?err, "could not resolve a config directory, using defaults");
            return ServerConfig::default();
        }
    };
    let service = ConfigService::new(store);
    match service.load::<ServerConfig>(CONFIG_KEY) {
        Ok(Some(config)) => config,
        Ok(None) => {
            let config = ServerConfig::default();
            if let Err(err) = service.save(CONFIG_KEY, &config) {
                warn!(?err, "could not persist default configuration");
            }
            config
        }
        Err(err) => {
            warn!(?err, "failed to load configuration, using defaults");
            ServerConfig::default()
        }
    }
}

fn apply_configured_schema(storage: &Storage, config: &ServerConfig) -> Result<()> {
    let Some(source) = &config.schema else {
        return Ok(());
    };
    let schema = match source {
        SchemaSource::Embedded(node) => node.clone(),
        SchemaSource::File(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("read schema file {}", path.display()))?;
            serde_json::from_str::<Node>(&raw).with_context(|| format!("parse schema file {}", path.display()))?
        }
    };
    storage.start_migration(schema).context("start initial schema migration")?;
    storage.complete_migration().context("complete initial schema migration")?;
    Ok(())
}

async fn run_session_listener(listener: TcpListener, engine: Engine) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept session connection")?;
        let engine = engine.clone();
        tokio::spawn(async move {
            info!(%peer, "session connected");
            logd_session::run_session(stream, engine, SessionConfig::default()).await;
            info!(%peer, "session closed");
        });
    }
}
