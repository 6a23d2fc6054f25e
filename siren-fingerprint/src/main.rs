//! Siren fingerprint service - main entry point
//!
//! Builds the stores, the matching engine and the RPC server, then serves the
//! HTTP/JSON gateway until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use siren_fingerprint::api::{build_router, register_track_service};
use siren_fingerprint::engine::{Engine, EngineSettings};
use siren_fingerprint::fingerprinter;
use siren_fingerprint::http::{HttpClient, RequestManager};
use siren_fingerprint::rpc::RpcServer;
use siren_fingerprint::storage::elastic::{ElasticConnector, ElasticSettings};
use siren_fingerprint::storage::postgres::PostgresConnector;
use siren_fingerprint::storage::ConnectionPool;
use siren_fingerprint::thread_pool::AsyncManager;
use siren_fingerprint::ServiceConfig;

/// Command-line arguments for siren-fingerprint
#[derive(Parser, Debug)]
#[command(name = "siren-fingerprint")]
#[command(about = "Audio fingerprint matching service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = "siren.toml", env = "SIREN_CONFIG")]
    config: PathBuf,

    /// Gateway listen address (overrides SERV_ADDRESS)
    #[arg(short, long)]
    address: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(&args.config).context("Failed to load configuration")?;
    if let Some(address) = args.address {
        config.server.address = address;
    }
    siren_common::logging::init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting siren-fingerprint v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %args.config.display(), address = %config.server.address, "Configuration loaded");

    // Store clients block on this runtime from plain threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("siren-runtime")
        .build()
        .context("Failed to build tokio runtime")?;
    let handle = runtime.handle().clone();

    AsyncManager::init(config.thread_pool.clone());
    let submitter = AsyncManager::submitter();

    let http: Arc<dyn HttpClient> = Arc::new(
        RequestManager::new(handle.clone(), Duration::from_millis(config.ingest.timeout_ms))
            .context("Failed to build HTTP client")?,
    );

    let postgres = PostgresConnector::new(handle.clone(), &config.postgres)
        .context("Invalid primary store settings")?;
    if let Err(e) = postgres.ensure_schema() {
        error!("Could not prepare primary store schema: {}", e);
    }
    let primary = Arc::new(ConnectionPool::new(Arc::new(postgres), config.postgres.pool_size));

    let elastic = ElasticConnector::new(
        ElasticSettings::from_config(&config.elastic),
        Arc::clone(&http),
        submitter.clone(),
    );
    let cache = Arc::new(ConnectionPool::new(Arc::new(elastic), config.elastic.pool_size));

    let engine = Arc::new(Engine::new(
        Arc::clone(&primary),
        Arc::clone(&cache),
        fingerprinter::from_config(&config.core),
        http,
        submitter,
        EngineSettings::from_config(&config),
    ));
    info!("Matching engine initialized");

    let mut server = RpcServer::new(config.server.queues, config.server.threads_per_queue);
    register_track_service(&mut server, Arc::clone(&engine));
    server.run().context("Failed to start RPC server")?;

    let app = build_router(server.channel());
    let address = config.server.address.clone();
    runtime.block_on(async move {
        info!("Starting HTTP gateway on {}", address);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .context("Failed to bind to address")?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")
    })?;

    server.shutdown();
    engine.wait_for_background();
    drop(engine);
    AsyncManager::shutdown();
    primary.close();
    cache.close();
    runtime.shutdown_timeout(Duration::from_secs(5));

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
