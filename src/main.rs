//! Notification engine server
//!
//! Binds the operational HTTP surface, connects the Postgres store, and
//! runs the drain loop and periodic triggers until a shutdown signal.

use clap::Parser;
use notify_engine::config::EngineConfig;
use notify_engine::store::PgStore;
use notify_engine::{routes, NotificationEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "notify-engine-server",
    version,
    about = "Priority-based multi-channel notification delivery engine"
)]
struct Cli {
    /// Log filter directive
    #[arg(
        long,
        env = "NOTIFY_ENGINE_LOG",
        default_value = "notify_engine=info,tower_http=info"
    )]
    log: String,

    /// Override the configured bind host
    #[arg(long, env = "NOTIFY_ENGINE_HOST")]
    host: Option<String>,

    /// Override the configured bind port
    #[arg(long, env = "NOTIFY_ENGINE_PORT")]
    port: Option<u16>,

    /// Layer in a config file (TOML/YAML)
    #[arg(long, env = "NOTIFY_ENGINE_CONFIG_FILE")]
    config_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(config_file) = &cli.config_file {
        // from_env picks the file up through this variable
        std::env::set_var("NOTIFY_ENGINE_CONFIG_FILE", config_file);
    }

    let mut config = EngineConfig::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    info!(
        drain_interval = config.drain.interval_seconds,
        batch_size = config.drain.batch_size,
        "starting notification engine"
    );

    // A store that cannot be reached within the retry budget is fatal
    let store = Arc::new(PgStore::connect(&config.store).await?);
    let engine = Arc::new(NotificationEngine::new(config.clone(), store, None)?);

    let shutdown = CancellationToken::new();
    let worker_handles = engine.start(shutdown.clone())?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "operational endpoints listening");

    let router = routes::create_router(engine);
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining workers");
    shutdown.cancel();

    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task panicked during shutdown");
        }
    }
    server.await??;

    info!("notification engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
