//! s3www -- serve a static website straight out of an S3 bucket.
//!
//! SIGTERM/SIGINT stop accepting connections and give in-flight requests
//! `server.shutdown_timeout` seconds to complete before exiting.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use s3www::cache::DirCache;
use s3www::config::{load_config, Config, ConfigOverrides, LoggingConfig};
use s3www::fs::BucketFs;
use s3www::storage::backend::ObjectStore;
use s3www::storage::s3::S3Backend;
use s3www::AppState;

/// Command-line arguments for the s3www server.
#[derive(Parser, Debug)]
#[command(
    name = "s3www",
    version,
    about = "Serve static files from an S3 compatible bucket"
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long, env = "S3WWW_CONFIG")]
    config: Option<String>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => Config::default(),
    };
    cli.overrides.apply(&mut config);

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }
    config.validate()?;

    if config.observability.metrics {
        s3www::metrics::init_metrics()?;
        s3www::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store: Arc<dyn ObjectStore> = Arc::new(S3Backend::new(&config.storage).await?);

    let cache = Arc::new(DirCache::new(config.cache.ttl()?));
    let cleanup_interval = config.cache.cleanup_interval()?;
    if cache.spawn_janitor(cleanup_interval).is_some() {
        info!(
            "Directory cache: ttl={:?} cleanup every {:?}",
            cache.ttl(),
            cleanup_interval
        );
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if !config.observability.address.is_empty() {
        let address = config.observability.address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {address}"))?;
        info!("Metrics and health checks on http://{}", address);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, s3www::metrics::observability_app())
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = server.await {
                error!("Metrics listener failed: {}", e);
            }
        });
    }

    let tls_config = if config.server.tls_enabled() {
        Some(s3www::tls::load_tls_config(
            &config.server.tls_cert,
            &config.server.tls_key,
        )?)
    } else {
        None
    };
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let address = config.server.address.clone();

    let state = Arc::new(AppState {
        config,
        fs: BucketFs::new(store, cache),
    });
    let app = s3www::server::app(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    match tls_config {
        Some(tls_config) => {
            info!("s3www listening on https://{}", address);
            s3www::tls::serve_tls(listener, tls_config, app, shutdown, drain_timeout).await?;
        }
        None => {
            info!("s3www listening on http://{}", address);
            serve_http(listener, app, shutdown, drain_timeout).await?;
        }
    }

    info!("s3www shut down");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve plain HTTP until `shutdown` is cancelled, then wait at most
/// `drain_timeout` for open connections.
async fn serve_http(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            warn!(
                "Connections still open after {:?}, shutting down anyway",
                drain_timeout
            );
        }
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
