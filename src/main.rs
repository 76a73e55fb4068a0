//! Leasehold -- blob and container lease server.
//!
//! Leases carry no timers: expiry and break completion are derived from
//! stored timestamps on every request, so a restart needs no recovery
//! beyond reopening the storage backend.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use leasehold::auth::TokenRegistry;
use leasehold::clock::SystemClock;
use leasehold::config::Config;
use leasehold::lease::{LeaseManager, LeasePolicy};
use leasehold::storage::backend::StorageBackend;

/// Command-line arguments for the Leasehold server.
#[derive(Parser, Debug)]
#[command(
    name = "leasehold",
    version,
    about = "Blob and container lease server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "leasehold.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = leasehold::config::load_config(&cli.config)?;

    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        leasehold::metrics::init_metrics();
        leasehold::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let backend = open_backend(&config)?;

    let tokens = TokenRegistry::from_config(&config.auth)?;
    info!("{} delegation token(s) registered", tokens.len());

    let policy = LeasePolicy {
        allow_renew_after_expiry: config.lease.allow_renew_after_expiry,
    };
    let leases = LeaseManager::new(backend, Arc::new(SystemClock), policy)
        .with_max_commit_attempts(config.lease.max_commit_attempts);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(leasehold::AppState {
        config,
        leases: Arc::new(leases),
        tokens,
    });

    let app = leasehold::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Leasehold listening on {}", bind_addr);

    // Stop accepting on SIGTERM/SIGINT, then give in-flight requests up
    // to the shutdown timeout.
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("In-flight requests did not finish within {:?}", shutdown_timeout);
        }
    }

    info!("Leasehold shut down");

    Ok(())
}

/// Install the global tracing subscriber.  `RUST_LOG` overrides
/// `logging.level`.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Open the storage backend named by `storage.backend`.
fn open_backend(config: &Config) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.storage.backend.as_str() {
        "sqlite" => {
            let path = &config.storage.sqlite.path;
            // Ensure parent directory exists for the SQLite file.
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let backend = leasehold::storage::sqlite::SqliteBackend::new(path)?;
            info!("SQLite storage backend initialized at {}", path);
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("In-memory storage backend initialized");
            Ok(Arc::new(leasehold::storage::memory::MemoryBackend::new()))
        }
        other => anyhow::bail!("unknown storage backend '{other}' (expected memory or sqlite)"),
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
