//! BleepStore -- S3-compatible object storage server.
//!
//! Crash-only design: every startup is a recovery. There is no separate
//! recovery mode. SIGTERM/SIGINT handlers only stop accepting connections
//! and wait with a timeout before exiting -- no cleanup.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use bleepstore::metadata::store::CredentialRecord;

/// Command-line arguments for the BleepStore server.
#[derive(Parser, Debug)]
#[command(
    name = "bleepstore",
    version,
    about = "S3-compatible object storage server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bleepstore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("loading configuration from {}", cli.config);
    let config = bleepstore::config::load_config(&cli.config)?;

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    // Crash-only startup: every startup IS recovery.
    info!("crash-only startup: performing recovery checks");

    let metadata: Arc<dyn bleepstore::metadata::store::MetadataStore> =
        match config.metadata.engine.as_str() {
            "memory" => {
                info!("in-memory metadata store initialized");
                Arc::new(bleepstore::metadata::memory::MemoryMetadataStore::new())
            }
            "sqlite" | _ => {
                let metadata_path = &config.metadata.sqlite.path;
                if let Some(parent) = std::path::Path::new(metadata_path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = bleepstore::metadata::sqlite::SqliteMetadataStore::new(metadata_path)?;
                info!("sqlite metadata store initialized at {}", metadata_path);
                Arc::new(store)
            }
        };

    // Seed default credentials from config. Idempotent: a prior startup's
    // secret is never overwritten.
    metadata
        .put_credential_if_absent(CredentialRecord {
            access_key_id: config.auth.access_key.clone(),
            secret_key: config.auth.secret_key.clone(),
            owner_id: config.auth.access_key.clone(),
            display_name: config.auth.access_key.clone(),
            active: true,
            created_at: String::new(),
        })
        .await?;
    info!("default credentials seeded");

    // Reap multipart uploads that were abandoned before the crash; their
    // part data is orphaned and must go with them.
    let cutoff = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
        - (config.multipart_upload_ttl_days as i64 * 86_400);
    let reaped = metadata.reap_expired_uploads(cutoff).await?;
    if !reaped.is_empty() {
        info!("reaped {} expired multipart upload(s)", reaped.len());
    }

    let storage: Arc<dyn bleepstore::storage::backend::StorageBackend> =
        match config.storage.backend.as_str() {
            "memory" => {
                info!("in-memory storage backend initialized");
                Arc::new(bleepstore::storage::memory::MemoryBackend::new(0, "none", "", 0)?)
            }
            "local" | _ => {
                let storage_root = &config.storage.local.root_dir;
                let local_backend = bleepstore::storage::local::LocalBackend::new(storage_root)?;
                info!("local storage backend initialized at {}", storage_root);
                Arc::new(local_backend)
            }
        };

    for upload_id in &reaped {
        let _ = storage.delete_parts("", upload_id).await;
    }

    let state = Arc::new(bleepstore::AppState {
        config: config.clone(),
        metadata,
        storage,
        auth_cache: bleepstore::auth::AuthCache::new(),
    });

    let app = bleepstore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("bleepstore listening on {}", bind_addr);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections,
    // wait for in-flight requests to complete (with timeout), then exit.
    // No cleanup -- crash-only design means next startup handles recovery.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bleepstore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        },
    }
}
