//! Civic Issue REST API Server
//!
//! Serves the issue reporting API, runs the periodic status sweep and
//! delivers new-issue notifications.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use civic::config::{ServiceConfig, StorageBackend};
use civic::notify::NotificationQueue;
use civic::storage::{InMemoryStorage, IssueStore, JsonFileStorage};
use civic::{IssueService, Sweeper, TransitionPolicy};
use civic_server::upload::UploadDir;
use civic_server::{create_app, AppState};

/// Command-line options; each also reads from the named environment variable
/// and overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "civic-server", version, about = "REST API server for civic issue reports")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CIVIC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "CIVIC_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Directory receiving uploaded photos
    #[arg(long, env = "CIVIC_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Storage backend: json, memory or mongodb
    #[arg(long, env = "CIVIC_STORAGE")]
    storage: Option<String>,

    /// Root directory of the JSON storage backend
    #[arg(long, env = "CIVIC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "MONGODB_URI")]
    mongodb_uri: Option<String>,

    #[arg(long, env = "MONGODB_DB")]
    mongodb_db: Option<String>,

    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT")]
    smtp_port: Option<u16>,

    #[arg(long, env = "SMTP_USER")]
    smtp_user: Option<String>,

    #[arg(long, env = "SMTP_PASS", hide_env_values = true)]
    smtp_pass: Option<String>,

    /// Recipient of new-issue notifications
    #[arg(long, env = "NOTIFY_EMAIL")]
    notify_email: Option<String>,

    /// Manual status update rule: unrestricted or forward-only
    #[arg(long, env = "CIVIC_TRANSITION_POLICY")]
    transition_policy: Option<String>,
}

impl Cli {
    /// Load the config file (if any) and apply command-line overrides.
    fn service_config(&self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::load(self.config.as_deref())?;

        if let Some(storage) = &self.storage {
            config.storage.backend = storage.parse::<StorageBackend>().map_err(|e| anyhow!(e))?;
        }
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if let Some(uri) = &self.mongodb_uri {
            config.storage.mongodb_uri = uri.clone();
        }
        if let Some(db) = &self.mongodb_db {
            config.storage.mongodb_db = db.clone();
        }
        if let Some(host) = &self.smtp_host {
            config.notify.smtp_host = host.clone();
        }
        if let Some(port) = self.smtp_port {
            config.notify.smtp_port = port;
        }
        if self.smtp_user.is_some() {
            config.notify.smtp_user = self.smtp_user.clone();
        }
        if self.smtp_pass.is_some() {
            config.notify.smtp_pass = self.smtp_pass.clone();
        }
        if self.notify_email.is_some() {
            config.notify.notify_email = self.notify_email.clone();
        }
        if let Some(policy) = &self.transition_policy {
            config.transition_policy = policy.parse::<TransitionPolicy>().map_err(|e| anyhow!(e))?;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.service_config()?;

    info!("Starting civic issue API server...");

    match config.storage.backend {
        StorageBackend::Json => {
            info!("Using JSON storage at: {}", config.storage.data_dir.display());
            let storage = JsonFileStorage::new(&config.storage.data_dir);
            serve(storage, config, &cli).await
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage (issues are lost on exit)");
            serve(InMemoryStorage::new(), config, &cli).await
        }
        #[cfg(feature = "mongodb")]
        StorageBackend::Mongodb => {
            info!("Using MongoDB database: {}", config.storage.mongodb_db);
            let storage = civic::storage::MongoStorage::connect(
                &config.storage.mongodb_uri,
                &config.storage.mongodb_db,
            )
            .await?;
            serve(storage, config, &cli).await
        }
        #[cfg(not(feature = "mongodb"))]
        StorageBackend::Mongodb => {
            Err(anyhow!(
                "MongoDB storage requested but civic-server was built without the 'mongodb' feature"
            ))
        }
    }
}

/// Wire the service to `storage` and run until Ctrl-C.
async fn serve<S: IssueStore>(storage: S, config: ServiceConfig, cli: &Cli) -> Result<()> {
    storage.init().await.map_err(|e| {
        anyhow!(
            "Failed to initialize storage: {:#}\n\n\
             Check that the data directory is writable or that the database is reachable.",
            e
        )
    })?;

    let mut service = IssueService::new(storage.clone()).with_policy(config.transition_policy);
    let notifier = match NotificationQueue::from_config(&config.notify)? {
        Some((queue, worker)) => {
            service = service.with_notifications(queue);
            Some(worker)
        }
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = Sweeper::new(storage, config.sweep.clone()).spawn(shutdown_rx);

    let uploads = UploadDir::create(&cli.uploads_dir).await?;
    info!("Serving uploads from: {}", uploads.root().display());

    let app = create_app(AppState::new(service, uploads));

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the notification sender) is gone; let the
    // background tasks finish.
    let _ = shutdown_tx.send(true);
    sweep.await.context("Status sweep task panicked")?;
    if let Some(worker) = notifier {
        worker.await.context("Notification worker panicked")?;
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
