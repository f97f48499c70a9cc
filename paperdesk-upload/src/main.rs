//! paperdesk-upload - batch document upload client
//!
//! `serve` runs the local observer API (session snapshots, commands, SSE).
//! `submit` performs one batch submission and prints the final session as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paperdesk_common::events::{EventBus, UploadEvent};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperdesk_upload::config::{CliOverrides, UploadConfig};
use paperdesk_upload::models::{BatchMetadata, FileSelection, PolicyStore, SessionStatus};
use paperdesk_upload::services::{HttpTransport, UploadOrchestrator};
use paperdesk_upload::AppState;

const MODULE_NAME: &str = "paperdesk-upload";

#[derive(Parser)]
#[command(version, about = "Batch document upload client")]
struct Cli {
    /// TOML config file (default: <config dir>/paperdesk/paperdesk-upload.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Document processing server base URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Root folder holding the local database
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local observer API
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Submit one batch and print the final session
    Submit {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        authors: String,
        #[arg(long = "abstract", default_value = "")]
        abstract_text: String,
        /// Files to upload, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => paperdesk_common::config::default_config_path(MODULE_NAME)?,
    };
    let toml_config = paperdesk_common::config::load_toml_config(&config_path)?;

    init_tracing(&toml_config.logging)?;

    info!("Starting {} v{} ({})", MODULE_NAME, env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!("Config file: {}", config_path.display());

    let port_override = match &cli.command {
        Command::Serve { port } => *port,
        Command::Submit { .. } => None,
    };
    let overrides = CliOverrides {
        server_url: cli.server_url.clone(),
        port: port_override,
        root_folder: cli.root_folder.clone(),
    };
    let config = UploadConfig::resolve(&overrides, &toml_config)?;
    info!("Server: {}", config.server_url);
    info!("Root folder: {}", config.root_folder.display());

    let db_path = paperdesk_common::config::database_path(&config.root_folder);
    let db_pool = paperdesk_upload::db::init_database_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database: {}", db_path.display());

    let event_bus = EventBus::new(100);
    let transport = Arc::new(
        HttpTransport::new(
            config.server_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
        .context("Failed to create HTTP transport")?,
    );

    let mut orchestrator = UploadOrchestrator::new(
        transport.clone(),
        PolicyStore::new(config.tier.clone()),
        event_bus.clone(),
    )
    .with_history(db_pool.clone())
    .with_config(config.orchestrator_config());
    if config.processing_poll_interval.is_some() {
        orchestrator = orchestrator.with_processing_source(transport);
    }

    match cli.command {
        Command::Serve { .. } => serve(config, AppState::new(db_pool, event_bus, orchestrator)).await,
        Command::Submit {
            title,
            authors,
            abstract_text,
            files,
        } => {
            let metadata = BatchMetadata {
                title,
                authors,
                abstract_text,
            };
            submit_once(orchestrator, event_bus, files, metadata).await
        }
    }
}

fn init_tracing(logging: &paperdesk_common::config::LoggingConfig) -> Result<()> {
    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

async fn serve(config: UploadConfig, state: AppState) -> Result<()> {
    let app = paperdesk_upload::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn submit_once(
    orchestrator: UploadOrchestrator,
    event_bus: EventBus,
    files: Vec<PathBuf>,
    metadata: BatchMetadata,
) -> Result<()> {
    let selection = FileSelection::from_paths(&files)
        .await
        .context("Failed to read selected files")?;

    let mut rx = event_bus.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                UploadEvent::TransferProgress { percent, .. } => info!("Uploading: {}%", percent),
                UploadEvent::QuotaUpdated { tier_name, remaining, .. } => {
                    info!("Remaining {} uploads this period: {}", tier_name, remaining)
                }
                other if other.is_terminal() => break,
                _ => {}
            }
        }
    });

    let session = orchestrator.submit(selection, metadata).await?;
    reporter.abort();

    println!("{}", serde_json::to_string_pretty(&session)?);

    match &session.status {
        SessionStatus::Succeeded => Ok(()),
        SessionStatus::RejectedLocally { reason } => anyhow::bail!("Selection rejected: {}", reason),
        SessionStatus::Failed { reason } => anyhow::bail!("Upload failed: {}", reason),
        SessionStatus::PartiallyFailed => anyhow::bail!(
            "{} of {} files rejected by the server",
            session.failed_entries.len(),
            session.selection.len()
        ),
        other => anyhow::bail!("Upload ended in unexpected state {}", other.name()),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
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
