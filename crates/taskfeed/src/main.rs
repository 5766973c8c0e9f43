//! # taskfeed
//!
//! Taskfeed server binary. Wires settings, the task store, token validation
//! and the HTTP/WebSocket server together.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use taskfeed_auth::{JwtTokenService, TokenValidator};
use taskfeed_core::UserId;
use taskfeed_core::logging::init_subscriber;
use taskfeed_server::config::{RegistryConfig, ServerConfig};
use taskfeed_server::metrics::install_recorder;
use taskfeed_server::server::TaskfeedServer;
use taskfeed_settings::{AuthSettings, DatabaseSettings, Settings};
use taskfeed_store::{ConnectionConfig, SqliteTaskStore};

/// Task tracking server with real-time WebSocket fan-out.
#[derive(Parser, Debug)]
#[command(name = "taskfeed", about = "Task tracking server with real-time WebSocket fan-out")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default).
    Serve(ServeArgs),
    /// Print a bearer token for a user, signed with the configured secret.
    Token(TokenArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database, or `:memory:` (overrides settings).
    #[arg(long)]
    db_path: Option<String>,

    /// Settings file (default `~/.taskfeed/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path.clone_from(path);
        }
    }
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// User id to embed as the subject.
    #[arg(long)]
    user: String,

    /// Settings file (default `~/.taskfeed/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = path.map_or_else(taskfeed_settings::settings_path, Path::to_path_buf);
    taskfeed_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn token_service(auth: &AuthSettings) -> JwtTokenService {
    let service = JwtTokenService::new(&auth.secret)
        .with_ttl(chrono::Duration::seconds(auth.token_ttl_secs));
    match &auth.issuer {
        Some(issuer) => service.with_issuer(issuer.clone()),
        None => service,
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(db: &DatabaseSettings) -> Result<SqliteTaskStore> {
    if db.is_in_memory() {
        return SqliteTaskStore::in_memory().context("Failed to open in-memory database");
    }
    ensure_parent_dir(Path::new(&db.path))?;
    let config = ConnectionConfig {
        pool_size: db.pool_size,
        ..ConnectionConfig::default()
    };
    SqliteTaskStore::open(&db.path, &config)
        .with_context(|| format!("Failed to open database at {}", db.path))
}

fn issue_token(args: &TokenArgs) -> Result<()> {
    let settings = load_settings(args.settings.as_deref())?;
    let token = token_service(&settings.auth)
        .issue(&UserId::from(args.user.as_str()))
        .context("Failed to issue token")?;
    println!("{token}");
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings(args.settings.as_deref())?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    if settings.auth.uses_dev_secret() {
        tracing::warn!("using the built-in development JWT secret; set TASKFEED_JWT_SECRET");
    }

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let store = open_store(&settings.database)?;
    tracing::info!(path = %settings.database.path, "task store ready");

    let validator: Arc<dyn TokenValidator> = Arc::new(token_service(&settings.auth));
    let server = TaskfeedServer::new(
        ServerConfig::from_settings(&settings),
        RegistryConfig::from_settings(&settings),
        validator,
        Arc::new(store),
        metrics,
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("taskfeed listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(server.registry(), vec![handle], None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None => serve(ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve(args).await,
        Some(Command::Token(args)) => issue_token(&args),
    }
}
