//! Clinic intake CLI entry point.
//!
//! Provides `serve` (default), `check-config`, and `migrate` subcommands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderName;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use clinic_intake::config::Config;
use clinic_intake::db;
use clinic_intake::engine::IntakeEngine;
use clinic_intake::http::{self, AppState, SessionMode};
use clinic_intake::logging;
use clinic_intake::providers::ollama::OllamaClient;
use clinic_intake::providers::retry::RetryingClient;
use clinic_intake::providers::CompletionClient;
use clinic_intake::schema::FieldSchema;
use clinic_intake::session::memory::MemorySessionStore;
use clinic_intake::session::sqlite::SqliteSessionStore;
use clinic_intake::session::SessionBackend;
use clinic_intake::store::sqlite::SqlitePatientStore;

/// Conversational patient intake service.
#[derive(Parser)]
#[command(name = "clinic-intake", version, about)]
struct Cli {
    /// Config file (defaults to `$INTAKE_CONFIG_PATH`, then `./intake.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute (default: `serve`).
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server until Ctrl-C.
    Serve,
    /// Load and validate the configuration, print a summary, and exit.
    CheckConfig,
    /// Create or upgrade the SQLite schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => handle_serve(config_path).await,
        Command::CheckConfig => handle_check_config(config_path),
        Command::Migrate => handle_migrate(config_path).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = Config::load(path).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run the HTTP server.
async fn handle_serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };
    config.validate().context("invalid configuration")?;

    let pool = db::connect(Path::new(&config.database.path))
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))?;

    let ollama = OllamaClient::new(
        config.completion.endpoint.clone(),
        config.completion.model.clone(),
        config.completion.timeout(),
    )
    .context("failed to build completion client")?;
    let completion: Arc<dyn CompletionClient> = Arc::new(RetryingClient::new(
        ollama,
        config.completion.max_retries,
        config.completion.backoff(),
    ));

    let engine = IntakeEngine::new(
        Arc::new(FieldSchema::patient()),
        Arc::new(config.route_table()),
        completion,
        Arc::new(SqlitePatientStore::new(pool.clone())),
        config.engine_settings(),
    )
    .context("failed to build intake engine")?;

    let sessions = match config.session.backend {
        SessionBackend::Cookie => SessionMode::Cookie {
            name: config.session.cookie_name.clone(),
        },
        SessionBackend::Memory => SessionMode::Server(Arc::new(MemorySessionStore::new())),
        SessionBackend::Sqlite => {
            let store = SqliteSessionStore::new(pool.clone());
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired sessions purged"),
                Err(e) => warn!(error = %e, "failed to purge expired sessions"),
            }
            SessionMode::Server(Arc::new(store))
        }
    };

    let auth_header = HeaderName::try_from(config.auth.header.to_lowercase())
        .with_context(|| format!("invalid auth header name {:?}", config.auth.header))?;

    let state = AppState {
        engine: Arc::new(engine),
        sessions,
        auth_header,
        session_ttl: config.session.ttl(),
    };
    let app = http::router(state, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(
        bind = %config.server.bind,
        model = %config.completion.model,
        backend = ?config.session.backend,
        "clinic intake listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        })
        .await
        .context("server error")?;

    pool.close().await;
    info!("clinic intake stopped");
    Ok(())
}

/// Validate the configuration and print a summary.
fn handle_check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let config = load_config(config_path)?;
    let routes = config.route_table();

    println!("configuration OK");
    println!("  bind:        {}", config.server.bind);
    println!("  completion:  {} ({})", config.completion.endpoint, config.completion.model);
    println!("  timeout:     {}s, retries {}", config.completion.timeout_secs, config.completion.max_retries);
    println!("  session:     {:?}, ttl {}s", config.session.backend, config.session.ttl_secs);
    println!(
        "  policy:      important >= {}, total >= {}, hard floor {}",
        config.policy.important_threshold,
        config.policy.total_threshold,
        config.policy.required_is_hard_floor
    );
    println!("  database:    {}", config.database.path);
    println!("  routes:      {}", routes.keys().collect::<Vec<_>>().join(", "));
    Ok(())
}

/// Apply the schema to the configured database.
async fn handle_migrate(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    logging::init_cli(&config.logging.level);
    let pool = db::connect(Path::new(&config.database.path))
        .await
        .with_context(|| format!("failed to migrate {}", config.database.path))?;
    pool.close().await;
    info!(path = %config.database.path, "database schema up to date");
    Ok(())
}
