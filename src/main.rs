//! Application entry point for the `relief-ledger` service.
//!
//! This binary orchestrates the startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Selecting the storage backend: PostgreSQL when `DATABASE_URL` is set
//!   (creating the schema if it does not exist), otherwise in-memory
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `LISTEN_PORT` (optional) – HTTP port (default: 8080)
//! - `ALERT_THRESHOLDS` (optional) – per-type threshold overrides
//! - `LEDGER_LOG_LEVEL` (optional) – log verbosity when `RUST_LOG` is unset (default: `debug`)
//! - `LEDGER_SPAN_EVENTS` (optional) – span event mode for tracing
//! - `FORCE_COLOR` (optional) – force ANSI colour on or off
use std::{env, io::IsTerminal, net::SocketAddr};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use relief_ledger::{config, routes, schema, Config, Ledger};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let ledger = open_ledger(&cfg).await?;
    tracing::info!("Ledger backend: {}", ledger.backend_name());

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(ledger);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect the configured backend, preparing the schema for Postgres.
async fn open_ledger(cfg: &Config) -> Result<Ledger> {
    // ---
    let Some(db_url) = &cfg.db_url else {
        return Ok(Ledger::in_memory(cfg.thresholds.clone()));
    };

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    Ok(Ledger::postgres(pool, cfg.thresholds.clone()))
}

// ---

/// Install the global `tracing` subscriber. Call once, before the first log line.
///
/// `RUST_LOG` wins when set; otherwise `LEDGER_LOG_LEVEL` picks the level
/// (default `debug`) and sqlx statement logging is held at `warn`.
fn init_tracing() {
    // ---
    let var = |name: &str| env::var(name).ok();
    let filter = log_filter(var("RUST_LOG").is_some(), var("LEDGER_LOG_LEVEL").as_deref());
    let color = use_color(var("FORCE_COLOR").as_deref(), std::io::stdout().is_terminal());

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events(var("LEDGER_SPAN_EVENTS").as_deref()))
        .with_env_filter(filter)
        .with_ansi(color)
        .compact()
        .init();
}

/// `full` traces enter/exit/close with timings, `enter_exit` drops close;
/// anything else logs span close only.
fn span_events(mode: Option<&str>) -> FmtSpan {
    match mode {
        Some("full") => FmtSpan::FULL,
        Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

/// `FORCE_COLOR` overrides terminal detection in either direction.
fn use_color(force: Option<&str>, is_terminal: bool) -> bool {
    match force {
        Some("1" | "true" | "yes") => true,
        Some("0" | "false" | "no") => false,
        _ => is_terminal,
    }
}

fn log_filter(rust_log_set: bool, level: Option<&str>) -> EnvFilter {
    // ---
    if rust_log_set {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(default_directives(level))
}

/// Unknown or missing levels fall back to `debug`.
fn default_directives(level: Option<&str>) -> String {
    let level = level
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::DEBUG);
    format!("{},sqlx::query=warn", level.to_string().to_lowercase())
}
