//! Portico server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                         PORTICO                          │
//!                 │                                                          │
//!   Client        │  ┌──────────┐   ┌────────────┐   ┌──────────────────┐    │
//!   ──────────────┼─▶│   net    │──▶│orchestrator│──▶│  RouteRegistry   │    │
//!                 │  │listener +│   │ decode,    │   │ context → target │    │
//!                 │  │connection│   │ CSRF, 500s │   └────────┬─────────┘    │
//!                 │  └────▲─────┘   └─────┬──────┘            │              │
//!                 │       │               │ Dispatcher        ▼              │
//!                 │       │               │ inline | pool  handler | files   │
//!                 │       │               ▼                | adapter         │
//!   ◀─────────────┼───────┴──── producer chain (header, body, chunking)      │
//!                 │                                                          │
//!                 │   config · observability · security · lifecycle · vfs    │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use portico::config::{load_config, validate_config, ConfigError, ServerConfig};
use portico::lifecycle;
use portico::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "portico")]
#[command(about = "HTTP/1.x application server", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `server.threads`.
    #[arg(short, long)]
    threads: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(threads) = args.threads {
        config.server.threads = threads;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portico starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        threads = config.server.threads,
        file_stores = config.file_stores.len(),
        "Configuration loaded"
    );

    lifecycle::run(config).await?;
    Ok(())
}
