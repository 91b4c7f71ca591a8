//! TeaDB - A Small Networked Key-Value Store
//!
//! This is the main entry point for the TeaDB server. It reads the config
//! file, sets up logging and runs the server until Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use teadb::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// TeaDB - a small networked key-value store with per-key TTLs
#[derive(Debug, Parser)]
#[command(name = "teadb", version, about)]
struct Args {
    /// Path to the JSON config file; created with defaults if missing
    #[arg(short, long, default_value = teadb::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn print_banner(config: &Config) {
    println!(
        r#"
   ______          ____  ____
  /_  __/__  ____ / __ \/ __ )
   / / / _ \/ __ `/ / / / __  |
  / / /  __/ /_/ / /_/ / /_/ /
 /_/  \___/\__,_/_____/_____/

TeaDB v{} - Networked Key-Value Store
──────────────────────────────────────────────────────────────
TCP  {}
HTTP {}
Store file {}

Use Ctrl+C to shutdown gracefully.
"#,
        teadb::VERSION,
        config.tcp_address(),
        config.http_address(),
        config.store_path.display(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = Config::load_or_create(&args.config)?;
    info!(path = %args.config.display(), config = ?config, "Configuration loaded");

    print_banner(&config);

    Server::bind(config).await?.run().await?;
    Ok(())
}
