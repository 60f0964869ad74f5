// src/main.rs

//! The main entry point for the warden monitor process.

use anyhow::Result;
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("warden version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .or_else(|| args.get(1).map(|s| s.as_str()))
        .unwrap_or("warden.toml");

    // Defaults to a more verbose level for warden-specific modules.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,warden=debug".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    info!("starting warden, loading config from \"{config_path}\"");

    if let Err(e) = warden::core::warden::run(config_path).await {
        error!("warden runtime error: {e}");
        return Err(e);
    }

    Ok(())
}
