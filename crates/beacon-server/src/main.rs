//! btc-beacon server — headless driver for MuSig2 beacon keygen and signing.
//!
//! Runs a coordinator and its configured participants through cohort
//! formation and, unless disabled, one signing session over the beacon
//! address.
//!
//! # Usage
//!
//! ```bash
//! beacon-server --config /path/to/beacon-server.toml
//! beacon-server --keygen-only  # Stop after the cohort is set
//! beacon-server --validate     # Validate config and exit
//! ```

mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args (minimal — no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("beacon-server.toml");
    let mut keygen_only = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--keygen-only" => {
                keygen_only = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("beacon-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config
    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply env overrides
    server_config.apply_env_overrides();

    // Validate
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &server_config.coordinator.log_level);
    env_logger::init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Network:       {}", server_config.bitcoin.network);
        println!("  Coordinator:   {}", server_config.coordinator.name);
        println!(
            "  Cohort size:   {}",
            server_config.coordinator.min_participants
        );
        println!("  Participants:  {}", server_config.participants.len());
        println!("  Signing:       {}", server_config.signing.enabled);
        return Ok(());
    }

    // Build tokio runtime
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    let outcome = rt.block_on(async {
        tokio::select! {
            result = daemon::run(&server_config, keygen_only) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received shutdown signal. Exiting…");
                Ok(())
            }
        }
    });

    if let Err(e) = outcome {
        log::error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!("beacon-server — MuSig2 beacon keygen and signing daemon");
    println!();
    println!("USAGE:");
    println!("  beacon-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <PATH>   Config file (default: beacon-server.toml)");
    println!("      --keygen-only     Stop after the cohort is set");
    println!("      --validate        Validate the config and exit");
    println!("  -h, --help            Show this help");
    println!("  -V, --version         Show version");
}
