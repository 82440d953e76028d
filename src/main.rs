//! Tether - sandboxed remote control of a CLI coding tool
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

mod app;
mod cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let Some(command) = cli.command else {
        cli::print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let config = app::load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let _guard = app::init_tracing(&config.logging)?;

    info!("Starting Tether v{}", env!("CARGO_PKG_VERSION"));

    match cli::run(&cli.operator, command, config).await {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) => {
            error!(error = %e, "Tether failed");
            Err(e)
        }
    }
}
