//! CLI module for Tether
//!
//! One-shot subcommands plus `console`, which keeps a single engine (and
//! therefore a single interactive session) alive across many requests.

use crate::app::{build_engine, AppConfig, Settings};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tether_tools::OperatorId;

mod check;
mod command;
mod console;

use command::{execute, Limits, Request};

/// Tether command execution sandbox
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Sandboxed remote control of a CLI coding tool")]
#[command(version)]
pub struct Cli {
    /// Additional configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Operator identity checked against the whitelist
    #[arg(long, global = true, env = "TETHER_OPERATOR", default_value = "local")]
    pub operator: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one instruction through the external tool
    Run {
        /// Continue a specific session
        #[arg(long, conflicts_with = "continue_latest")]
        session: Option<String>,
        /// Continue the tool's most recent session
        #[arg(long = "continue")]
        continue_latest: bool,
        /// Instruction text
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List recently active sessions
    Sessions {
        /// Maximum sessions shown (1-20)
        #[arg(long)]
        limit: Option<usize>,
        /// Activity window in minutes
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Pin or unpin a session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Resolve a workspace file for download
    Pull {
        path: String,
    },
    /// Copy a local file into the workspace
    Push {
        file: PathBuf,
        /// Name inside the workspace
        #[arg(long)]
        name: Option<String>,
    },
    /// Validate configuration and print the effective policy
    Check {
        /// Also print the merged configuration as TOML
        #[arg(long)]
        dump: bool,
    },
    /// Read slash commands from stdin
    Console,
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Pin a session id
    Set { id: String },
    /// Clear the pin
    Reset,
}

impl Commands {
    fn into_request(self) -> Option<Request> {
        Some(match self {
            Self::Run {
                session,
                continue_latest,
                command,
            } => Request::Run {
                session,
                continue_latest,
                command: command.join(" "),
            },
            Self::Sessions { limit, minutes } => Request::Sessions { limit, minutes },
            Self::Session {
                action: SessionAction::Set { id },
            } => Request::SessionSet(id),
            Self::Session {
                action: SessionAction::Reset,
            } => Request::SessionReset,
            Self::Pull { path } => Request::Pull(path),
            Self::Push { file, name } => Request::Push { file, name },
            Self::Check { .. } | Self::Console => return None,
        })
    }
}

/// Print top-level usage.
pub fn print_help() -> Result<()> {
    let mut cmd = <Cli as clap::CommandFactory>::command();
    cmd.print_help()?;
    println!();
    Ok(())
}

/// Run `command` as `operator`. Returns whether it succeeded.
pub async fn run(operator: &str, command: Commands, config: AppConfig) -> Result<bool> {
    let settings = Settings::from_config(&config)?;
    if let Commands::Check { dump } = command {
        return check::run(&config, &settings, dump);
    }

    let limits = Limits {
        exec_timeout: settings.exec.default_timeout,
        tui_timeout: settings.interactive_timeout,
        list_limit: settings.list_limit,
        list_minutes: settings.list_active_minutes,
    };
    let operator = OperatorId::new(operator.trim());
    let engine = build_engine(settings).await?;

    match command.into_request() {
        Some(request) => {
            let reply = execute(&engine, &operator, request, &limits).await;
            println!("{}", reply.text);
            Ok(reply.ok)
        }
        None => {
            console::run(Arc::new(engine), operator, limits).await?;
            Ok(true)
        }
    }
}
