//! One-shot execution of the external CLI tool

/// Executor configuration
pub mod config;
mod runner;


pub use config::ExecConfig;
pub use runner::OneShotExecutor;
