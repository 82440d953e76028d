//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Keys accepting comma-separated lists from the environment
const LIST_KEYS: &[&str] = &[
    "policy.authorized_operators",
    "policy.blocked_commands",
    "policy.blocked_paths",
    "exec.strip_env",
];

/// Load configuration from files and environment
pub fn load_config(extra: Option<&Path>) -> Result<AppConfig> {
    let mut env = Environment::with_prefix("TETHER")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .try_parsing(true);
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    build(extra, Some(env))
}

fn build(extra: Option<&Path>, env: Option<Environment>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. Local overrides (optional)
        .add_source(File::with_name("config/local").required(false));

    // 3. Explicit file (must exist when given)
    if let Some(path) = extra {
        builder = builder.add_source(File::from(path).required(true));
    }

    // 4. Environment variables (highest priority)
    if let Some(env) = env {
        builder = builder.add_source(env);
    }

    builder
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
