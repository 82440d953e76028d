//! Error types for tether-tools

use thiserror::Error;

/// Tool error type
#[derive(Debug, Error)]
pub enum Error {
    /// The external program could not be started
    #[error("spawn failed for '{program}': {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The backing multiplexer session does not exist
    #[error("backing session not found: {0}")]
    SessionNotFound(String),

    /// A multiplexer control command failed
    #[error("multiplexer error: {0}")]
    Multiplexer(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed data read from the external tool
    #[error("parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
