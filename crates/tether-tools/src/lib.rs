//! Tether Tools - Sandbox Validation and Execution Backends
//!
//! This crate provides the execution side of Tether:
//! - Sandbox: policy store plus command/path validation
//! - Exec: one-shot runs of the external CLI tool
//! - Sessions: external session listing and pinning
//! - Interactive: the single long-lived multiplexed terminal session

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod exec;
pub mod interactive;
pub mod output;
pub mod sandbox;
pub mod sessions;
pub mod types;

pub use error::{Error, Result};
pub use exec::{ExecConfig, OneShotExecutor};
pub use interactive::{
    InteractiveConfig, InteractiveSessionManager, Multiplexer, SessionReply, SessionState,
    TmuxMultiplexer,
};
pub use sandbox::{Policy, SandboxValidator, Verdict};
pub use sessions::{PinScope, SessionRegistry, SessionSource, SessionSummary, ToolHistorySource};
pub use types::{
    DenyOrigin, DenyReason, ExecutionRequest, ExecutionResult, ExitStatus, InternalKind, OperatorId,
    SessionId,
};
