//! Tether Core - Request Pipeline
//!
//! This crate ties the execution backends together:
//! - Access: operator whitelist gate
//! - Audit: append-only, day-partitioned JSONL trail
//! - Engine: gate, validate, execute, audit

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod audit;
pub mod engine;
pub mod error;

pub use access::AccessGate;
pub use audit::{AuditAction, AuditLog, AuditRecord, Decision};
pub use engine::{Engine, PullOutcome};
pub use error::{Error, Result};
