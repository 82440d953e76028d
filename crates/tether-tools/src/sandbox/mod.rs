//! Policy-based sandbox
//!
//! Confinement is by policy, not by kernel isolation:
//! - `policy`: the immutable policy store (root, denylists, whitelist)
//! - `validator`: command and path checks against that policy
//!
//! Both are pure and lock-free so they can be called from any task.

mod path;
mod policy;
mod validator;


pub use policy::{PathPrefix, Policy};
pub use validator::SandboxValidator;

use crate::types::DenyReason;

/// Allow/deny decision shared by the gate and the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Request may proceed
    Allow,
    /// Request is refused
    Deny(DenyReason),
}

impl Verdict {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert into a `Result`, for `?` chaining of several checks.
    pub fn into_result(self) -> std::result::Result<(), DenyReason> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason),
        }
    }
}
