//! Access Control Gate
//!
//! Operator identity in, allow/deny out. Pure lookup against the policy
//! whitelist; callers write the audit record.

use std::sync::Arc;
use tether_tools::{DenyReason, OperatorId, Policy, Verdict};
use tracing::warn;

/// Whitelist check run before anything else.
#[derive(Debug, Clone)]
pub struct AccessGate {
    policy: Arc<Policy>,
}

impl AccessGate {
    /// Create a gate. Warns once when the whitelist is empty.
    #[must_use]
    pub fn new(policy: Arc<Policy>) -> Self {
        if policy.is_open() {
            warn!("No authorized operators configured; every operator is allowed");
        }
        Self { policy }
    }

    /// Allow whitelisted operators, or everyone when the whitelist is empty.
    #[must_use]
    pub fn authorize(&self, operator: &OperatorId) -> Verdict {
        if self.policy.is_open() || self.policy.is_authorized(operator) {
            Verdict::Allow
        } else {
            warn!(operator = %operator, "Operator not whitelisted");
            Verdict::Deny(DenyReason::NotWhitelisted)
        }
    }

    /// Whether the whitelist is empty.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.policy.is_open()
    }
}
