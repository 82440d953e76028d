use super::{SessionSource, SessionSummary};
use crate::error::Result;
use crate::sandbox::Verdict;
use crate::types::{DenyReason, ExecutionRequest, OperatorId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upper bound on `list_recent`
pub const MAX_LIST_LIMIT: usize = 20;

/// Key used for the single pin in global scope
const GLOBAL_KEY: &str = "*";

/// Who a pin applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinScope {
    /// One pin per operator
    #[default]
    Operator,
    /// One pin shared by everyone
    Global,
}

/// Known sessions plus the pinned one(s).
pub struct SessionRegistry {
    source: Arc<dyn SessionSource>,
    scope: PinScope,
    pins: RwLock<BTreeMap<String, SessionId>>,
    store: Option<PathBuf>,
}

impl SessionRegistry {
    /// Registry without persistence.
    pub fn new(source: Arc<dyn SessionSource>, scope: PinScope) -> Self {
        Self {
            source,
            scope,
            pins: RwLock::new(BTreeMap::new()),
            store: None,
        }
    }

    /// Persist pins to `path`, loading whatever is already there.
    ///
    /// A missing or unreadable file starts empty; ids that no longer pass
    /// validation are dropped.
    #[must_use]
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = load_pins(&path);
        if !loaded.is_empty() {
            info!(count = loaded.len(), path = %path.display(), "Loaded session pins");
        }
        self.pins = RwLock::new(loaded);
        self.store = Some(path);
        self
    }

    /// Configured pin scope.
    #[must_use]
    pub fn scope(&self) -> PinScope {
        self.scope
    }

    /// Up to `limit` sessions active in the last `active_minutes`, most
    /// recent first. `limit` is clamped to `1..=20`.
    pub async fn list_recent(
        &self,
        limit: usize,
        active_minutes: u64,
    ) -> Result<Vec<SessionSummary>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let window = Duration::from_secs(active_minutes.max(1) * 60);
        let mut sessions = self.source.recent_sessions(window).await?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        debug!(count = sessions.len(), limit, "Listed recent sessions");
        Ok(sessions)
    }

    /// Pin `raw` for `operator`, replacing any previous pin in that scope.
    pub async fn pin(&self, operator: &OperatorId, raw: &str) -> Verdict {
        let Some(session) = SessionId::parse(raw) else {
            return Verdict::Deny(DenyReason::InvalidRequest {
                detail: format!(
                    "session id must be 1-{} characters of [A-Za-z0-9_-]",
                    SessionId::MAX_LEN
                ),
            });
        };
        let mut pins = self.pins.write().await;
        pins.insert(self.key(operator), session.clone());
        info!(operator = %operator, session = %session, scope = ?self.scope, "Session pinned");
        self.persist(&pins).await;
        Verdict::Allow
    }

    /// Remove the pin in `operator`'s scope. Returns whether one existed.
    pub async fn unpin(&self, operator: &OperatorId) -> bool {
        let mut pins = self.pins.write().await;
        let removed = pins.remove(&self.key(operator)).is_some();
        if removed {
            info!(operator = %operator, scope = ?self.scope, "Session unpinned");
            self.persist(&pins).await;
        }
        removed
    }

    /// Pin in effect for `operator`.
    pub async fn pinned(&self, operator: &OperatorId) -> Option<SessionId> {
        self.pins.read().await.get(&self.key(operator)).cloned()
    }

    /// Fill `target_session` from the pin when the caller gave none.
    ///
    /// An explicit session always wins; `continue_latest` suppresses the pin.
    pub async fn apply_pin(&self, mut request: ExecutionRequest) -> ExecutionRequest {
        if request.target_session.is_none() && !request.continue_latest {
            request.target_session = self.pinned(&request.operator).await;
        }
        request
    }

    fn key(&self, operator: &OperatorId) -> String {
        match self.scope {
            PinScope::Operator => operator.as_str().to_string(),
            PinScope::Global => GLOBAL_KEY.to_string(),
        }
    }

    async fn persist(&self, pins: &BTreeMap<String, SessionId>) {
        let Some(path) = &self.store else {
            return;
        };
        if let Err(e) = write_pins(path, pins).await {
            warn!(path = %path.display(), error = %e, "Failed to persist session pins");
        }
    }
}

fn load_pins(path: &Path) -> BTreeMap<String, SessionId> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(k, v)| SessionId::parse(&v).map(|id| (k, id)))
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt session bindings file");
            BTreeMap::new()
        }
    }
}

async fn write_pins(path: &Path, pins: &BTreeMap<String, SessionId>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(pins).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}
