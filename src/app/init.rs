//! Engine construction
//!
//! Wires validated settings into the backends and the engine.

use super::validation::Settings;
use anyhow::{Context, Result};
use std::sync::Arc;
use tether_core::{AuditLog, Engine};
use tether_tools::{
    InteractiveSessionManager, OneShotExecutor, SessionRegistry, TmuxMultiplexer,
    ToolHistorySource,
};
use tracing::info;

/// Build the engine and record the startup audit event.
pub async fn build_engine(settings: Settings) -> Result<Engine> {
    let root = settings.policy.confinement_root().to_path_buf();
    info!(
        workspace = %root.display(),
        operators = settings.policy.operator_count(),
        "Policy loaded"
    );

    let audit = AuditLog::open(&settings.audit_dir)
        .await
        .context("Failed to open audit log")?;

    let source = match settings.tool_home {
        Some(home) => ToolHistorySource::new(home),
        None => ToolHistorySource::from_home().context("Cannot locate the home directory")?,
    };
    info!(
        history = %source.root().display(),
        scope = ?settings.pin_scope,
        "Session registry ready"
    );
    let registry = SessionRegistry::new(Arc::new(source), settings.pin_scope)
        .with_store(&settings.bindings_path);

    let mux = TmuxMultiplexer::with_binary(settings.tmux_binary);
    let interactive =
        InteractiveSessionManager::new(settings.interactive, &root, Arc::new(mux));

    let executor = OneShotExecutor::new(settings.exec, &root);

    let engine = Engine::new(
        Arc::new(settings.policy),
        executor,
        Arc::new(registry),
        Arc::new(interactive),
        Arc::new(audit),
    );
    engine.record_startup().await;
    Ok(engine)
}
