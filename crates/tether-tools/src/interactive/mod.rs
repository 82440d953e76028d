//! Interactive session management
//!
//! One long-lived terminal session, driven through a multiplexer:
//! - `manager`: state machine and exclusive-access discipline
//! - `multiplexer`: control interface the manager talks to
//! - `tmux`: the tmux implementation of that interface

mod config;
mod manager;
mod multiplexer;
mod state;
mod tmux;

#[cfg(test)]
mod tests;

pub use config::InteractiveConfig;
pub use manager::{InteractiveSessionManager, SessionReply};
pub use multiplexer::{BackingSpec, Multiplexer};
pub use state::SessionState;
pub use tmux::TmuxMultiplexer;
