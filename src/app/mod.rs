//! Application wiring
//!
//! - `config`: raw configuration structures
//! - `loader`: layered loading (embedded defaults, files, environment)
//! - `validation`: raw configuration to immutable runtime settings
//! - `logging`: tracing subscriber setup
//! - `init`: engine construction

pub mod config;
mod init;
mod loader;
mod logging;
pub mod validation;

pub use config::AppConfig;
pub use init::build_engine;
pub use loader::load_config;
pub use logging::init_tracing;
pub use validation::Settings;
