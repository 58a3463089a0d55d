//! intelfeed runtime
//!
//! Turns configuration into collection runs:
//! - **Config**: the TOML configuration tree
//! - **Session**: per-run state shared by every component
//! - **Store**: incident-level dedup with atomic admission
//! - **Sink**: accepted article output
//! - **Pipeline**: the run orchestrator

pub mod config;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod store;

pub use config::*;
pub use pipeline::*;
pub use session::*;
pub use sink::*;
pub use store::*;
