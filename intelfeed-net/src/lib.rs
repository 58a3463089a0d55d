//! intelfeed network layer
//!
//! Provides everything that touches the web for a single article:
//! - HTTP client with timeouts, user-agent rotation and optional proxy
//! - Per-host request spacing
//! - Readability-style main-content extraction
//! - Nested link extraction, ranking and classification

pub mod client;
pub mod content;
pub mod links;
pub mod ratelimit;

pub use client::*;
pub use content::*;
pub use links::*;
pub use ratelimit::*;
