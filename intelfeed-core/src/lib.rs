//! intelfeed core - domain model and pure extractors
//!
//! This crate provides the building blocks every other layer shares:
//! - Entries, articles and the per-entry state machine
//! - URL canonicalization and content hashing
//! - The keyword rule table
//! - CVE and indicator extraction
//! - Incident identity keys

pub mod article;
pub mod canonical;
pub mod cve;
pub mod identity;
pub mod indicators;
pub mod rules;

pub use article::*;
pub use canonical::*;
pub use cve::*;
pub use identity::*;
pub use indicators::*;
pub use rules::*;

/// Minimum extracted article length in characters
pub const MIN_ARTICLE_CHARS: usize = 800;

/// Default maximum extracted article length in characters
pub const MAX_ARTICLE_CHARS: usize = 20_000;

/// Default summary excerpt length in characters
pub const SUMMARY_CHARS: usize = 2_000;

/// Default cap on nested links per article
pub const MAX_NESTED_LINKS: usize = 5;
