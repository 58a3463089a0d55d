//! intelfeed sources
//!
//! Everything between a configured source and a fetched article:
//! - **Adapters**: syndicated feeds, Reddit listings, Telegram channel previews
//! - **Filter**: keyword relevance policies and the post-fetch content gate
//! - **Extractor**: indicator harvesting with a cancellable nested-link fallback

pub mod extractor;
pub mod feed;
pub mod filter;
pub mod reddit;
pub mod telegram;
pub mod traits;

pub use extractor::*;
pub use feed::*;
pub use filter::*;
pub use reddit::*;
pub use telegram::*;
pub use traits::*;
