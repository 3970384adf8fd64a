//! Site adapters and run modes for onionpipe
//!
//! - [`feed`]: JSON listing endpoints behind a token-guarded session
//! - [`board`]: single-page HTML board with mirror fallback
//! - [`bulk`]: list of detail pages, one description each

pub mod board;
pub mod bulk;
pub mod feed;
pub mod filter;
pub mod run;

pub use board::{BoardExtractor, BoardOptions};
pub use bulk::{BulkOptions, ItemBoxExtractor, read_urls};
pub use feed::{FeedExtractor, FeedKind, FeedOptions};
pub use filter::{DateFilter, UndatedPolicy};
pub use run::{RunEnv, RunOutcome, RunStatus, default_output, scraped_at};
