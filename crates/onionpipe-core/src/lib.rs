//! onionpipe core - resilient fetch pipeline for onion listing sites
//!
//! Tor transport and identity control, explicit sessions with anti-forgery
//! tokens, bounded retries, consecutive-empty pagination, incremental
//! checkpoints, and the final deduplicated table.

pub mod checkpoint;
pub mod control;
pub mod error;
pub mod logging;
pub mod pacing;
pub mod pager;
pub mod progress;
pub mod record;
pub mod retry;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

// Re-exports for convenience
pub use checkpoint::{CheckpointWriter, RunBuffer};
pub use control::{ControlError, TorControl};
pub use error::{Failure, FailureKind, FetchError, SessionError, TransportKind};
pub use logging::{IndicatifLogger, init_logging};
pub use pacing::{Clock, ManualClock, Pacing, SharedClock, SystemClock};
pub use pager::{
    DrainSummary, PageEvent, PageLimits, PageOutcome, PageQuery, PageResult, Pager, StopReason,
    Target, numbered,
};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use record::{Extract, ExtractError, Record, RecordLayout};
pub use retry::{Fetched, RetryController, RetryPolicy};
pub use session::{HeaderProfile, Session, SessionManager, TokenSpec};
pub use shutdown::{StopFlag, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use sink::{OutputFormat, SinkReport, checkpoint_path_for, is_valid_parquet, persist};
pub use summary::RunSummary;
pub use transport::{
    FetchRequest, FetchResponse, SHARED_RUNTIME, TorConfig, TorExit, TorTransport, Transport,
    probe_exit,
};
