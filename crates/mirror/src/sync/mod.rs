//! Sync engine for mirroring a remote store into local text artifacts
//!
//! A pass is safe to repeat: files unchanged since the last marker are
//! skipped and unchanged content leaves the database untouched.

mod crawler;
mod delta;
mod pass;
mod queue;
mod rate_limiter;
mod scheduler;
mod shutdown;
mod stats;
pub mod timing;

pub use crawler::{CrawlReport, FolderCrawler};
pub use delta::{Classification, ContentChange, apply_content, classify, reconcile_deletions};
pub use pass::{PassReport, run_pass, run_pass_with};
pub use queue::{Claim, WorkQueue, wait_for_quiescence};
pub use rate_limiter::RateLimiter;
pub use scheduler::{Listing, RunState, ScheduleOutcome, SyncRun, SyncScheduler};
pub use shutdown::ShutdownFlag;
pub use stats::SyncStats;
