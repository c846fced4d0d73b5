//! Fatal pass errors
//!
//! Everything else (one file, one folder) is recovered locally and counted.

use std::path::PathBuf;

/// Conditions that abort a sync pass
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote store unreachable: {0}")]
    StoreUnreachable(String),
    #[error("Cannot write sync state to {path}")]
    StateUnwritable { path: PathBuf },
}
