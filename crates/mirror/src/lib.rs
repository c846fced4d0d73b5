//! Mirror crate - incremental Drive mirroring into merged text artifacts
//!
//! This crate provides:
//! - Domain models (Document, Database, SyncMarker)
//! - Drive API client, OAuth authentication and an in-memory store
//! - Text extraction for documents, spreadsheets and plain text
//! - The concurrent sync engine (crawl, delta detection, deletions)
//! - Flat-file persistence and size-capped merged output
//!
//! It has no UI dependencies; the `drivemerge` binary is a thin shell over
//! [`run_pass`].

pub mod config;
pub mod drive;
pub mod error;
pub mod extract;
pub mod merge;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{DriveCredentials, MergeLimits, SyncSettings, ThrottleSettings, ThrottleStrategy};
pub use drive::{
    DriveAuth, DriveClient, DriveError, InMemoryDrive, RemoteFile, RemoteStore, SyncTarget,
    parse_store_url,
};
pub use error::SyncError;
pub use extract::{ContentExtractor, ExtractorRegistry};
pub use merge::{MergeReport, MergeWriter, PartInfo, RunHeader};
pub use models::{Database, Document, DocumentId, FolderNode, SyncMarker};
pub use storage::PersistenceStore;
pub use sync::{PassReport, ShutdownFlag, SyncStats, run_pass, run_pass_with};
