//! Google Drive integration
//!
//! This module provides:
//! - The [`RemoteStore`] seam the sync engine talks to
//! - OAuth2 authentication and a Drive v3 HTTP client
//! - An in-memory remote store for tests and offline runs
//! - Parsing of user-supplied Drive URLs into sync targets

mod auth;
mod client;
mod memory;
mod target;

pub use auth::DriveAuth;
pub use client::{DriveClient, DriveError};
pub use memory::InMemoryDrive;
pub use target::{PERSONAL_ROOT, SyncTarget, WHOLE_STORE_NAME, parse_store_url, sanitize_name};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// MIME types the remote store reports and the engine cares about
pub mod mime {
    pub const FOLDER: &str = "application/vnd.google-apps.folder";
    pub const GOOGLE_DOC: &str = "application/vnd.google-apps.document";
    pub const GOOGLE_SHEET: &str = "application/vnd.google-apps.spreadsheet";
    pub const DOCX: &str =
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
    pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const XLS: &str = "application/vnd.ms-excel";
    pub const PDF: &str = "application/pdf";
    pub const CSV: &str = "text/csv";
    pub const CSV_ALT: &str = "application/csv";
    pub const TEXT: &str = "text/plain";
    pub const MARKDOWN: &str = "text/markdown";

    /// File types listed and downloaded during a sync
    pub const SYNCED: &[&str] = &[GOOGLE_DOC, DOCX, PDF, GOOGLE_SHEET, XLSX, XLS, CSV, TEXT, MARKDOWN];

    /// Native Google formats have no bytes of their own and must be exported.
    ///
    /// Returns the export format for such types.
    pub fn export_format(mime_type: &str) -> Option<&'static str> {
        match mime_type {
            GOOGLE_DOC => Some(DOCX),
            GOOGLE_SHEET => Some(CSV),
            _ => None,
        }
    }
}

/// Remote store API response types
pub mod api {
    use serde::Deserialize;

    /// One page of a `files.list` response
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileList<T> {
        pub files: Option<Vec<T>>,
        pub next_page_token: Option<String>,
    }

    /// Just the name of a file, folder or shared drive
    #[derive(Debug, Deserialize)]
    pub struct NameOnly {
        pub name: String,
    }

    /// `about` response used to confirm the store is reachable
    #[derive(Debug, Deserialize)]
    pub struct About {
        pub user: Option<AboutUser>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AboutUser {
        pub display_name: Option<String>,
        pub email_address: Option<String>,
    }
}

/// A folder entry from a child-folder listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// A file entry from a listing, with the fields the engine consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    /// User-facing link, when the store provides one
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl RemoteFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == mime::FOLDER
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

impl<T> From<api::FileList<T>> for Page<T> {
    fn from(list: api::FileList<T>) -> Self {
        Self {
            items: list.files.unwrap_or_default(),
            next_page_token: list.next_page_token,
        }
    }
}

/// Operations the sync engine needs from the remote document store.
///
/// Every call may be slow and may fail transiently; callers pace them through
/// a [`crate::sync::RateLimiter`].
pub trait RemoteStore: Send + Sync {
    /// Cheap call confirming the store is reachable with valid credentials
    fn probe(&self) -> Result<()>;

    /// List the immediate child folders of a folder
    fn list_child_folders(&self, folder_id: &str, page_token: Option<&str>)
    -> Result<Page<RemoteFolder>>;

    /// List files of synced types.
    ///
    /// `parent: None` lists every such file the user can access.
    fn list_files(&self, parent: Option<&str>, page_token: Option<&str>) -> Result<Page<RemoteFile>>;

    /// Fetch metadata for a single file or folder
    fn get_file(&self, file_id: &str) -> Result<RemoteFile>;

    /// Start downloading (or exporting) a file's content.
    ///
    /// Only opening the request should be paced; the returned reader is
    /// drained outside the rate limiter.
    fn open_download(&self, file: &RemoteFile) -> Result<Box<dyn Read + Send>>;

    /// Human-readable name of a folder, file or shared drive
    fn display_name(&self, id: &str) -> Result<String>;
}
