//! Document model and the document database

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::timestamp::{lenient, lenient_option};
use crate::drive::RemoteFile;

/// Placeholder stored when the remote entry has no user-facing link
pub const NO_URL: &str = "N/A";

/// Unique identifier for a document (the remote file ID)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the 128-bit content digest stored alongside a document's text
pub fn compute_checksum(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

fn default_url() -> String {
    NO_URL.to_string()
}

/// A mirrored remote document and its extracted text.
///
/// `content` and `checksum` are private so they can only change together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Remote file ID (filled from the database key on load)
    #[serde(default)]
    pub id: DocumentId,
    pub name: String,
    pub mime_type: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(with = "lenient")]
    pub modified_time: DateTime<Utc>,
    #[serde(with = "lenient")]
    pub created_time: DateTime<Utc>,
    #[serde(with = "lenient")]
    pub last_synced: DateTime<Utc>,
    checksum: String,
    content: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, with = "lenient_option", skip_serializing_if = "Option::is_none")]
    pub deleted_time: Option<DateTime<Utc>>,
}

impl Document {
    /// Build a document from a remote listing entry and its extracted text
    pub fn from_remote(remote: &RemoteFile, content: String, synced_at: DateTime<Utc>) -> Self {
        Self {
            id: DocumentId::new(&remote.id),
            name: remote.name.clone(),
            mime_type: remote.mime_type.clone(),
            url: remote.web_view_link.clone().unwrap_or_else(default_url),
            modified_time: remote.modified_time,
            created_time: remote.created_time,
            last_synced: synced_at,
            checksum: compute_checksum(&content),
            content,
            deleted: false,
            deleted_time: None,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Mark the document deleted, keeping its content for reference
    pub fn tombstone(&mut self, at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_time = Some(at);
    }

    /// Clear a tombstone. Returns true if the document was deleted.
    pub fn revive(&mut self) -> bool {
        let was_deleted = self.deleted;
        self.deleted = false;
        self.deleted_time = None;
        was_deleted
    }
}

/// Summary counters persisted next to the documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    #[serde(default, with = "lenient_option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_documents: usize,
    #[serde(default)]
    pub active_documents: usize,
}

/// The local content database: every document ever mirrored, keyed by ID.
///
/// Documents are never removed, only tombstoned. Keys are ordered so that
/// iteration (and therefore merged output) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub documents: BTreeMap<DocumentId, Document>,
    #[serde(default)]
    pub metadata: DatabaseMetadata,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn get_mut(&mut self, id: &DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(id)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    /// Insert or overwrite a document
    pub fn upsert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Tombstone a document. Returns false if it was unknown or already deleted.
    pub fn tombstone(&mut self, id: &DocumentId, at: DateTime<Utc>) -> bool {
        match self.documents.get_mut(id) {
            Some(doc) if doc.is_active() => {
                doc.tombstone(at);
                true
            }
            _ => false,
        }
    }

    /// Iterate non-deleted documents in key order
    pub fn active_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values().filter(|doc| doc.is_active())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Recompute the summary counters
    pub fn refresh_metadata(&mut self, now: DateTime<Utc>) {
        self.metadata.last_updated = Some(now);
        self.metadata.total_documents = self.documents.len();
        self.metadata.active_documents = self.active_documents().count();
    }

    /// Restore the `id` field of each document from its key.
    ///
    /// Databases written by older versions only carry the ID as the map key.
    pub fn normalize_ids(&mut self) {
        for (id, doc) in self.documents.iter_mut() {
            if doc.id != *id {
                doc.id = id.clone();
            }
        }
    }
}
