//! Delta detection between the remote listing and the local database

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::drive::RemoteFile;
use crate::models::{Database, Document, DocumentId, SyncMarker, compute_checksum};

/// How a listed file relates to the local database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not in the database yet
    New,
    /// Known, but modified after the marker
    Modified,
    /// Known and not modified since the marker
    Unchanged,
}

impl Classification {
    pub fn needs_sync(self) -> bool {
        !matches!(self, Classification::Unchanged)
    }
}

pub fn classify(stored: Option<&Document>, remote: &RemoteFile, marker: SyncMarker) -> Classification {
    match stored {
        None => Classification::New,
        Some(_) if marker.is_before(remote.modified_time) => Classification::Modified,
        Some(_) => Classification::Unchanged,
    }
}

/// What applying freshly extracted content did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    Inserted,
    Replaced,
    /// Same checksum; only `last_synced` moved
    Touched,
}

/// Store extracted content for `remote`.
///
/// Content and checksum are only rewritten when the digest differs.
pub fn apply_content(
    db: &mut Database,
    remote: &RemoteFile,
    content: String,
    now: DateTime<Utc>,
) -> ContentChange {
    let id = DocumentId::new(&remote.id);
    let checksum = compute_checksum(&content);

    match db.get_mut(&id) {
        Some(doc) if doc.checksum() == checksum => {
            doc.last_synced = now;
            return ContentChange::Touched;
        }
        Some(_) => {}
        None => {
            db.upsert(Document::from_remote(remote, content, now));
            return ContentChange::Inserted;
        }
    }

    db.upsert(Document::from_remote(remote, content, now));
    ContentChange::Replaced
}

/// Tombstone every active document not in `seen`.
///
/// Only valid after a complete, unscoped pass. Returns the ids tombstoned.
pub fn reconcile_deletions(
    db: &mut Database,
    seen: &HashSet<DocumentId>,
    now: DateTime<Utc>,
) -> Vec<DocumentId> {
    let missing: Vec<DocumentId> = db
        .active_documents()
        .filter(|doc| !seen.contains(&doc.id))
        .map(|doc| doc.id.clone())
        .collect();

    for id in &missing {
        db.tombstone(id, now);
    }
    missing
}
