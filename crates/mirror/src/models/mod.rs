//! Domain models for mirrored drive content

mod document;
mod folder;
mod sync_marker;
pub mod timestamp;

pub use document::{
    Database, DatabaseMetadata, Document, DocumentId, NO_URL, compute_checksum,
};
pub use folder::FolderNode;
pub use sync_marker::SyncMarker;
