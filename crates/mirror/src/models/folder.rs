//! Folder nodes produced by the crawler

use serde::{Deserialize, Serialize};

/// A folder discovered while walking the remote tree.
///
/// Transient: produced by the crawler and handed to the scheduler, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    /// Slash-joined chain of ancestor names below the crawl root, for diagnostics only
    pub path: String,
}

impl FolderNode {
    /// Create the node for a crawl root
    pub fn root(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            path: String::new(),
            id,
        }
    }

    /// Create the node for a crawl root with a display name
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::root(id)
        }
    }

    /// Create a child of this node
    pub fn child(&self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = if self.path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            id: id.into(),
            name,
            path,
        }
    }
}
