//! In-memory remote store
//!
//! Holds a folder graph and file contents so complete passes can run without
//! network access. Folder links are arbitrary edges, so cycles are allowed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{DriveError, Page, RemoteFile, RemoteFolder, RemoteStore, mime};

#[derive(Debug, Clone)]
struct FolderEntry {
    name: String,
    children: Vec<String>,
}

#[derive(Debug, Clone)]
struct FileEntry {
    file: RemoteFile,
    parents: Vec<String>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, FolderEntry>,
    files: BTreeMap<String, FileEntry>,
    shared_drives: HashMap<String, String>,
    failing_listings: HashSet<String>,
    failing_downloads: HashSet<String>,
    listings: HashMap<String, usize>,
}

/// Deterministic [`RemoteStore`] backed by maps
pub struct InMemoryDrive {
    state: RwLock<State>,
    page_size: usize,
    unreachable: AtomicBool,
    downloads: AtomicUsize,
}

impl Default for InMemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDrive {
    pub fn new() -> Self {
        Self::with_page_size(50)
    }

    /// Small page sizes exercise pagination in callers
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            page_size: page_size.max(1),
            unreachable: AtomicBool::new(false),
            downloads: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a folder, optionally linked under `parent`
    pub fn add_folder(&self, parent: Option<&str>, id: &str, name: &str) {
        let mut state = self.write();
        state.folders.entry(id.to_string()).or_insert_with(|| FolderEntry {
            name: name.to_string(),
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            Self::link(&mut state, parent, id);
        }
    }

    /// Add an extra parent edge, which may close a cycle
    pub fn link_folder(&self, parent: &str, child: &str) {
        Self::link(&mut self.write(), parent, child);
    }

    fn link(state: &mut State, parent: &str, child: &str) {
        let entry = state
            .folders
            .entry(parent.to_string())
            .or_insert_with(|| FolderEntry {
                name: parent.to_string(),
                children: Vec::new(),
            });
        if !entry.children.iter().any(|c| c == child) {
            entry.children.push(child.to_string());
        }
    }

    /// Add or replace a file under `parent`
    pub fn add_file(
        &self,
        parent: &str,
        id: &str,
        name: &str,
        mime_type: &str,
        modified: DateTime<Utc>,
        content: impl Into<Vec<u8>>,
    ) {
        let file = RemoteFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            modified_time: modified,
            created_time: modified,
            web_view_link: Some(format!("https://drive.google.com/file/d/{}/view", id)),
        };
        self.write().files.insert(
            id.to_string(),
            FileEntry {
                file,
                parents: vec![parent.to_string()],
                content: content.into(),
            },
        );
    }

    /// Change a file's content and modification time in place
    pub fn edit_file(&self, id: &str, modified: DateTime<Utc>, content: impl Into<Vec<u8>>) {
        if let Some(entry) = self.write().files.get_mut(id) {
            entry.file.modified_time = modified;
            entry.content = content.into();
        }
    }

    /// Bump a file's modification time without touching its content
    pub fn touch_file(&self, id: &str, modified: DateTime<Utc>) {
        if let Some(entry) = self.write().files.get_mut(id) {
            entry.file.modified_time = modified;
        }
    }

    pub fn remove_file(&self, id: &str) {
        self.write().files.remove(id);
    }

    pub fn add_shared_drive(&self, id: &str, name: &str) {
        let mut state = self.write();
        state.shared_drives.insert(id.to_string(), name.to_string());
        state.folders.entry(id.to_string()).or_insert_with(|| FolderEntry {
            name: name.to_string(),
            children: Vec::new(),
        });
    }

    /// Make every listing of `folder_id` fail
    pub fn fail_listing(&self, folder_id: &str) {
        self.write().failing_listings.insert(folder_id.to_string());
    }

    /// Make every download of `file_id` fail
    pub fn fail_download(&self, file_id: &str) {
        self.write().failing_downloads.insert(file_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.write();
        state.failing_listings.clear();
        state.failing_downloads.clear();
    }

    /// Make `probe` fail, as if credentials or network were gone
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of child-folder listings (first pages only) made for a folder
    pub fn listing_count(&self, folder_id: &str) -> usize {
        self.read().listings.get(folder_id).copied().unwrap_or(0)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

fn paginate<T: Clone>(items: &[T], page_token: Option<&str>, page_size: usize) -> Result<Page<T>> {
    let start = match page_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| anyhow::anyhow!("Invalid page token: {}", token))?,
        None => 0,
    };
    let end = (start + page_size).min(items.len());
    let page = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();

    Ok(Page {
        items: page,
        next_page_token: (end < items.len()).then(|| end.to_string()),
    })
}

fn is_synced(file: &RemoteFile) -> bool {
    mime::SYNCED.contains(&file.mime_type.as_str()) && !file.name.contains(".docm")
}

impl RemoteStore for InMemoryDrive {
    fn probe(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("Remote store unreachable");
        }
        Ok(())
    }

    fn list_child_folders(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteFolder>> {
        let mut state = self.write();
        if page_token.is_none() {
            *state.listings.entry(folder_id.to_string()).or_default() += 1;
        }
        if state.failing_listings.contains(folder_id) {
            anyhow::bail!("Listing of folder {} failed", folder_id);
        }

        let children: Vec<RemoteFolder> = state
            .folders
            .get(folder_id)
            .map(|folder| {
                folder
                    .children
                    .iter()
                    .filter_map(|id| {
                        state.folders.get(id).map(|child| RemoteFolder {
                            id: id.clone(),
                            name: child.name.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        paginate(&children, page_token, self.page_size)
    }

    fn list_files(&self, parent: Option<&str>, page_token: Option<&str>) -> Result<Page<RemoteFile>> {
        let state = self.read();
        if let Some(parent) = parent
            && state.failing_listings.contains(parent)
        {
            anyhow::bail!("Listing of files in {} failed", parent);
        }

        let files: Vec<RemoteFile> = state
            .files
            .values()
            .filter(|entry| parent.is_none_or(|p| entry.parents.iter().any(|q| q == p)))
            .map(|entry| entry.file.clone())
            .filter(is_synced)
            .collect();

        paginate(&files, page_token, self.page_size)
    }

    fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        let state = self.read();
        if let Some(entry) = state.files.get(file_id) {
            return Ok(entry.file.clone());
        }
        if let Some(folder) = state.folders.get(file_id) {
            return Ok(RemoteFile {
                id: file_id.to_string(),
                name: folder.name.clone(),
                mime_type: mime::FOLDER.to_string(),
                modified_time: DateTime::<Utc>::UNIX_EPOCH,
                created_time: DateTime::<Utc>::UNIX_EPOCH,
                web_view_link: None,
            });
        }
        Err(DriveError::NotFound(format!("file {}", file_id)).into())
    }

    fn open_download(&self, file: &RemoteFile) -> Result<Box<dyn Read + Send>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let state = self.read();
        if state.failing_downloads.contains(&file.id) {
            anyhow::bail!("Download of {} failed", file.name);
        }
        let entry = state
            .files
            .get(&file.id)
            .ok_or_else(|| DriveError::NotFound(format!("file {}", file.id)))?;
        Ok(Box::new(Cursor::new(entry.content.clone())))
    }

    fn display_name(&self, id: &str) -> Result<String> {
        let state = self.read();
        if let Some(name) = state.shared_drives.get(id) {
            return Ok(format!("Shared Drive - {}", name));
        }
        if let Some(folder) = state.folders.get(id) {
            return Ok(folder.name.clone());
        }
        if let Some(entry) = state.files.get(id) {
            return Ok(entry.file.name.clone());
        }
        Err(DriveError::NotFound(format!("folder {}", id)).into())
    }
}
