//! Flat-file persistence of the document database and sync marker

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{Database, SyncMarker};

pub const DATA_DIR: &str = ".data";
pub const DATABASE_FILE: &str = "document_database.json";
pub const MARKER_FILE: &str = "last_sync.txt";

/// Loads and saves per-target state
///
/// Directory structure:
/// ```text
/// <output dir>/
///   .data/
///     document_database.json   # documents keyed by id, plus metadata
///     last_sync.txt            # watermark of the last completed pass
///   2024-05-01_Team_part1.md
/// ```
pub struct PersistenceStore {
    data_dir: PathBuf,
}

impl PersistenceStore {
    /// Open (creating if needed) the state directory under `output_dir`
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = output_dir.as_ref().join(DATA_DIR);
        fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory {}", data_dir.display())
        })?;
        hide_directory(&data_dir);
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(MARKER_FILE)
    }

    /// Load the database, or an empty one on first run
    pub fn load_database(&self) -> Result<Database> {
        let path = self.database_path();
        if !path.exists() {
            log::info!("No existing database at {}, starting fresh", path.display());
            return Ok(Database::new());
        }

        let mut db: Database = config::load_json_file(&path)?;
        db.normalize_ids();
        log::info!(
            "Loaded {} documents ({} active)",
            db.len(),
            db.active_documents().count()
        );
        Ok(db)
    }

    /// Atomically replace the database file
    pub fn save_database(&self, db: &Database) -> Result<()> {
        let path = self.database_path();
        config::save_json_file(&path, db)
            .with_context(|| format!("Failed to save database to {}", path.display()))
    }

    /// Load the last-sync marker, epoch when there is none
    pub fn load_marker(&self) -> Result<SyncMarker> {
        let path = self.marker_path();
        if !path.exists() {
            return Ok(SyncMarker::epoch());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(SyncMarker::parse_or_epoch(&raw))
    }

    pub fn save_marker(&self, marker: SyncMarker) -> Result<()> {
        let path = self.marker_path();
        config::write_atomic(&path, marker.to_string().as_bytes())
            .with_context(|| format!("Failed to save sync marker to {}", path.display()))
    }
}

#[cfg(windows)]
fn hide_directory(path: &Path) {
    let status = std::process::Command::new("attrib")
        .arg("+H")
        .arg(path)
        .status();
    if let Err(e) = status {
        log::debug!("Could not hide {}: {}", path.display(), e);
    }
}

#[cfg(not(windows))]
fn hide_directory(_path: &Path) {}
