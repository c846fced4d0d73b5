//! Per-folder file discovery and file downloads
//!
//! Folder workers list files and push sync candidates onto a bounded file
//! queue; file workers download, extract and apply them. Only the database
//! update happens under the run lock.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::io::Read;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::delta::{ContentChange, apply_content, classify};
use super::queue::{WorkQueue, wait_for_quiescence};
use super::{RateLimiter, ShutdownFlag, SyncStats};
use crate::config::SyncSettings;
use crate::drive::{DriveError, RemoteFile, RemoteStore};
use crate::extract::ContentExtractor;
use crate::models::{Database, DocumentId, FolderNode, SyncMarker};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Which files a pass looks at
#[derive(Debug, Clone)]
pub enum Listing {
    /// Files directly inside each of these folders
    Folders(Vec<FolderNode>),
    /// Every synced-type file in the store
    Everything,
    /// One file
    Single(RemoteFile),
}

/// Mutable state shared by all workers of one pass
pub struct RunState {
    pub db: Database,
    pub stats: SyncStats,
}

/// The database and counters of a pass behind one lock, plus the set of ids
/// observed in listings behind its own
pub struct SyncRun {
    state: Mutex<RunState>,
    seen: Mutex<HashSet<DocumentId>>,
}

impl SyncRun {
    pub fn new(db: Database) -> Self {
        Self {
            state: Mutex::new(RunState {
                db,
                stats: SyncStats::default(),
            }),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Run `f` with exclusive access to the database and counters
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Record an id as present remotely. Returns false if already seen.
    pub fn mark_seen(&self, id: DocumentId) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id)
    }

    pub fn into_parts(self) -> (Database, SyncStats, HashSet<DocumentId>) {
        let state = self.state.into_inner().unwrap_or_else(|e| e.into_inner());
        let seen = self.seen.into_inner().unwrap_or_else(|e| e.into_inner());
        (state.db, state.stats, seen)
    }
}

/// How the scheduling phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// At least one file listing failed, so the seen set is incomplete
    pub listing_failed: bool,
    pub interrupted: bool,
}

struct FolderTask {
    parent: Option<String>,
    label: String,
}

pub struct SyncScheduler<'a> {
    store: &'a dyn RemoteStore,
    limiter: &'a RateLimiter,
    extractor: &'a dyn ContentExtractor,
    settings: &'a SyncSettings,
    shutdown: &'a ShutdownFlag,
}

impl<'a> SyncScheduler<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        limiter: &'a RateLimiter,
        extractor: &'a dyn ContentExtractor,
        settings: &'a SyncSettings,
        shutdown: &'a ShutdownFlag,
    ) -> Self {
        Self {
            store,
            limiter,
            extractor,
            settings,
            shutdown,
        }
    }

    /// Sync every candidate file in `listing` into `run`
    pub fn run(&self, listing: Listing, run: &SyncRun, marker: SyncMarker) -> ScheduleOutcome {
        let poll = self.settings.poll_interval();
        let folders: WorkQueue<FolderTask> = WorkQueue::unbounded();
        let files: WorkQueue<RemoteFile> = WorkQueue::bounded(self.settings.file_queue_capacity);
        let listing_failed = AtomicBool::new(false);

        match listing {
            Listing::Folders(nodes) => {
                for node in nodes {
                    let label = if node.path.is_empty() { node.name } else { node.path };
                    folders.push(
                        FolderTask {
                            parent: Some(node.id),
                            label,
                        },
                        self.shutdown,
                        poll,
                    );
                }
            }
            Listing::Everything => {
                folders.push(
                    FolderTask {
                        parent: None,
                        label: "entire drive".to_string(),
                    },
                    self.shutdown,
                    poll,
                );
            }
            Listing::Single(file) => self.consider(file, run, marker, &files),
        }

        let (folder_workers, file_workers) = self.settings.worker_split();
        log::info!(
            "Syncing with {} folder workers and {} file workers",
            folder_workers,
            file_workers
        );
        let finished = ShutdownFlag::new();

        std::thread::scope(|s| {
            for _ in 0..folder_workers {
                s.spawn(|| self.folder_worker(&folders, &files, run, marker, &listing_failed, &finished));
            }
            for _ in 0..file_workers {
                s.spawn(|| self.file_worker(&files, run, &finished));
            }

            let mut last_report = Instant::now();
            wait_for_quiescence(
                self.settings.quiescence_checks,
                poll,
                self.shutdown,
                || {
                    if last_report.elapsed() >= PROGRESS_INTERVAL {
                        last_report = Instant::now();
                        let (updated, errored) =
                            run.with_state(|s| (s.stats.files_updated, s.stats.files_errored));
                        log::info!(
                            "Sync progress: {} folders queued, {} files queued, {} downloading, {} updated, {} errors, delay {:?}",
                            folders.len(),
                            files.len(),
                            files.in_flight(),
                            updated,
                            errored,
                            self.limiter.current_delay()
                        );
                    }
                },
                // Folder queue first: a finishing folder worker has already
                // pushed its files before its claim is released
                || folders.is_idle() && files.is_idle(),
            );
            finished.set();
        });

        ScheduleOutcome {
            listing_failed: listing_failed.into_inner(),
            interrupted: self.shutdown.is_set(),
        }
    }

    fn folder_worker(
        &self,
        folders: &WorkQueue<FolderTask>,
        files: &WorkQueue<RemoteFile>,
        run: &SyncRun,
        marker: SyncMarker,
        listing_failed: &AtomicBool,
        finished: &ShutdownFlag,
    ) {
        let poll = self.settings.poll_interval();
        while !finished.is_set() && !self.shutdown.is_set() {
            let Some(task) = folders.pop_timeout(poll) else {
                continue;
            };

            let listed = self.list_files(task.parent.as_deref(), |file| {
                self.consider(file, run, marker, files)
            });
            match listed {
                Ok(()) => run.with_state(|s| s.stats.folders_scanned += 1),
                Err(e) => {
                    listing_failed.store(true, Ordering::SeqCst);
                    run.with_state(|s| s.stats.folder_errors += 1);
                    log::warn!("Failed to list files in {}: {:#}", task.label, e);
                }
            }
        }
    }

    /// Walk every page of a file listing
    fn list_files(&self, parent: Option<&str>, mut each: impl FnMut(RemoteFile)) -> Result<()> {
        let mut page_token: Option<String> = None;
        loop {
            if self.shutdown.is_set() {
                return Ok(());
            }
            let page = self
                .limiter
                .execute(|| self.store.list_files(parent, page_token.as_deref()))?;
            for file in page.items {
                each(file);
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(()),
            }
        }
    }

    /// Record a listed file and queue it if it needs syncing
    fn consider(&self, file: RemoteFile, run: &SyncRun, marker: SyncMarker, files: &WorkQueue<RemoteFile>) {
        let id = DocumentId::new(&file.id);
        if !run.mark_seen(id.clone()) {
            return;
        }

        let needs_sync = run.with_state(|state| {
            if let Some(doc) = state.db.get_mut(&id)
                && doc.revive()
            {
                state.stats.files_restored += 1;
                log::info!("Restored previously deleted file {}", file.name);
            }

            let needs_sync = classify(state.db.get(&id), &file, marker).needs_sync();
            if needs_sync {
                state.stats.changes_processed += 1;
            } else {
                state.stats.files_skipped += 1;
            }
            needs_sync
        });

        if needs_sync && !files.push(file, self.shutdown, self.settings.poll_interval()) {
            log::debug!("Shutdown requested, dropping queued file {}", id);
        }
    }

    fn file_worker(&self, files: &WorkQueue<RemoteFile>, run: &SyncRun, finished: &ShutdownFlag) {
        let poll = self.settings.poll_interval();
        while !finished.is_set() && !self.shutdown.is_set() {
            if let Some(file) = files.pop_timeout(poll) {
                self.sync_file(&file, run);
            }
        }
    }

    fn sync_file(&self, file: &RemoteFile, run: &SyncRun) {
        let bytes = match self.download(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                run.with_state(|s| s.stats.files_errored += 1);
                log::warn!("Failed to sync {} ({}): {:#}", file.name, file.id, e);
                return;
            }
        };

        let content = self
            .extractor
            .extract(&bytes, &file.mime_type, file.web_view_link.as_deref());

        let change = run.with_state(|s| {
            s.stats.bytes_downloaded += bytes.len() as u64;
            let change = apply_content(&mut s.db, file, content, Utc::now());
            match change {
                ContentChange::Inserted | ContentChange::Replaced => s.stats.files_updated += 1,
                ContentChange::Touched => s.stats.files_unchanged += 1,
            }
            change
        });

        match change {
            ContentChange::Inserted => log::info!("Added {}", file.name),
            ContentChange::Replaced => log::info!("Updated {}", file.name),
            ContentChange::Touched => log::debug!("No content change in {}", file.name),
        }
    }

    /// Download a file's bytes, retrying transient failures.
    ///
    /// Only opening the request goes through the rate limiter.
    fn download(&self, file: &RemoteFile) -> Result<Vec<u8>> {
        let attempts = self.settings.download_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.shutdown.is_set() {
                break;
            }

            let result = self
                .limiter
                .execute(|| self.store.open_download(file))
                .and_then(|mut reader| {
                    let mut bytes = Vec::new();
                    match reader.read_to_end(&mut bytes) {
                        Ok(_) => Ok(bytes),
                        Err(e) => {
                            self.limiter.record_error();
                            Err(e).context("Failed to read download body")
                        }
                    }
                });

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) if matches!(e.downcast_ref::<DriveError>(), Some(DriveError::NotFound(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    log::debug!("Download attempt {}/{} for {} failed: {:#}", attempt, attempts, file.name, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Download of {} interrupted", file.name)))
    }
}
