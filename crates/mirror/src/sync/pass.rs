//! One complete sync pass over a target
//!
//! Resolves the target, discovers folders, syncs changed files, reconciles
//! deletions, then persists the database, writes the merged artifacts and
//! finally advances the marker. The marker only moves after a pass with no
//! interruption and no failed file or folder.

use anyhow::Result;
use chrono::{Local, Utc};
use std::path::PathBuf;
use std::time::Instant;

use super::{
    FolderCrawler, Listing, RateLimiter, ShutdownFlag, SyncRun, SyncScheduler, SyncStats,
    reconcile_deletions,
};
use crate::config::SyncSettings;
use crate::drive::{RemoteStore, SyncTarget, WHOLE_STORE_NAME, sanitize_name};
use crate::error::SyncError;
use crate::extract::{ContentExtractor, ExtractorRegistry};
use crate::merge::{MergeReport, MergeWriter, RunHeader};
use crate::models::{FolderNode, SyncMarker};
use crate::storage::PersistenceStore;

/// Outcome of a pass that reached the persistence step
#[derive(Debug, Clone)]
pub struct PassReport {
    pub stats: SyncStats,
    pub merge: MergeReport,
    /// Shutdown was requested; the marker was left where it was
    pub interrupted: bool,
    /// Marker in effect after the pass
    pub marker: SyncMarker,
    pub output_dir: PathBuf,
    pub target_name: String,
}

/// Run a pass with the default extractors
pub fn run_pass(
    store: &dyn RemoteStore,
    target: &SyncTarget,
    settings: &SyncSettings,
    shutdown: &ShutdownFlag,
) -> Result<PassReport> {
    run_pass_with(store, &ExtractorRegistry::default(), target, settings, shutdown)
}

/// Run a pass.
///
/// Fatal conditions surface as [`SyncError`] inside the returned error.
/// Everything else is counted in the stats and logged.
pub fn run_pass_with(
    store: &dyn RemoteStore,
    extractor: &dyn ContentExtractor,
    target: &SyncTarget,
    settings: &SyncSettings,
    shutdown: &ShutdownFlag,
) -> Result<PassReport> {
    let start = Instant::now();
    let started_at = Utc::now();

    store
        .probe()
        .map_err(|e| SyncError::StoreUnreachable(format!("{:#}", e)))?;

    // A file target needs its metadata anyway, so fetch it once
    let target_file = match target {
        SyncTarget::File(id) => Some(store.get_file(id).map_err(|e| {
            SyncError::StoreUnreachable(format!("cannot read file {}: {:#}", id, e))
        })?),
        _ => None,
    };

    let display_name = match (target, &target_file) {
        (SyncTarget::WholeStore, _) => WHOLE_STORE_NAME.to_string(),
        (_, Some(file)) => file.name.clone(),
        (_, None) => {
            let id = target.root_id().unwrap_or_default();
            store.display_name(id).unwrap_or_else(|e| {
                log::warn!("Could not resolve a name for {}, using its id: {:#}", id, e);
                id.to_string()
            })
        }
    };
    let target_name = sanitize_name(&display_name);
    let output_dir = settings.output_root.join(&target_name);
    log::info!("Syncing {} into {}", target, output_dir.display());

    let persistence = PersistenceStore::new(&output_dir).map_err(|e| {
        log::error!("{:#}", e);
        SyncError::StateUnwritable {
            path: output_dir.clone(),
        }
    })?;
    let marker = persistence.load_marker()?;
    let db = persistence.load_database()?;
    if marker.is_epoch() {
        log::info!("No previous sync recorded, every file will be fetched");
    } else {
        log::info!("Fetching files modified after {}", marker);
    }

    let limiter = RateLimiter::new(settings.throttle.clone());
    let crawl = |root: FolderNode| {
        FolderCrawler::new(store, &limiter, settings, shutdown)
            .crawl(root)
            .map_err(|e| SyncError::StoreUnreachable(format!("{:#}", e)))
    };

    let mut folder_errors = 0;
    let listing = match (target, target_file) {
        (SyncTarget::WholeStore, _) => Listing::Everything,
        (_, Some(file)) if file.is_folder() => {
            log::info!("{} is a folder, crawling it", file.name);
            let report = crawl(FolderNode::named(&file.id, &file.name))?;
            folder_errors = report.errors;
            Listing::Folders(report.folders)
        }
        (_, Some(file)) => Listing::Single(file),
        (_, None) => {
            let id = target.root_id().unwrap_or_default();
            let report = crawl(FolderNode::named(id, &display_name))?;
            folder_errors = report.errors;
            Listing::Folders(report.folders)
        }
    };

    let run = SyncRun::new(db);
    let outcome = SyncScheduler::new(store, &limiter, extractor, settings, shutdown)
        .run(listing, &run, marker);
    let (mut db, mut stats, seen) = run.into_parts();
    log::debug!(
        "{} remote calls, {} failed, final delay {:?}",
        limiter.call_count(),
        limiter.error_count(),
        limiter.current_delay()
    );
    stats.folder_errors += folder_errors;

    let interrupted = outcome.interrupted || shutdown.is_set();
    if target.is_scoped() {
        log::debug!("Scoped pass, skipping deletion detection");
    } else if interrupted || outcome.listing_failed {
        log::warn!("File listing incomplete, skipping deletion detection");
    } else {
        let deleted = reconcile_deletions(&mut db, &seen, Utc::now());
        for id in &deleted {
            log::info!("Marked {} as deleted", id);
        }
        stats.files_deleted = deleted.len();
    }

    db.refresh_metadata(Utc::now());
    let unwritable = |e: anyhow::Error, path: PathBuf| {
        log::error!("{:#}", e);
        SyncError::StateUnwritable { path }
    };
    persistence
        .save_database(&db)
        .map_err(|e| unwritable(e, persistence.database_path()))?;

    stats.duration_ms = start.elapsed().as_millis() as u64;
    let header = RunHeader {
        generated_at: Utc::now(),
        duration: start.elapsed(),
        total_documents: db.metadata.total_documents,
        active_documents: db.metadata.active_documents,
        files_updated: stats.files_updated,
        files_deleted: stats.files_deleted,
    };
    let merge = MergeWriter::new(&output_dir, &target_name, settings.merge)
        .write(&db, &header.render())
        .map_err(|e| unwritable(e, output_dir.clone()))?;

    let failures = stats.files_errored + stats.folder_errors;
    let marker = if interrupted {
        log::warn!("Sync interrupted, keeping marker at {}", marker);
        marker
    } else if failures > 0 {
        log::warn!(
            "{} items failed, keeping marker at {} so they are retried",
            failures,
            marker
        );
        marker
    } else {
        let next = SyncMarker::at(started_at);
        persistence
            .save_marker(next)
            .map_err(|e| unwritable(e, persistence.marker_path()))?;
        next
    };

    log::info!(
        "Sync of {} finished at {}: {} updated, {} deleted, {} errors",
        target_name,
        Local::now().format("%H:%M:%S"),
        stats.files_updated,
        stats.files_deleted,
        stats.files_errored
    );

    Ok(PassReport {
        stats,
        merge,
        interrupted,
        marker,
        output_dir,
        target_name,
    })
}
