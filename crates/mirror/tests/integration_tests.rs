//! Integration tests for the mirror crate
//!
//! These tests run complete passes against an in-memory drive and check the
//! database, the marker and the merged artifacts on disk.

use chrono::{DateTime, Duration, TimeZone, Utc};
use mirror::drive::mime;
use mirror::storage::PersistenceStore;
use mirror::{
    ContentExtractor, DocumentId, ExtractorRegistry, InMemoryDrive, MergeLimits, PassReport,
    ShutdownFlag, SyncError, SyncSettings, SyncTarget, ThrottleSettings, run_pass, run_pass_with,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 8, 30, 0).unwrap()
}

fn later() -> DateTime<Utc> {
    Utc::now() + Duration::hours(1)
}

/// Fast settings writing under `root`
fn settings(root: &Path) -> SyncSettings {
    SyncSettings {
        total_workers: 4,
        crawl_workers: 3,
        poll_interval_ms: 2,
        quiescence_checks: 3,
        file_queue_capacity: 4,
        download_retries: 1,
        throttle: ThrottleSettings::disabled(),
        output_root: root.to_path_buf(),
        ..SyncSettings::default()
    }
}

fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
}

fn pass(drive: &InMemoryDrive, target: &SyncTarget, settings: &SyncSettings) -> PassReport {
    run_pass(drive, target, settings, &ShutdownFlag::new()).unwrap()
}

fn read_parts(report: &PassReport) -> Vec<String> {
    report
        .merge
        .parts
        .iter()
        .map(|p| fs::read_to_string(&p.path).unwrap())
        .collect()
}

/// Everything after the run header
fn body(part: &str) -> &str {
    part.find("\n```START OF FILE").map_or("", |i| &part[i..])
}

/// A drive with a small folder tree
fn team_drive() -> InMemoryDrive {
    let drive = InMemoryDrive::with_page_size(2);
    drive.add_folder(None, "team", "Team");
    drive.add_folder(Some("team"), "reports", "Reports");
    drive.add_folder(Some("reports"), "q1", "Q1");
    drive.add_file("team", "a", "Plan.txt", mime::TEXT, at(1), "the plan");
    drive.add_file("reports", "b", "Numbers.csv", mime::CSV, at(2), "x,y\n1,2\n");
    drive.add_file("q1", "c", "Q1.md", mime::MARKDOWN, at(3), "# quarter one");
    drive
}

#[test]
fn test_first_pass_mirrors_folder_tree() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let report = pass(&drive, &SyncTarget::Folder("team".into()), &settings(dir.path()));

    assert_eq!(report.target_name, "Team");
    assert_eq!(report.output_dir, dir.path().join("Team"));
    assert!(!report.interrupted);
    assert_eq!(report.stats.files_updated, 3);
    assert_eq!(report.stats.folders_scanned, 3);
    assert_eq!(report.stats.files_errored, 0);

    let parts = read_parts(&report);
    assert_eq!(parts.len(), 1);
    assert!(parts[0].starts_with("Sync Completed - Generated on "));
    assert!(parts[0].contains("Total documents: 3\nActive documents: 3\nFiles updated in this sync: 3"));
    assert!(parts[0].contains("Title: Plan.txt\nURL: https://drive.google.com/file/d/a/view"));
    assert!(parts[0].contains("the plan"));
    assert!(parts[0].contains("# quarter one"));

    let store = PersistenceStore::new(&report.output_dir).unwrap();
    assert_eq!(store.load_database().unwrap().len(), 3);
    assert_eq!(store.load_marker().unwrap(), report.marker);
    assert!(!report.marker.is_epoch());
}

#[test]
fn test_merge_splits_at_word_cap() {
    let dir = TempDir::new().unwrap();
    let drive = InMemoryDrive::new();
    drive.add_folder(None, "docs", "Docs");
    drive.add_file("docs", "a", "A.txt", mime::TEXT, at(1), words(50));
    drive.add_file("docs", "b", "B.txt", mime::TEXT, at(1), words(3000));

    let mut settings = settings(dir.path());
    settings.merge = MergeLimits {
        max_bytes: 10 * 1024 * 1024,
        max_words: 2000,
    };
    let report = pass(&drive, &SyncTarget::Folder("docs".into()), &settings);

    assert_eq!(report.stats.files_updated, 2);
    assert_eq!(report.merge.parts.len(), 2);
    let parts = read_parts(&report);
    assert!(parts[0].contains("Active documents: 2"));
    assert!(parts[0].contains("Title: A.txt"));
    assert!(!parts[0].contains("Title: B.txt"));
    assert!(parts[1].starts_with("Sync Completed"));
    assert!(parts[1].contains("Title: B.txt"));
    assert!(report.merge.parts[0].words <= 2000);
    assert!(report.merge.parts[1].path.ends_with(format!(
        "{}_Docs_part2.md",
        chrono::Local::now().format("%Y-%m-%d")
    )));
}

#[test]
fn test_whole_store_output_name() {
    let dir = TempDir::new().unwrap();
    let report = pass(&team_drive(), &SyncTarget::WholeStore, &settings(dir.path()));

    assert_eq!(report.target_name, "personal_drive");
    assert_eq!(report.stats.files_updated, 3);
    assert!(dir.path().join("personal_drive").join(".data").is_dir());
}

#[test]
fn test_second_pass_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());

    let first = pass(&drive, &target, &settings);
    let first_db = PersistenceStore::new(&first.output_dir).unwrap().load_database().unwrap();
    let first_parts = read_parts(&first);

    let downloads = drive.download_count();
    let second = pass(&drive, &target, &settings);
    let second_db = PersistenceStore::new(&second.output_dir).unwrap().load_database().unwrap();

    assert_eq!(drive.download_count(), downloads);
    assert_eq!(second.stats.files_updated, 0);
    assert_eq!(second.stats.files_skipped, 3);
    assert_eq!(first_db.documents, second_db.documents);
    assert!(second.marker >= first.marker);

    let second_parts = read_parts(&second);
    assert_eq!(first_parts.len(), second_parts.len());
    for (a, b) in first_parts.iter().zip(&second_parts) {
        assert_eq!(body(a), body(b));
    }
}

#[test]
fn test_edited_and_touched_files() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());
    pass(&drive, &target, &settings);

    let edited_at = later();
    drive.edit_file("a", edited_at, "the new plan");
    drive.touch_file("b", edited_at);
    let report = pass(&drive, &target, &settings);

    assert_eq!(report.stats.changes_processed, 2);
    assert_eq!(report.stats.files_updated, 1);
    assert_eq!(report.stats.files_unchanged, 1);
    assert_eq!(report.stats.files_skipped, 1);

    let db = PersistenceStore::new(&report.output_dir).unwrap().load_database().unwrap();
    let a = db.get(&DocumentId::new("a")).unwrap();
    assert_eq!(a.content(), "the new plan");
    assert_eq!(a.modified_time.timestamp(), edited_at.timestamp());
    assert!(read_parts(&report)[0].contains("the new plan"));
}

#[test]
fn test_whole_store_pass_tombstones_and_restores() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let settings = settings(dir.path());
    pass(&drive, &SyncTarget::WholeStore, &settings);

    drive.remove_file("b");
    let report = pass(&drive, &SyncTarget::WholeStore, &settings);

    assert_eq!(report.stats.files_deleted, 1);
    let db = PersistenceStore::new(&report.output_dir).unwrap().load_database().unwrap();
    let b = db.get(&DocumentId::new("b")).unwrap();
    assert!(b.deleted);
    assert!(b.deleted_time.is_some());
    assert_eq!(db.metadata.total_documents, 3);
    assert_eq!(db.metadata.active_documents, 2);
    let parts = read_parts(&report);
    assert!(!parts[0].contains("Title: Numbers.csv"));
    assert!(parts[0].contains("Files deleted in this sync: 1"));

    // Reappears unchanged: no download, but active again
    drive.add_file("reports", "b", "Numbers.csv", mime::CSV, at(2), "x,y\n1,2\n");
    let downloads = drive.download_count();
    let report = pass(&drive, &SyncTarget::WholeStore, &settings);

    assert_eq!(report.stats.files_restored, 1);
    assert_eq!(report.stats.files_deleted, 0);
    assert_eq!(drive.download_count(), downloads);
    let db = PersistenceStore::new(&report.output_dir).unwrap().load_database().unwrap();
    assert!(db.get(&DocumentId::new("b")).unwrap().is_active());
    assert!(read_parts(&report)[0].contains("Title: Numbers.csv"));
}

#[test]
fn test_scoped_pass_never_tombstones() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());
    pass(&drive, &target, &settings);

    drive.remove_file("c");
    let report = pass(&drive, &target, &settings);

    assert_eq!(report.stats.files_deleted, 0);
    let db = PersistenceStore::new(&report.output_dir).unwrap().load_database().unwrap();
    assert!(db.get(&DocumentId::new("c")).unwrap().is_active());
}

#[test]
fn test_failed_subfolder_is_isolated() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.fail_listing("q1");

    let report = pass(&drive, &SyncTarget::Folder("team".into()), &settings(dir.path()));

    // Counted once during discovery and once when listing its files
    assert_eq!(report.stats.folder_errors, 2);
    assert_eq!(report.stats.files_updated, 2);
    assert!(!report.interrupted);
    assert!(report.marker.is_epoch());
    let parts = read_parts(&report);
    assert!(parts[0].contains("Title: Plan.txt"));
    assert!(!parts[0].contains("Title: Q1.md"));
}

#[test]
fn test_abandoned_branch_is_retried_after_marker_holds() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());
    let first = pass(&drive, &target, &settings);

    // Edited between passes, then unreachable for one pass
    let edited_at = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));
    drive.edit_file("c", edited_at, "# quarter one, revised");
    drive.fail_listing("q1");
    let report = pass(&drive, &target, &settings);
    assert!(report.stats.folder_errors > 0);
    assert_eq!(report.marker, first.marker);

    drive.clear_failures();
    let report = pass(&drive, &target, &settings);
    assert_eq!(report.stats.folder_errors, 0);
    assert_eq!(report.stats.files_updated, 1);
    let db = PersistenceStore::new(&report.output_dir).unwrap().load_database().unwrap();
    assert_eq!(db.get(&DocumentId::new("c")).unwrap().content(), "# quarter one, revised");
    assert!(report.marker > first.marker);
}

#[test]
fn test_cyclic_folders_are_listed_once() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.link_folder("q1", "team");
    drive.link_folder("q1", "reports");

    let report = pass(&drive, &SyncTarget::Folder("team".into()), &settings(dir.path()));

    assert_eq!(report.stats.files_updated, 3);
    assert_eq!(report.stats.folders_scanned, 3);
    for folder in ["team", "reports", "q1"] {
        assert_eq!(drive.listing_count(folder), 1, "{} listed more than once", folder);
    }
}

#[test]
fn test_download_failure_is_isolated() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.fail_download("b");
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());

    let report = pass(&drive, &target, &settings);
    assert_eq!(report.stats.files_errored, 1);
    assert_eq!(report.stats.files_updated, 2);
    assert!(report.marker.is_epoch());

    // A file never stored is retried regardless of the marker
    drive.clear_failures();
    let report = pass(&drive, &target, &settings);
    assert_eq!(report.stats.files_updated, 1);
    assert_eq!(report.stats.files_errored, 0);
    assert!(!report.marker.is_epoch());
}

#[test]
fn test_failed_download_of_edited_file_is_retried() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());
    let first = pass(&drive, &target, &settings);

    // Modified after the first pass started but before the second one
    let edited_at = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));
    drive.edit_file("a", edited_at, "the revised plan");
    drive.fail_download("a");
    let report = pass(&drive, &target, &settings);
    assert_eq!(report.stats.files_errored, 1);
    assert_eq!(report.marker, first.marker);
    let store = PersistenceStore::new(&report.output_dir).unwrap();
    assert_eq!(store.load_marker().unwrap(), first.marker);

    drive.clear_failures();
    let report = pass(&drive, &target, &settings);
    assert_eq!(report.stats.files_updated, 1);
    let db = store.load_database().unwrap();
    assert_eq!(db.get(&DocumentId::new("a")).unwrap().content(), "the revised plan");
    assert!(report.marker > first.marker);
}

#[test]
fn test_shared_drive_and_single_file_targets() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.add_shared_drive("sd1", "Design");
    drive.add_folder(Some("sd1"), "assets", "Assets");
    drive.add_file("assets", "s", "Brief.txt", mime::TEXT, at(4), "brief");
    let settings = settings(dir.path());

    let shared = pass(&drive, &SyncTarget::SharedDrive("sd1".into()), &settings);
    assert_eq!(shared.target_name, "Shared Drive - Design");
    assert_eq!(shared.stats.files_updated, 1);

    let single = pass(&drive, &SyncTarget::File("c".into()), &settings);
    assert_eq!(single.target_name, "Q1_md");
    assert_eq!(single.stats.files_updated, 1);
    assert_eq!(single.stats.folders_scanned, 0);

    // A file link that points at a folder is crawled
    let folder = pass(&drive, &SyncTarget::File("reports".into()), &settings);
    assert_eq!(folder.target_name, "Reports");
    assert_eq!(folder.stats.files_updated, 2);
}

#[test]
fn test_unreachable_store_is_fatal() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.set_unreachable(true);

    let err = run_pass(
        &drive,
        &SyncTarget::WholeStore,
        &settings(dir.path()),
        &ShutdownFlag::new(),
    )
    .unwrap_err();

    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::StoreUnreachable(_))));
    assert!(!dir.path().join("personal_drive").exists());
}

#[test]
fn test_unlistable_root_is_fatal() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    drive.fail_listing("team");

    let err = run_pass(
        &drive,
        &SyncTarget::Folder("team".into()),
        &settings(dir.path()),
        &ShutdownFlag::new(),
    )
    .unwrap_err();

    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::StoreUnreachable(_))));
}

#[test]
fn test_unwritable_output_root_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    let drive = team_drive();

    let err = run_pass(
        &drive,
        &SyncTarget::Folder("team".into()),
        &settings(&blocker),
        &ShutdownFlag::new(),
    )
    .unwrap_err();

    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::StateUnwritable { .. })));
}

/// Requests shutdown as soon as the first file is extracted
struct StopAfterFirst {
    inner: ExtractorRegistry,
    shutdown: ShutdownFlag,
}

impl ContentExtractor for StopAfterFirst {
    fn extract(&self, bytes: &[u8], mime_type: &str, source_url: Option<&str>) -> String {
        self.shutdown.set();
        self.inner.extract(bytes, mime_type, source_url)
    }
}

#[test]
fn test_interrupted_pass_keeps_marker() {
    let dir = TempDir::new().unwrap();
    let drive = team_drive();
    let target = SyncTarget::Folder("team".into());
    let settings = settings(dir.path());

    let shutdown = ShutdownFlag::new();
    let extractor = StopAfterFirst {
        inner: ExtractorRegistry::default(),
        shutdown: shutdown.clone(),
    };
    let report = run_pass_with(&drive, &extractor, &target, &settings, &shutdown).unwrap();

    assert!(report.interrupted);
    assert!(report.marker.is_epoch());
    let store = PersistenceStore::new(&report.output_dir).unwrap();
    assert!(store.load_marker().unwrap().is_epoch());
    let saved = store.load_database().unwrap();
    assert!(!saved.is_empty());

    // The next full pass picks up whatever was missed
    let report = pass(&drive, &target, &settings);
    assert!(!report.interrupted);
    assert_eq!(report.stats.files_updated, 3 - saved.len());
    assert_eq!(store.load_database().unwrap().len(), 3);
    assert!(!store.load_marker().unwrap().is_epoch());
}
