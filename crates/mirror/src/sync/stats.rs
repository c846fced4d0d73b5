/// Statistics from a sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Folder listings completed by the scheduler
    pub folders_scanned: usize,
    /// Folder listings that failed, during discovery or scheduling
    pub folder_errors: usize,
    /// Files that were new or modified since the last marker
    pub changes_processed: usize,
    /// Documents inserted or whose content changed
    pub files_updated: usize,
    /// Candidates whose content turned out identical
    pub files_unchanged: usize,
    /// Files not modified since the last marker
    pub files_skipped: usize,
    /// Tombstoned documents seen again
    pub files_restored: usize,
    /// Documents tombstoned by this pass
    pub files_deleted: usize,
    /// Files that failed to download
    pub files_errored: usize,
    pub bytes_downloaded: u64,
    pub duration_ms: u64,
}
