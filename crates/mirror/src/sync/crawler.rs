//! Concurrent folder discovery
//!
//! Breadth-first over a shared queue seeded with the root's children. A
//! folder is recorded in the visited set before it is queued, so no folder
//! is listed twice even when the folder graph has cycles.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::queue::{WorkQueue, wait_for_quiescence};
use super::{RateLimiter, ShutdownFlag};
use crate::config::SyncSettings;
use crate::drive::{RemoteFolder, RemoteStore};
use crate::models::FolderNode;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Result of a crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Every folder reached, the root first; no duplicates
    pub folders: Vec<FolderNode>,
    /// Folders whose listing failed (their subtrees were skipped)
    pub errors: usize,
    pub elapsed: Duration,
}

/// List every page of a folder's child folders
pub(crate) fn list_all_child_folders(
    store: &dyn RemoteStore,
    limiter: &RateLimiter,
    folder_id: &str,
) -> Result<Vec<RemoteFolder>> {
    let mut folders = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = limiter.execute(|| store.list_child_folders(folder_id, page_token.as_deref()))?;
        folders.extend(page.items);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => return Ok(folders),
        }
    }
}

pub struct FolderCrawler<'a> {
    store: &'a dyn RemoteStore,
    limiter: &'a RateLimiter,
    settings: &'a SyncSettings,
    shutdown: &'a ShutdownFlag,
}

impl<'a> FolderCrawler<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        limiter: &'a RateLimiter,
        settings: &'a SyncSettings,
        shutdown: &'a ShutdownFlag,
    ) -> Self {
        Self {
            store,
            limiter,
            settings,
            shutdown,
        }
    }

    /// Discover `root` and all of its descendant folders.
    ///
    /// Failing to list the root itself is an error; failures further down
    /// only cut off that branch.
    pub fn crawl(&self, root: FolderNode) -> Result<CrawlReport> {
        let start = Instant::now();
        log::info!("Discovering folders under {}", root.name);

        let children = list_all_child_folders(self.store, self.limiter, &root.id)
            .with_context(|| format!("Failed to list root folder {}", root.id))?;

        let visited = Mutex::new(HashSet::from([root.id.clone()]));
        let found = Mutex::new(vec![root.clone()]);
        let queue = WorkQueue::unbounded();
        let errors = AtomicUsize::new(0);
        let poll = self.settings.poll_interval();

        self.enqueue_unseen(&root, children, &visited, &found, &queue);

        let workers = self.settings.crawl_worker_count();
        let finished = ShutdownFlag::new();

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| self.worker(&queue, &visited, &found, &errors, &finished));
            }

            let mut last_report = Instant::now();
            wait_for_quiescence(
                self.settings.quiescence_checks,
                poll,
                self.shutdown,
                || {
                    if last_report.elapsed() >= PROGRESS_INTERVAL {
                        last_report = Instant::now();
                        log::info!(
                            "Crawl progress: {} folders found, {} queued, {} listing, delay {:?}, {} errors",
                            found.lock().map(|f| f.len()).unwrap_or(0),
                            queue.len(),
                            queue.in_flight(),
                            self.limiter.current_delay(),
                            errors.load(Ordering::Relaxed)
                        );
                    }
                },
                || queue.is_idle(),
            );
            finished.set();
        });

        let folders = found.into_inner().unwrap_or_else(|e| e.into_inner());
        let report = CrawlReport {
            errors: errors.into_inner(),
            elapsed: start.elapsed(),
            folders,
        };
        log::info!(
            "Found {} folders in {:.1}s ({} errors)",
            report.folders.len(),
            report.elapsed.as_secs_f64(),
            report.errors
        );
        Ok(report)
    }

    fn worker(
        &self,
        queue: &WorkQueue<FolderNode>,
        visited: &Mutex<HashSet<String>>,
        found: &Mutex<Vec<FolderNode>>,
        errors: &AtomicUsize,
        finished: &ShutdownFlag,
    ) {
        let poll = self.settings.poll_interval();
        let mut processed = 0usize;

        while !finished.is_set() && !self.shutdown.is_set() {
            let Some(folder) = queue.pop_timeout(poll) else {
                continue;
            };

            match list_all_child_folders(self.store, self.limiter, &folder.id) {
                Ok(children) => self.enqueue_unseen(&folder, children, visited, found, queue),
                Err(e) => {
                    errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Skipping folder {} ({}): {:#}", folder.path, folder.id, e);
                }
            }
            drop(folder);

            processed += 1;
            if processed % self.settings.crawl_batch_size == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn enqueue_unseen(
        &self,
        parent: &FolderNode,
        children: Vec<RemoteFolder>,
        visited: &Mutex<HashSet<String>>,
        found: &Mutex<Vec<FolderNode>>,
        queue: &WorkQueue<FolderNode>,
    ) {
        let fresh: Vec<FolderNode> = {
            let mut visited = visited.lock().unwrap_or_else(|e| e.into_inner());
            children
                .into_iter()
                .filter(|child| visited.insert(child.id.clone()))
                .map(|child| parent.child(child.id, child.name))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }

        found
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(fresh.iter().cloned());
        for node in fresh {
            log::debug!("Found folder {}", node.path);
            queue.push(node, self.shutdown, self.settings.poll_interval());
        }
    }
}
