//! Download Engine for the mirror
//!
//! This module executes a download plan:
//! 1. Fetches each original in full through an [HttpFetch] transport
//! 2. Rejects empty bodies and checksum mismatches before touching the disk
//! 3. Writes through a temp file in the target folder, then renames it into place
//! 4. Runs a bounded number of tasks at once and stops cleanly on Ctrl-C

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::mirror::checksum::md5_bytes;
use crate::mirror::model::LocalFileRecord;
use crate::mirror::reconcile::DownloadTask;
use crate::smugmug::connection_pool::{FetchError, HttpFetch};
use crate::tui::{BYTES_TEMPLATE, progress_bar};

/// Error types for a single download
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Server returned an empty body")]
    EmptyBody,

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unable to write {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Another task already targets {0}")]
    DuplicateTarget(PathBuf),

    #[error("Write task failed: {0}")]
    Join(String),
}

impl DownloadError {
    /// Whether the content itself was rejected, as opposed to the transport or disk failing.
    pub fn is_integrity(&self) -> bool {
        matches!(self, DownloadError::EmptyBody | DownloadError::ChecksumMismatch { .. })
    }
}

/// Result type for download operations
pub type DownloadEngineResult<T> = Result<T, DownloadError>;

#[derive(Debug)]
pub enum DownloadOutcome {
    /// The file is in place; the record is ready for the checksum cache.
    Written(LocalFileRecord),
    Failed(DownloadError),
    /// Not started because a stop was requested.
    Cancelled,
}

#[derive(Debug)]
pub struct DownloadResult {
    pub task: DownloadTask,
    pub outcome: DownloadOutcome,
}

/// Download statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub written: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes: u64,
}

impl DownloadStats {
    pub fn from_results(results: &[DownloadResult]) -> Self {
        let mut stats = Self::default();
        for result in results {
            match &result.outcome {
                DownloadOutcome::Written(record) => {
                    stats.written += 1;
                    stats.bytes += record.size;
                }
                DownloadOutcome::Failed(_) => stats.failed += 1,
                DownloadOutcome::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

/// Shared stop request. Tasks already running finish; the rest are skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raises the flag on the first Ctrl-C. Abort the handle once the work is done.
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing downloads in progress, skipping the rest");
                flag.cancel();
            }
        })
    }
}

pub struct DownloadEngine<'a, F: HttpFetch> {
    fetcher: &'a F,
    concurrency: usize,
    cancel: CancelFlag,
}

impl<'a, F: HttpFetch> DownloadEngine<'a, F> {
    pub fn new(fetcher: &'a F, concurrency: usize, cancel: CancelFlag) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Runs every task and returns one result per task, in task order.
    ///
    /// Target folders must already exist. A failure only affects its own task.
    pub async fn execute(&self, tasks: Vec<DownloadTask>) -> Vec<DownloadResult> {
        let total_bytes: u64 = tasks.iter().map(|task| task.size_bytes).sum();
        let progress = progress_bar(total_bytes, BYTES_TEMPLATE, "Downloading");
        info!("Downloading {} files with {} workers", tasks.len(), self.concurrency);

        let mut targets = HashSet::with_capacity(tasks.len());
        let mut results: Vec<(usize, DownloadResult)> = Vec::with_capacity(tasks.len());
        let mut runnable = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.into_iter().enumerate() {
            if targets.insert(task.target_path.clone()) {
                runnable.push((index, task));
            } else {
                warn!("Skipping duplicate download for {}", task.target_path.display());
                let outcome = DownloadOutcome::Failed(DownloadError::DuplicateTarget(task.target_path.clone()));
                results.push((index, DownloadResult { task, outcome }));
            }
        }

        let progress_ref = &progress;
        let finished: Vec<(usize, DownloadResult)> = stream::iter(runnable)
            .map(|(index, task)| async move {
                let outcome = self.run_task(&task, progress_ref).await;
                (index, DownloadResult { task, outcome })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        progress.finish_and_clear();

        results.extend(finished);
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    #[instrument(skip_all, fields(task_id = %task.id))]
    async fn run_task(&self, task: &DownloadTask, progress: &ProgressBar) -> DownloadOutcome {
        if self.cancel.is_cancelled() {
            debug!("Cancelled before start: {}", task.target_path.display());
            return DownloadOutcome::Cancelled;
        }

        let outcome = match self.download(task).await {
            Ok(record) => {
                debug!("Wrote {} ({} bytes)", record.path.display(), record.size);
                DownloadOutcome::Written(record)
            }
            Err(err) => {
                if err.is_integrity() {
                    warn!("Downloaded image {} rejected: {}; skipping", task.target_path.display(), err);
                } else {
                    warn!("Download of {} failed: {}", task.target_path.display(), err);
                }
                DownloadOutcome::Failed(err)
            }
        };
        progress.inc(task.size_bytes);
        outcome
    }

    async fn download(&self, task: &DownloadTask) -> DownloadEngineResult<LocalFileRecord> {
        let body = self.fetcher.get(&task.source_url).await?;
        if body.is_empty() {
            return Err(DownloadError::EmptyBody);
        }

        let target = task.target_path.clone();
        let expected = task.expected_checksum.clone();
        tokio::task::spawn_blocking(move || verify_and_write(&target, &body, expected.as_deref()))
            .await
            .map_err(|e| DownloadError::Join(e.to_string()))?
    }
}

/// Checks the body against the expected checksum and writes it into place.
fn verify_and_write(target: &Path, body: &[u8], expected: Option<&str>) -> DownloadEngineResult<LocalFileRecord> {
    let actual = md5_bytes(body);
    if let Some(expected) = expected {
        if expected != actual {
            return Err(DownloadError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let filesystem = |source: io::Error| DownloadError::Filesystem {
        path: target.to_path_buf(),
        source,
    };

    let parent = target
        .parent()
        .ok_or_else(|| filesystem(io::Error::new(io::ErrorKind::InvalidInput, "target has no parent folder")))?;
    if !parent.is_dir() {
        return Err(filesystem(io::Error::new(
            io::ErrorKind::NotFound,
            format!("folder {} does not exist", parent.display()),
        )));
    }

    // The temp file lives next to the target so the rename stays on one filesystem.
    let mut temp = NamedTempFile::new_in(parent).map_err(filesystem)?;
    temp.write_all(body).map_err(filesystem)?;
    temp.as_file().sync_all().map_err(filesystem)?;
    temp.persist(target).map_err(|err| filesystem(err.error))?;

    let metadata = fs::metadata(target).map_err(filesystem)?;
    Ok(LocalFileRecord {
        path: target.to_path_buf(),
        modified: metadata.modified().map_err(filesystem)?,
        size: metadata.len(),
        checksum: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use reqwest::StatusCode;
    use tempfile::tempdir;
    use uuid::Uuid;

    use crate::mirror::config_loader::VerifyMode;
    use crate::mirror::model::{LocalFilesystemSnapshot, RemoteAlbum, RemoteCatalogSnapshot, RemoteImage};
    use crate::mirror::path_resolver::PathResolver;
    use crate::mirror::reconcile::plan_downloads;
    use crate::mirror::scanner::LocalScanner;

    /// Serves canned bodies; unknown URLs answer 404.
    #[derive(Default)]
    struct FakeFetch {
        bodies: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetch {
        fn with(bodies: Vec<(&str, Vec<u8>)>) -> Self {
            Self {
                bodies: bodies.into_iter().map(|(url, body)| (url.to_string(), body)).collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpFetch for FakeFetch {
        async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.bodies.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    fn task(target: PathBuf, url: &str, expected: Option<String>, size: u64) -> DownloadTask {
        DownloadTask {
            id: Uuid::new_v4(),
            target_path: target,
            source_url: url.to_string(),
            expected_checksum: expected,
            size_bytes: size,
        }
    }

    fn written(result: &DownloadResult) -> &LocalFileRecord {
        match &result.outcome {
            DownloadOutcome::Written(record) => record,
            other => panic!("expected a written file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_file_and_returns_record() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::with(vec![("https://p/a.jpg", b"pixels".to_vec())]);
        let engine = DownloadEngine::new(&fetch, 2, CancelFlag::default());
        let target = dir.path().join("a.jpg");

        let results = engine
            .execute(vec![task(target.clone(), "https://p/a.jpg", Some(md5_bytes(b"pixels")), 6)])
            .await;

        let record = written(&results[0]);
        assert_eq!(record.path, target);
        assert_eq!(record.size, 6);
        assert_eq!(record.checksum, md5_bytes(b"pixels"));
        assert_eq!(fs::read(&target).unwrap(), b"pixels");
        // No temp file left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_content_is_not_written() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::with(vec![("https://p/empty", b"".to_vec()), ("https://p/bad", b"wrong".to_vec())]);
        let engine = DownloadEngine::new(&fetch, 2, CancelFlag::default());

        let results = engine
            .execute(vec![
                task(dir.path().join("empty.jpg"), "https://p/empty", None, 0),
                task(dir.path().join("bad.jpg"), "https://p/bad", Some(md5_bytes(b"right")), 5),
            ])
            .await;

        assert!(matches!(results[0].outcome, DownloadOutcome::Failed(DownloadError::EmptyBody)));
        assert!(matches!(
            results[1].outcome,
            DownloadOutcome::Failed(DownloadError::ChecksumMismatch { .. })
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::with(vec![("https://p/ok", b"ok".to_vec())]);
        let engine = DownloadEngine::new(&fetch, 1, CancelFlag::default());

        let results = engine
            .execute(vec![
                task(dir.path().join("missing.jpg"), "https://p/404", None, 1),
                task(dir.path().join("nofolder").join("x.jpg"), "https://p/ok", None, 2),
                task(dir.path().join("ok.jpg"), "https://p/ok", None, 2),
            ])
            .await;

        assert!(matches!(results[0].outcome, DownloadOutcome::Failed(DownloadError::Fetch(_))));
        assert!(matches!(
            results[1].outcome,
            DownloadOutcome::Failed(DownloadError::Filesystem { .. })
        ));
        written(&results[2]);

        let stats = DownloadStats::from_results(&results);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.bytes, 2);
    }

    #[tokio::test]
    async fn test_duplicate_targets_run_once() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::with(vec![("https://p/a", b"a".to_vec()), ("https://p/b", b"b".to_vec())]);
        let engine = DownloadEngine::new(&fetch, 4, CancelFlag::default());
        let target = dir.path().join("same.jpg");

        let results = engine
            .execute(vec![
                task(target.clone(), "https://p/a", None, 1),
                task(target.clone(), "https://p/b", None, 1),
            ])
            .await;

        written(&results[0]);
        assert!(matches!(
            results[1].outcome,
            DownloadOutcome::Failed(DownloadError::DuplicateTarget(_))
        ));
        assert_eq!(*fetch.requested.lock().unwrap(), vec!["https://p/a".to_string()]);
        assert_eq!(fs::read(&target).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_cancelled_tasks_are_not_started() {
        let dir = tempdir().unwrap();
        let fetch = FakeFetch::with(vec![("https://p/a", b"a".to_vec())]);
        let cancel = CancelFlag::default();
        cancel.cancel();
        let engine = DownloadEngine::new(&fetch, 2, cancel);

        let results = engine
            .execute(vec![task(dir.path().join("a.jpg"), "https://p/a", None, 1)])
            .await;

        assert!(matches!(results[0].outcome, DownloadOutcome::Cancelled));
        assert!(fetch.requested.lock().unwrap().is_empty());
        assert!(!dir.path().join("a.jpg").exists());
    }

    #[tokio::test]
    async fn test_mirror_round_trip_leaves_nothing_to_do() {
        let dir = tempdir().unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        let body = vec![7u8; 1000];
        let remote = RemoteCatalogSnapshot {
            albums: vec![RemoteAlbum {
                id: 1,
                key: "k".to_string(),
                title: "Trip".to_string(),
                category: None,
                subcategory: None,
                last_updated: "T1".to_string(),
                images: vec![RemoteImage {
                    filename: "beach.jpg".to_string(),
                    original_url: "https://p/beach.jpg".to_string(),
                    size_bytes: 1000,
                    checksum: Some(md5_bytes(&body)),
                    is_video: false,
                }],
            }],
            fetched_at: None,
        };

        let plan = plan_downloads(&remote, &LocalFilesystemSnapshot::default(), &resolver, VerifyMode::Checksum);
        assert_eq!(plan.task_count(), 1);
        fs::create_dir_all(&plan.albums[0].directory).unwrap();

        let fetch = FakeFetch::with(vec![("https://p/beach.jpg", body.clone())]);
        let engine = DownloadEngine::new(&fetch, 4, CancelFlag::default());
        let results = engine.execute(plan.tasks().cloned().collect()).await;
        written(&results[0]);

        let (local, _) = LocalScanner::new(resolver.root(), Some(1))
            .scan(&LocalFilesystemSnapshot::default())
            .unwrap();
        let second = plan_downloads(&remote, &local, &resolver, VerifyMode::Checksum);
        assert!(second.is_empty());
    }
}
