use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::mirror::checksum::md5_file;
use crate::mirror::model::{LocalFileRecord, LocalFilesystemSnapshot};
use crate::tui::{COUNT_TEMPLATE, progress_bar};

/// Counters reported after a scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub directories: usize,
    pub files: usize,
    /// Checksums carried over from the previous scan.
    pub reused: usize,
    /// Checksums computed by this scan.
    pub hashed: usize,
    /// Entries that could not be read.
    pub skipped: usize,
}

/// A file whose checksum has to be computed.
struct PendingFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Walks the mirror root and builds the local snapshot.
pub struct LocalScanner {
    root: PathBuf,
    workers: usize,
}

impl LocalScanner {
    /// Hashing uses 80% of logical cores unless `workers` is given.
    pub fn new(root: &Path, workers: Option<usize>) -> Self {
        let workers = workers.unwrap_or_else(|| ((num_cpus::get() as f64 * 0.8).floor() as usize).max(1));
        Self {
            root: root.to_path_buf(),
            workers,
        }
    }

    /// Lists every regular file under the root. A file keeps its previous
    /// checksum when its modification time equals the cached one; everything
    /// else is hashed. Unreadable entries and names that are not UTF-8 are
    /// skipped with a warning. Symlinks are not followed.
    ///
    /// A file rewritten within the filesystem's timestamp resolution keeps a
    /// stale checksum until its mtime moves again.
    pub fn scan(&self, previous: &LocalFilesystemSnapshot) -> Result<(LocalFilesystemSnapshot, ScanStats)> {
        let mut stats = ScanStats::default();
        let mut snapshot = LocalFilesystemSnapshot::default();
        let mut pending = Vec::new();

        let directories = self.count_directories();
        debug!("Scanning {} directories under {}", directories, self.root.display());
        let progress = progress_bar(directories as u64, COUNT_TEMPLATE, "Scanning folders");

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    stats.skipped += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                stats.directories += 1;
                progress.inc(1);
                continue;
            }
            if file_type.is_symlink() {
                debug!("Not following symlink {}", entry.path().display());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            // Catalog paths are always UTF-8, and the cache stores paths as strings.
            if entry.path().to_str().is_none() {
                warn!("Skipping file with a non UTF-8 name: {}", entry.path().display());
                stats.skipped += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Unable to read metadata for {}: {}", entry.path().display(), err);
                    stats.skipped += 1;
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(err) => {
                    warn!("Unable to read modification time for {}: {}", entry.path().display(), err);
                    stats.skipped += 1;
                    continue;
                }
            };

            let path = entry.into_path();
            match previous.get(&path) {
                Some(cached) if cached.modified == modified => {
                    stats.reused += 1;
                    snapshot.insert(LocalFileRecord {
                        path,
                        modified,
                        size: metadata.len(),
                        checksum: cached.checksum.clone(),
                    });
                }
                _ => pending.push(PendingFile {
                    path,
                    modified,
                    size: metadata.len(),
                }),
            }
        }
        progress.finish_and_clear();

        if !pending.is_empty() {
            info!("Computing checksums for {} new or changed files", pending.len());
            for record in self.hash_pending(pending, &mut stats)? {
                snapshot.insert(record);
            }
        }

        stats.files = snapshot.len();
        info!(
            "Scanned {} files in {} folders ({} reused, {} hashed, {} skipped)",
            stats.files, stats.directories, stats.reused, stats.hashed, stats.skipped
        );
        Ok((snapshot, stats))
    }

    /// Counts directories up front so the progress bar has a length.
    fn count_directories(&self) -> usize {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .count()
    }

    fn hash_pending(&self, pending: Vec<PendingFile>, stats: &mut ScanStats) -> Result<Vec<LocalFileRecord>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("hash-worker-{}", i))
            .build()
            .context("Failed to create hashing thread pool")?;

        let progress = progress_bar(pending.len() as u64, COUNT_TEMPLATE, "Hashing files");
        let results: Vec<Option<LocalFileRecord>> = pool.install(|| {
            pending
                .into_par_iter()
                .map(|file| {
                    let result = match md5_file(&file.path) {
                        Ok(checksum) => Some(LocalFileRecord {
                            path: file.path,
                            modified: file.modified,
                            size: file.size,
                            checksum,
                        }),
                        Err(err) => {
                            warn!("Unable to hash {}: {}", file.path.display(), err);
                            None
                        }
                    };
                    progress.inc(1);
                    result
                })
                .collect()
        });
        progress.finish_and_clear();

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Some(record) => {
                    stats.hashed += 1;
                    records.push(record);
                }
                None => stats.skipped += 1,
            }
        }
        Ok(records)
    }
}
