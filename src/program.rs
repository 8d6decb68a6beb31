use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Error};
use console::{Term, style};
use indicatif::HumanBytes;
use tracing::{debug, info, trace, warn};

use crate::cli::Command;
use crate::mirror::catalog_cache::RemoteCatalogCache;
use crate::mirror::checksum::ChecksumCache;
use crate::mirror::config_loader::MirrorConfig;
use crate::mirror::download_engine::{CancelFlag, DownloadEngine, DownloadOutcome, DownloadStats};
use crate::mirror::model::{LocalFilesystemSnapshot, RemoteAlbum, RemoteCatalogSnapshot};
use crate::mirror::path_resolver::PathResolver;
use crate::mirror::reconcile::{self, DownloadPlan};
use crate::mirror::scanner::LocalScanner;
use crate::smugmug::connection_pool::ConnectionPoolConfig;
use crate::smugmug::{CatalogProvider, SmugMugClient};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How a command finished, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Clean,
    /// Discrepancies, duplicates or failed downloads were reported.
    Dirty,
}

/// A program class that runs one command against a validated configuration.
pub(crate) struct Program {
    config: MirrorConfig,
    cache_dir: PathBuf,
    resolver: PathResolver,
    term: Term,
}

impl Program {
    /// Checks the configuration before anything is fetched or scanned.
    pub(crate) fn new(config: MirrorConfig) -> Result<Self, Error> {
        config.validate()?;
        let cache_dir = config.cache_directory()?;
        let resolver = PathResolver::new(&config.paths.mirror_root)?;

        Ok(Self {
            config,
            cache_dir,
            resolver,
            term: Term::stdout(),
        })
    }

    pub(crate) async fn run(&self, command: &Command) -> Result<Outcome, Error> {
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Mirror root: {}", self.resolver.root().display());
        trace!("Cache directory: {}", self.cache_dir.display());
        trace!("API key: {}", "*".repeat(self.config.account.api_key.len()));

        match command {
            Command::ListAlbums => self.list_albums().await,
            Command::GetAlbum { name, dry_run } => self.mirror(Some(name.as_str()), *dry_run).await,
            Command::GetAlbums { dry_run } => self.mirror(None, *dry_run).await,
            Command::CacheRemote => self.cache_remote().await,
            Command::Check { refresh } => self.check(*refresh).await,
            Command::FindDuplicates => self.find_duplicates().await,
        }
    }

    async fn connect(&self) -> Result<SmugMugClient, Error> {
        let pool_config = ConnectionPoolConfig::from_download(&self.config.download);
        let mut client = SmugMugClient::new(&self.config.account.api_key, pool_config)?;
        client
            .login(&self.config.account.nickname, self.config.password())
            .await
            .context("Unable to open a SmugMug session")?;
        Ok(client)
    }

    async fn refresh_catalog(&self, client: &SmugMugClient) -> Result<RemoteCatalogSnapshot, Error> {
        let cache = RemoteCatalogCache::new(&self.cache_dir);
        let previous = cache.load();
        let (snapshot, _) = cache
            .refresh(client, &self.config.account.nickname, &previous)
            .await?;
        Ok(snapshot)
    }

    /// Scans the mirror root, reusing and then overwriting the checksum cache.
    async fn scan(&self) -> Result<LocalFilesystemSnapshot, Error> {
        let cache = ChecksumCache::new(&self.cache_dir);
        let previous = cache.load();
        let root = self.resolver.root().to_path_buf();

        let (snapshot, _) = tokio::task::spawn_blocking(move || LocalScanner::new(&root, None).scan(&previous))
            .await
            .context("Scan task failed")??;

        self.save_checksums(&snapshot);
        Ok(snapshot)
    }

    /// A cache that cannot be written only costs rehashing on the next run.
    fn save_checksums(&self, snapshot: &LocalFilesystemSnapshot) {
        let cache = ChecksumCache::new(&self.cache_dir);
        if let Err(err) = cache.save(snapshot) {
            warn!("Unable to save {}: {}", cache.path().display(), err);
        }
    }

    async fn list_albums(&self) -> Result<Outcome, Error> {
        let client = self.connect().await?;
        let albums = client.list_albums(&self.config.account.nickname).await?;
        for album in &albums {
            self.term.write_line(&album.title)?;
        }
        Ok(Outcome::Clean)
    }

    async fn cache_remote(&self) -> Result<Outcome, Error> {
        let client = self.connect().await?;
        let cache = RemoteCatalogCache::new(&self.cache_dir);
        let previous = cache.load();
        let (snapshot, stats) = cache
            .refresh(&client, &self.config.account.nickname, &previous)
            .await?;

        self.term.write_line(&format!(
            "Cached {} albums with {} images to {}",
            stats.albums,
            snapshot.image_count(),
            cache.path().display()
        ))?;
        self.term.write_line(&format!(
            "  {} fetched, {} unchanged, {} failed, {} dropped",
            stats.fetched, stats.reused, stats.failed, stats.dropped
        ))?;
        Ok(Outcome::Clean)
    }

    /// Mirrors every album, or only those titled `name`.
    async fn mirror(&self, name: Option<&str>, dry_run: bool) -> Result<Outcome, Error> {
        let client = self.connect().await?;
        let remote = self.refresh_catalog(&client).await?;
        let mut local = self.scan().await?;

        let albums: Vec<&RemoteAlbum> = remote
            .albums
            .iter()
            .filter(|album| name.is_none_or(|name| album.title == name))
            .collect();
        if let (Some(name), true) = (name, albums.is_empty()) {
            warn!("No album titled \"{}\"", name);
            return Ok(Outcome::Clean);
        }

        let plan = reconcile::plan_albums(albums, &local, &self.resolver, self.config.download.verify);
        self.print_plan(&plan)?;

        if plan.is_empty() {
            return Ok(Outcome::Clean);
        }
        if dry_run {
            for task in plan.tasks() {
                self.term
                    .write_line(&format!("  would download {} -> {}", task.source_url, task.target_path.display()))?;
            }
            return Ok(Outcome::Clean);
        }

        self.create_album_folders(&plan)?;

        let pool = client.download_pool()?;
        let cancel = CancelFlag::default();
        let listener = cancel.listen_for_ctrl_c();
        let engine = DownloadEngine::new(&pool, self.config.download.concurrency, cancel);
        let results = engine.execute(plan.tasks().cloned().collect()).await;
        listener.abort();

        // Cache writes only after every worker is done.
        for result in &results {
            if let DownloadOutcome::Written(record) = &result.outcome {
                local.insert(record.clone());
            }
        }
        self.save_checksums(&local);

        let stats = DownloadStats::from_results(&results);
        self.term.write_line(&format!(
            "Downloaded {} files ({}), {} failed, {} cancelled",
            stats.written,
            HumanBytes(stats.bytes),
            stats.failed,
            stats.cancelled
        ))?;

        if stats.failed > 0 || stats.cancelled > 0 {
            Ok(Outcome::Dirty)
        } else {
            Ok(Outcome::Clean)
        }
    }

    fn print_plan(&self, plan: &DownloadPlan) -> Result<(), Error> {
        for album in &plan.albums {
            self.term.write_line("")?;
            self.term
                .write_line(&format!("Checking album {}", style(format!("\"{}\"", album.title)).bold()))?;
            if album.is_synced() {
                self.term.write_line(&style("Already synced").green().to_string())?;
            } else {
                self.term.write_line(&format!(
                    "Found {} missing images for album \"{}\"",
                    album.tasks.len(),
                    album.title
                ))?;
            }
            if album.videos_skipped > 0 || album.unavailable > 0 {
                debug!(
                    "\"{}\": {} videos skipped, {} without an original",
                    album.title, album.videos_skipped, album.unavailable
                );
            }
        }
        Ok(())
    }

    /// Creates each album folder once, before any download runs. A folder
    /// that cannot be created fails only that album's downloads.
    fn create_album_folders(&self, plan: &DownloadPlan) -> Result<(), Error> {
        for album in plan.albums.iter().filter(|album| !album.is_synced()) {
            if album.directory.is_dir() {
                continue;
            }
            self.term
                .write_line(&format!("Creating missing folder \"{}\"", album.directory.display()))?;
            if let Err(err) = fs::create_dir_all(&album.directory) {
                warn!("Unable to create {}: {}", album.directory.display(), err);
            }
        }
        Ok(())
    }

    async fn check(&self, refresh: bool) -> Result<Outcome, Error> {
        let mut remote = RemoteCatalogCache::new(&self.cache_dir).load();
        if refresh || remote.is_empty() {
            if !refresh {
                info!("Remote cache is empty; refreshing it first");
            }
            let client = self.connect().await?;
            remote = self.refresh_catalog(&client).await?;
        }

        let local = self.scan().await?;
        let report = reconcile::classify(&remote, &local, &self.resolver);

        for path in &report.unverifiable {
            warn!("Missing MD5 sum for {}", path.display());
        }

        self.print_section("Images not mirrored locally:", &report.missing_locally)?;
        if !report.misplaced.is_empty() {
            self.term
                .write_line(&style("Images found in the wrong location:").bold().to_string())?;
            for misplaced in &report.misplaced {
                self.term.write_line(&format!(
                    "Image at {} should be at {}",
                    misplaced.path.display(),
                    misplaced.expected.display()
                ))?;
            }
            self.term.write_line("")?;
        }
        self.print_section("Images with bad checksums:", &report.corrupted)?;
        self.print_section("Images not synced to SmugMug:", &report.orphaned)?;

        if report.is_clean() {
            info!("Mirror matches SmugMug ({} files)", local.len());
            Ok(Outcome::Clean)
        } else {
            info!("Found {} discrepancies", report.discrepancy_count());
            Ok(Outcome::Dirty)
        }
    }

    async fn find_duplicates(&self) -> Result<Outcome, Error> {
        let local = self.scan().await?;
        let duplicates = reconcile::find_duplicates(&local);

        if duplicates.is_empty() {
            self.term.write_line(&style("No duplicates found").bold().to_string())?;
            return Ok(Outcome::Clean);
        }

        self.term.write_line(&style("Duplicate images:").bold().to_string())?;
        for (first, other) in &duplicates {
            self.term
                .write_line(&format!(" * {} is also at {}", first.display(), other.display()))?;
        }
        Ok(Outcome::Dirty)
    }

    fn print_section(&self, title: &str, paths: &[PathBuf]) -> Result<(), Error> {
        if paths.is_empty() {
            return Ok(());
        }
        self.term.write_line(&style(title).bold().to_string())?;
        for path in paths {
            self.term.write_line(&format!(" * {}", path.display()))?;
        }
        self.term.write_line("")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_scan_survives_unwritable_checksum_cache() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("mirror");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.jpg"), b"a").unwrap();
        // A file where the cache directory should be makes every save fail.
        let blocked = dir.path().join("cache");
        fs::write(&blocked, b"not a directory").unwrap();

        let mut config = MirrorConfig::default();
        config.account.nickname = "someone".to_string();
        config.account.api_key = "key".to_string();
        config.paths.mirror_root = root.clone();
        config.paths.cache_directory = Some(blocked);

        let program = Program::new(config).unwrap();
        let snapshot = program.scan().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&root.join("a.jpg")).is_some());
    }
}
