//! Compares the remote catalog against the local mirror.
//!
//! Two modes share the same inputs: [plan_downloads] decides what to fetch,
//! [classify] explains how the two sides differ. Both are pure; all I/O
//! happens before (scan, refresh) and after (download) them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mirror::config_loader::VerifyMode;
use crate::mirror::model::{
    ExpectedChecksum, LocalFileRecord, LocalFilesystemSnapshot, RemoteAlbum, RemoteCatalogSnapshot, RemoteImage,
};
use crate::mirror::path_resolver::PathResolver;

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Correlates log lines for this task.
    pub id: Uuid,
    pub target_path: PathBuf,
    pub source_url: String,
    pub expected_checksum: Option<String>,
    pub size_bytes: u64,
}

/// What the planner decided for a single album.
#[derive(Debug, Clone, Default)]
pub struct AlbumPlan {
    pub album_id: u64,
    pub title: String,
    pub directory: PathBuf,
    pub tasks: Vec<DownloadTask>,
    /// Images already mirrored.
    pub present: usize,
    pub videos_skipped: usize,
    /// Images without a downloadable original.
    pub unavailable: usize,
    /// Local files replaced because their size or checksum is wrong.
    pub mismatched: usize,
}

impl AlbumPlan {
    pub fn is_synced(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    pub albums: Vec<AlbumPlan>,
}

impl DownloadPlan {
    pub fn tasks(&self) -> impl Iterator<Item = &DownloadTask> {
        self.albums.iter().flat_map(|album| album.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.albums.iter().map(|album| album.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }
}

/// Plans every album of the snapshot.
pub fn plan_downloads(
    remote: &RemoteCatalogSnapshot,
    local: &LocalFilesystemSnapshot,
    resolver: &PathResolver,
    verify: VerifyMode,
) -> DownloadPlan {
    plan_albums(&remote.albums, local, resolver, verify)
}

/// Plans a subset of albums. Target paths are unique across the whole plan.
pub fn plan_albums<'a, I>(
    albums: I,
    local: &LocalFilesystemSnapshot,
    resolver: &PathResolver,
    verify: VerifyMode,
) -> DownloadPlan
where
    I: IntoIterator<Item = &'a RemoteAlbum>,
{
    let mut seen = HashSet::new();
    let albums = albums
        .into_iter()
        .map(|album| plan_album(album, local, resolver, verify, &mut seen))
        .collect();
    DownloadPlan { albums }
}

/// Decides, image by image, whether the album's files are already mirrored.
///
/// `seen` collects target paths across calls; a path that was already
/// planned is not planned again.
pub fn plan_album(
    album: &RemoteAlbum,
    local: &LocalFilesystemSnapshot,
    resolver: &PathResolver,
    verify: VerifyMode,
    seen: &mut HashSet<PathBuf>,
) -> AlbumPlan {
    let mut plan = AlbumPlan {
        album_id: album.id,
        title: album.title.clone(),
        directory: resolver.resolve(album),
        ..AlbumPlan::default()
    };

    for image in &album.images {
        let target = resolver.image_path(album, image);
        if !seen.insert(target.clone()) {
            warn!(
                "{} is listed more than once in the catalog; only the first listing is mirrored",
                target.display()
            );
            continue;
        }

        if let Some(record) = local.get(&target) {
            match verify_local(record, image, verify) {
                LocalState::Matches => {
                    plan.present += 1;
                    continue;
                }
                LocalState::WrongSize if !image.is_video => {
                    warn!("File {} is the wrong size; re-downloading", target.display());
                    plan.mismatched += 1;
                }
                LocalState::WrongChecksum if !image.is_video => {
                    warn!("File {} has the wrong checksum; re-downloading", target.display());
                    plan.mismatched += 1;
                }
                _ => {}
            }
        }

        if image.is_video {
            info!("{} is a video; skipping", target.display());
            plan.videos_skipped += 1;
            continue;
        }

        if image.original_url.is_empty() {
            warn!("{} has no downloadable original; skipping", target.display());
            plan.unavailable += 1;
            continue;
        }

        plan.tasks.push(DownloadTask {
            id: Uuid::new_v4(),
            target_path: target,
            source_url: image.original_url.clone(),
            expected_checksum: image.checksum.clone(),
            size_bytes: image.size_bytes,
        });
    }

    debug!(
        "Planned \"{}\": {} to download, {} present, {} videos skipped",
        plan.title,
        plan.tasks.len(),
        plan.present,
        plan.videos_skipped
    );
    plan
}

enum LocalState {
    Matches,
    WrongSize,
    WrongChecksum,
}

fn verify_local(record: &LocalFileRecord, image: &RemoteImage, verify: VerifyMode) -> LocalState {
    if record.size != image.size_bytes {
        return LocalState::WrongSize;
    }
    match (verify, image.expected_checksum()) {
        (VerifyMode::Checksum, ExpectedChecksum::Known(sum)) if sum != record.checksum => LocalState::WrongChecksum,
        _ => LocalState::Matches,
    }
}

/// A local file whose content belongs somewhere else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Misplaced {
    pub path: PathBuf,
    /// Canonical location of the matching remote image.
    pub expected: PathBuf,
}

/// Disjoint classes of drift between the catalog and the mirror, each sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscrepancyReport {
    /// Canonical paths of remote images with no local copy.
    pub missing_locally: Vec<PathBuf>,
    pub misplaced: Vec<Misplaced>,
    /// Local files at a canonical path whose checksum differs from the catalog.
    pub corrupted: Vec<PathBuf>,
    /// Local files that correspond to nothing in the catalog.
    pub orphaned: Vec<PathBuf>,
    /// Canonical paths of images the catalog reported without a checksum.
    /// Their presence is checked but not their content.
    pub unverifiable: Vec<PathBuf>,
}

impl DiscrepancyReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancy_count() == 0
    }

    pub fn discrepancy_count(&self) -> usize {
        self.missing_locally.len() + self.misplaced.len() + self.corrupted.len() + self.orphaned.len()
    }
}

/// Classifies every local file and every remote image.
///
/// A checksum match wins over a path match: a file with the right content in
/// the wrong folder is misplaced, whatever occupies its canonical path.
pub fn classify(
    remote: &RemoteCatalogSnapshot,
    local: &LocalFilesystemSnapshot,
    resolver: &PathResolver,
) -> DiscrepancyReport {
    let mut by_checksum: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut by_path: BTreeMap<PathBuf, ExpectedChecksum> = BTreeMap::new();

    for album in &remote.albums {
        for image in &album.images {
            let path = resolver.image_path(album, image);
            if by_path.contains_key(&path) {
                continue;
            }
            let expected = image.expected_checksum();
            if let ExpectedChecksum::Known(sum) = &expected {
                by_checksum.entry(sum.clone()).or_default().push(path.clone());
            }
            by_path.insert(path, expected);
        }
    }

    let mut report = DiscrepancyReport::default();
    let mut local_checksums: HashSet<&str> = HashSet::with_capacity(local.len());

    for record in local.records() {
        local_checksums.insert(record.checksum.as_str());

        if let Some(paths) = by_checksum.get(&record.checksum) {
            if !paths.contains(&record.path) {
                report.misplaced.push(Misplaced {
                    path: record.path.clone(),
                    expected: paths[0].clone(),
                });
            }
            continue;
        }

        match by_path.get(&record.path) {
            Some(ExpectedChecksum::Known(_)) => report.corrupted.push(record.path.clone()),
            Some(ExpectedChecksum::Skipped) | Some(ExpectedChecksum::Unknown) => {}
            None => report.orphaned.push(record.path.clone()),
        }
    }

    for (path, expected) in &by_path {
        let occupied = local.get(path).is_some();
        let missing = match expected {
            ExpectedChecksum::Known(sum) => !occupied && !local_checksums.contains(sum.as_str()),
            ExpectedChecksum::Skipped => !occupied,
            ExpectedChecksum::Unknown => {
                report.unverifiable.push(path.clone());
                !occupied
            }
        };
        if missing {
            report.missing_locally.push(path.clone());
        }
    }

    report.missing_locally.sort();
    report.misplaced.sort();
    report.corrupted.sort();
    report.orphaned.sort();
    report.unverifiable.sort();
    report
}

/// Pairs of local files with identical content: the first path in sort
/// order, then each other path sharing its checksum.
pub fn find_duplicates(local: &LocalFilesystemSnapshot) -> Vec<(PathBuf, PathBuf)> {
    let mut by_checksum: HashMap<&str, Vec<&PathBuf>> = HashMap::new();
    for record in local.records() {
        by_checksum.entry(record.checksum.as_str()).or_default().push(&record.path);
    }

    let mut duplicates: Vec<(PathBuf, PathBuf)> = by_checksum
        .into_values()
        .filter(|paths| paths.len() > 1)
        .flat_map(|mut paths| {
            paths.sort();
            let first = paths[0].clone();
            paths
                .into_iter()
                .skip(1)
                .map(move |other| (first.clone(), other.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    duplicates.sort();
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::SystemTime;

    use tempfile::{TempDir, tempdir};

    fn album(id: u64, title: &str, images: Vec<RemoteImage>) -> RemoteAlbum {
        RemoteAlbum {
            id,
            key: format!("key{}", id),
            title: title.to_string(),
            category: None,
            subcategory: None,
            last_updated: "T1".to_string(),
            images,
        }
    }

    fn image(name: &str, size: u64, checksum: Option<&str>) -> RemoteImage {
        RemoteImage {
            filename: name.to_string(),
            original_url: format!("https://photos.example/{}", name),
            size_bytes: size,
            checksum: checksum.map(str::to_string),
            is_video: false,
        }
    }

    fn video(name: &str, checksum: Option<&str>) -> RemoteImage {
        RemoteImage {
            is_video: true,
            ..image(name, 5000, checksum)
        }
    }

    fn record(path: &Path, size: u64, checksum: &str) -> LocalFileRecord {
        LocalFileRecord {
            path: path.to_path_buf(),
            modified: SystemTime::UNIX_EPOCH,
            size,
            checksum: checksum.to_string(),
        }
    }

    fn setup() -> (TempDir, PathResolver) {
        let dir = tempdir().unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        (dir, resolver)
    }

    fn snapshot(albums: Vec<RemoteAlbum>) -> RemoteCatalogSnapshot {
        RemoteCatalogSnapshot {
            albums,
            fetched_at: None,
        }
    }

    #[test]
    fn test_trip_album_plans_once_then_nothing() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "Trip", vec![image("beach.jpg", 1000, Some("abc123"))])]);
        let mut local = LocalFilesystemSnapshot::default();

        let plan = plan_downloads(&remote, &local, &resolver, VerifyMode::Size);
        let tasks: Vec<&DownloadTask> = plan.tasks().collect();
        assert_eq!(tasks.len(), 1);
        let target = resolver.root().join("Trip").join("beach.jpg");
        assert_eq!(tasks[0].target_path, target);
        assert_eq!(tasks[0].expected_checksum.as_deref(), Some("abc123"));

        // What a successful download records.
        local.insert(record(&target, 1000, "abc123"));

        let plan = plan_downloads(&remote, &local, &resolver, VerifyMode::Checksum);
        assert!(plan.is_empty());
        assert_eq!(plan.albums[0].present, 1);
    }

    #[test]
    fn test_planning_is_idempotent_after_downloads() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![
            album(1, "Trip", vec![image("a.jpg", 10, Some("aa")), image("b.jpg", 20, None)]),
            album(2, "Home", vec![image("c.jpg", 30, Some("cc")), video("d.mp4", None)]),
        ]);
        let mut local = LocalFilesystemSnapshot::default();

        let first = plan_downloads(&remote, &local, &resolver, VerifyMode::Size);
        assert_eq!(first.task_count(), 3);
        for task in first.tasks() {
            let checksum = task.expected_checksum.clone().unwrap_or_else(|| "computed".to_string());
            local.insert(record(&task.target_path, task.size_bytes, &checksum));
        }

        let second = plan_downloads(&remote, &local, &resolver, VerifyMode::Size);
        assert!(second.is_empty());
        assert_eq!(second.albums[1].videos_skipped, 1);
    }

    #[test]
    fn test_wrong_size_is_requeued() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "Trip", vec![image("beach.jpg", 1000, Some("abc123"))])]);
        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&resolver.root().join("Trip").join("beach.jpg"), 999, "abc123"));

        let plan = plan_downloads(&remote, &local, &resolver, VerifyMode::Size);
        assert_eq!(plan.task_count(), 1);
        assert_eq!(plan.albums[0].mismatched, 1);
    }

    #[test]
    fn test_checksum_mode_catches_same_size_corruption() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "Trip", vec![
            image("beach.jpg", 1000, Some("abc123")),
            image("anon.jpg", 50, None),
        ])]);
        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&resolver.root().join("Trip").join("beach.jpg"), 1000, "ffffff"));
        local.insert(record(&resolver.root().join("Trip").join("anon.jpg"), 50, "whatever"));

        let size_only = plan_downloads(&remote, &local, &resolver, VerifyMode::Size);
        assert!(size_only.is_empty());

        let strict = plan_downloads(&remote, &local, &resolver, VerifyMode::Checksum);
        let tasks: Vec<&DownloadTask> = strict.tasks().collect();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].target_path.ends_with("beach.jpg"));
    }

    #[test]
    fn test_videos_never_planned_or_corrupted() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "Trip", vec![video("clip.mp4", Some("abc123"))])]);
        let clip = resolver.root().join("Trip").join("clip.mp4");

        let plan = plan_downloads(&remote, &LocalFilesystemSnapshot::default(), &resolver, VerifyMode::Checksum);
        assert!(plan.is_empty());
        assert_eq!(plan.albums[0].videos_skipped, 1);

        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&clip, 12, "not-the-remote-sum"));
        let report = classify(&remote, &local, &resolver);
        assert!(report.is_clean());
    }

    #[test]
    fn test_duplicate_target_paths_keep_first() {
        let (_dir, resolver) = setup();
        let mut second = image("beach.jpg", 2000, Some("other"));
        second.original_url = "https://photos.example/second".to_string();
        let remote = snapshot(vec![album(1, "Trip", vec![image("beach.jpg", 1000, Some("abc123")), second])]);

        let plan = plan_downloads(&remote, &LocalFilesystemSnapshot::default(), &resolver, VerifyMode::Size);
        let tasks: Vec<&DownloadTask> = plan.tasks().collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].size_bytes, 1000);
    }

    #[test]
    fn test_checksum_match_beats_path_match() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "B", vec![image("img.jpg", 10, Some("x"))])]);
        let a = resolver.root().join("A").join("img.jpg");
        let b = resolver.root().join("B").join("img.jpg");

        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&a, 10, "x"));
        local.insert(record(&b, 10, "y"));

        let report = classify(&remote, &local, &resolver);
        assert_eq!(
            report.misplaced,
            vec![Misplaced {
                path: a.clone(),
                expected: b.clone()
            }]
        );
        assert_eq!(report.corrupted, vec![b]);
        assert!(report.missing_locally.is_empty());
        assert!(report.orphaned.is_empty());
    }

    #[test]
    fn test_classes_partition_local_files() {
        let (_dir, resolver) = setup();
        let root = resolver.root().to_path_buf();
        let remote = snapshot(vec![
            album(1, "Trip", vec![
                image("ok.jpg", 1, Some("ok")),
                image("bad.jpg", 1, Some("good")),
                image("moved.jpg", 1, Some("moved")),
                image("gone.jpg", 1, Some("gone")),
                image("anon.jpg", 1, None),
                video("clip.mp4", None),
            ]),
        ]);

        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&root.join("Trip").join("ok.jpg"), 1, "ok"));
        local.insert(record(&root.join("Trip").join("bad.jpg"), 1, "rotten"));
        local.insert(record(&root.join("Elsewhere").join("moved.jpg"), 1, "moved"));
        local.insert(record(&root.join("Trip").join("anon.jpg"), 1, "anything"));
        local.insert(record(&root.join("stray.txt"), 1, "stray"));

        let report = classify(&remote, &local, &resolver);

        assert_eq!(report.corrupted, vec![root.join("Trip").join("bad.jpg")]);
        assert_eq!(report.misplaced.len(), 1);
        assert_eq!(report.misplaced[0].path, root.join("Elsewhere").join("moved.jpg"));
        assert_eq!(report.orphaned, vec![root.join("stray.txt")]);
        assert_eq!(
            report.missing_locally,
            vec![root.join("Trip").join("clip.mp4"), root.join("Trip").join("gone.jpg")]
        );
        assert_eq!(report.unverifiable, vec![root.join("Trip").join("anon.jpg")]);

        let mut flagged: Vec<&PathBuf> = report
            .corrupted
            .iter()
            .chain(report.orphaned.iter())
            .chain(report.misplaced.iter().map(|m| &m.path))
            .collect();
        let total = flagged.len();
        flagged.sort();
        flagged.dedup();
        assert_eq!(flagged.len(), total);
        for path in &report.missing_locally {
            assert!(local.get(path).is_none());
        }
    }

    #[test]
    fn test_mirrored_catalog_is_clean() {
        let (_dir, resolver) = setup();
        let remote = snapshot(vec![album(1, "Trip", vec![image("beach.jpg", 1000, Some("abc123"))])]);
        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(&resolver.root().join("Trip").join("beach.jpg"), 1000, "abc123"));

        let report = classify(&remote, &local, &resolver);
        assert!(report.is_clean());
        assert_eq!(report, DiscrepancyReport::default());
    }

    #[test]
    fn test_find_duplicates_pairs_with_first_path() {
        let mut local = LocalFilesystemSnapshot::default();
        local.insert(record(Path::new("/m/c.jpg"), 1, "same"));
        local.insert(record(Path::new("/m/a.jpg"), 1, "same"));
        local.insert(record(Path::new("/m/b.jpg"), 1, "same"));
        local.insert(record(Path::new("/m/unique.jpg"), 1, "unique"));

        assert_eq!(
            find_duplicates(&local),
            vec![
                (PathBuf::from("/m/a.jpg"), PathBuf::from("/m/b.jpg")),
                (PathBuf::from("/m/a.jpg"), PathBuf::from("/m/c.jpg")),
            ]
        );
        assert!(find_duplicates(&LocalFilesystemSnapshot::default()).is_empty());
    }
}
