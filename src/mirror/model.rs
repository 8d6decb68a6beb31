//! Snapshot types shared by the caches, the scanner and the reconciliation engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single image (or video) as listed by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImage {
    pub filename: String,
    pub original_url: String,
    pub size_bytes: u64,
    /// Lowercase hex MD5. Absent for anonymous sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub is_video: bool,
}

impl RemoteImage {
    /// What a local copy of this image is expected to hash to.
    pub fn expected_checksum(&self) -> ExpectedChecksum {
        if self.is_video {
            ExpectedChecksum::Skipped
        } else {
            match &self.checksum {
                Some(sum) => ExpectedChecksum::Known(sum.clone()),
                None => ExpectedChecksum::Unknown,
            }
        }
    }
}

/// An album and its image listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAlbum {
    pub id: u64,
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Compared verbatim against the previous snapshot to decide whether the
    /// image listing has to be fetched again.
    pub last_updated: String,
    #[serde(default)]
    pub images: Vec<RemoteImage>,
}

/// The remote catalog as of the last refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCatalogSnapshot {
    #[serde(default)]
    pub albums: Vec<RemoteAlbum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl RemoteCatalogSnapshot {
    pub fn album(&self, id: u64) -> Option<&RemoteAlbum> {
        self.albums.iter().find(|album| album.id == id)
    }

    pub fn image_count(&self) -> usize {
        self.albums.iter().map(|album| album.images.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }
}

/// One regular file found under the mirror root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileRecord {
    pub path: PathBuf,
    #[serde(with = "unix_time")]
    pub modified: SystemTime,
    pub size: u64,
    pub checksum: String,
}

/// Every file under the mirror root, keyed by absolute path.
///
/// This is also the on-disk checksum cache: a record is reused by the next
/// scan as long as the file's modification time has not changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFilesystemSnapshot {
    #[serde(default)]
    pub files: BTreeMap<PathBuf, LocalFileRecord>,
}

impl LocalFilesystemSnapshot {
    pub fn get(&self, path: &Path) -> Option<&LocalFileRecord> {
        self.files.get(path)
    }

    pub fn insert(&mut self, record: LocalFileRecord) {
        self.files.insert(record.path.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &LocalFileRecord> {
        self.files.values()
    }
}

/// Checksum a local file is verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedChecksum {
    Known(String),
    /// The catalog did not report a checksum (anonymous access).
    Unknown,
    /// Videos: the service does not expose a verifiable original.
    Skipped,
}

/// Modification times as signed seconds plus nanoseconds since the epoch,
/// so files stamped before 1970 round-trip through the cache.
///
/// Field names match serde's own `SystemTime` encoding, so caches written
/// with it still load.
mod unix_time {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const NANOS_PER_SEC: u32 = 1_000_000_000;

    #[derive(Serialize, Deserialize)]
    struct UnixTime {
        secs_since_epoch: i64,
        nanos_since_epoch: u32,
    }

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let stamp = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => UnixTime {
                secs_since_epoch: i64::try_from(after.as_secs()).map_err(serde::ser::Error::custom)?,
                nanos_since_epoch: after.subsec_nanos(),
            },
            Err(err) => {
                let before = err.duration();
                let secs = i64::try_from(before.as_secs()).map_err(serde::ser::Error::custom)?;
                // Nanoseconds stay positive: -1.25s is stored as -2s + 0.75s.
                match before.subsec_nanos() {
                    0 => UnixTime {
                        secs_since_epoch: -secs,
                        nanos_since_epoch: 0,
                    },
                    nanos => UnixTime {
                        secs_since_epoch: -secs - 1,
                        nanos_since_epoch: NANOS_PER_SEC - nanos,
                    },
                }
            }
        };
        stamp.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let stamp = UnixTime::deserialize(deserializer)?;
        if stamp.nanos_since_epoch >= NANOS_PER_SEC {
            return Err(serde::de::Error::custom("nanos_since_epoch out of range"));
        }

        let nanos = Duration::from_nanos(u64::from(stamp.nanos_since_epoch));
        let time = if stamp.secs_since_epoch >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(stamp.secs_since_epoch.unsigned_abs()))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_secs(stamp.secs_since_epoch.unsigned_abs()))
        };
        time.and_then(|time| time.checked_add(nanos))
            .ok_or_else(|| serde::de::Error::custom("modification time out of range"))
    }
}
