//! MD5 helpers and the persisted local checksum cache.
//!
//! The remote catalog reports MD5 sums, so local content is hashed with the
//! same digest to make the two directly comparable.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::mirror::model::LocalFilesystemSnapshot;
use crate::mirror::store::{JsonStore, StoreResult};

/// File name of the checksum cache inside the cache directory.
pub const LOCAL_CACHE_NAME: &str = "localmd5.json";

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Hashes a file in fixed-size chunks so large videos don't have to fit in memory.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Normalizes a checksum reported by the service for comparison with local digests.
pub fn normalize(checksum: &str) -> Option<String> {
    let trimmed = checksum.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

/// On-disk mapping of path -> (mtime, size, checksum) reused across scans.
pub struct ChecksumCache {
    store: JsonStore<LocalFilesystemSnapshot>,
}

impl ChecksumCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            store: JsonStore::new(cache_dir.join(LOCAL_CACHE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Loads the previous scan; an absent or corrupt cache is an empty one.
    pub fn load(&self) -> LocalFilesystemSnapshot {
        self.store.load()
    }

    pub fn save(&self, snapshot: &LocalFilesystemSnapshot) -> StoreResult<()> {
        self.store.save(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_md5_known_vectors() {
        assert_eq!(md5_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_bytes(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_file_hash_matches_byte_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        // Spans several read buffers.
        let content: Vec<u8> = (0..(READ_BUFFER_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        assert_eq!(md5_file(&path).unwrap(), md5_bytes(&content));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" ABCDEF "), Some("abcdef".to_string()));
        assert_eq!(normalize("   "), None);
    }
}
