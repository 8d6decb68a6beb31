//! JSON persistence for the two caches.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Error types for cache persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cache persistence
pub type StoreResult<T> = Result<T, StoreError>;

/// A snapshot persisted as pretty JSON at a fixed location.
///
/// Loading never fails: a missing, unreadable or corrupt file yields
/// `T::default()`, which the callers treat as a cold start.
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No cache at {}, starting cold", self.path.display());
                return T::default();
            }
            Err(err) => {
                warn!("Unable to read cache {}: {}. Starting cold.", self.path.display(), err);
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache {} is corrupt ({}). Starting cold.", self.path.display(), err);
                T::default()
            }
        }
    }

    /// Overwrites the cache. The new content is written next to the target
    /// and renamed over it, so a crash leaves either the old or the new file.
    pub fn save(&self, value: &T) -> StoreResult<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| self.io_error(source))?;

        let temp = NamedTempFile::new_in(&parent).map_err(|source| self.io_error(source))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush().map_err(|source| self.io_error(source))?;
        }
        temp.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;

        debug!("Saved cache {}", self.path.display());
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
