//! Maps remote album metadata to the canonical local folder.

use std::path::{Path, PathBuf};

use crate::mirror::config_loader::{ConfigError, ConfigResult};
use crate::mirror::model::{RemoteAlbum, RemoteImage};

/// Resolves album and image locations under a mirror root that is known to exist.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Validates the mirror root once; every later resolution is pure.
    pub fn new(mirror_root: &Path) -> ConfigResult<Self> {
        if mirror_root.as_os_str().is_empty() {
            return Err(ConfigError::MirrorRootUnset);
        }
        if !mirror_root.is_dir() {
            return Err(ConfigError::MirrorRootMissing(mirror_root.to_path_buf()));
        }

        let root = std::path::absolute(mirror_root)
            .map_err(ConfigError::Io)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/[category]/[subcategory]/<title>`
    pub fn resolve(&self, album: &RemoteAlbum) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(category) = album.category.as_deref() {
            path.push(sanitize_component(category));
        }
        if let Some(subcategory) = album.subcategory.as_deref() {
            path.push(sanitize_component(subcategory));
        }
        path.push(sanitize_component(&album.title));
        path
    }

    pub fn image_path(&self, album: &RemoteAlbum, image: &RemoteImage) -> PathBuf {
        self.resolve(album).join(sanitize_component(&image.filename))
    }
}

/// Makes a single path component safe to join under the root.
///
/// Separators would nest folders and `..` would escape the mirror, so both
/// are neutralized. Everything else is kept as the service reports it.
fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match replaced.trim() {
        "" => "_".to_string(),
        "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => replaced,
    }
}
