//! Persisted remote catalog with incremental refresh.
//!
//! One album listing call per refresh; image listings are only fetched for
//! albums whose `last_updated` changed since the previous snapshot.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mirror::model::{RemoteAlbum, RemoteCatalogSnapshot};
use crate::mirror::store::{JsonStore, StoreError};
use crate::smugmug::{CatalogError, CatalogProvider};
use crate::tui::{COUNT_TEMPLATE, progress_bar};

/// File name of the remote catalog cache inside the cache directory.
pub const REMOTE_CACHE_NAME: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Unable to list albums: {0}")]
    AlbumList(#[from] CatalogError),

    #[error("Unable to persist the catalog cache: {0}")]
    Store(#[from] StoreError),
}

pub type RefreshResult<T> = Result<T, RefreshError>;

/// Counters reported after a refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub albums: usize,
    /// Albums whose image listing was requested.
    pub fetched: usize,
    /// Albums whose images were copied from the previous snapshot.
    pub reused: usize,
    /// Image listings that failed; see the warnings for which.
    pub failed: usize,
    /// Albums present before and gone now.
    pub dropped: usize,
}

pub struct RemoteCatalogCache {
    store: JsonStore<RemoteCatalogSnapshot>,
}

impl RemoteCatalogCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            store: JsonStore::new(cache_dir.join(REMOTE_CACHE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn load(&self) -> RemoteCatalogSnapshot {
        self.store.load()
    }

    /// Builds a new snapshot from the provider, reusing `previous` where it is
    /// still current, and overwrites the cache with it.
    ///
    /// A failed album listing aborts; a failed image listing only affects that
    /// album. The album keeps its previous images when it had any, otherwise it
    /// is stored with no images and an empty `last_updated` so the next
    /// refresh asks again.
    pub async fn refresh<P: CatalogProvider>(
        &self,
        provider: &P,
        nickname: &str,
        previous: &RemoteCatalogSnapshot,
    ) -> RefreshResult<(RemoteCatalogSnapshot, RefreshStats)> {
        let listed = provider.list_albums(nickname).await?;
        info!("Found {} albums for {}", listed.len(), nickname);

        let previous_by_id: HashMap<u64, &RemoteAlbum> =
            previous.albums.iter().map(|album| (album.id, album)).collect();

        let mut stats = RefreshStats::default();
        let mut seen: HashSet<u64> = HashSet::with_capacity(listed.len());
        let mut albums = Vec::with_capacity(listed.len());
        let progress = progress_bar(listed.len() as u64, COUNT_TEMPLATE, "Caching albums");

        for mut album in listed {
            progress.inc(1);
            if !seen.insert(album.id) {
                warn!("Album {} (\"{}\") listed twice; keeping the first", album.id, album.title);
                continue;
            }

            match previous_by_id.get(&album.id) {
                Some(old) if !old.last_updated.is_empty() && old.last_updated == album.last_updated => {
                    debug!("Album \"{}\" unchanged since {}", album.title, album.last_updated);
                    album.images = old.images.clone();
                    stats.reused += 1;
                }
                old => {
                    stats.fetched += 1;
                    match provider.list_images(album.id, &album.key).await {
                        Ok(images) => {
                            debug!("Fetched {} images for \"{}\"", images.len(), album.title);
                            album.images = images;
                        }
                        Err(err) => {
                            stats.failed += 1;
                            match old {
                                Some(old) => {
                                    warn!(
                                        "Unable to list images for \"{}\": {}. Keeping the cached listing.",
                                        album.title, err
                                    );
                                    album = (*old).clone();
                                }
                                None => {
                                    warn!(
                                        "Unable to list images for \"{}\": {}. It will be retried next refresh.",
                                        album.title, err
                                    );
                                    album.last_updated.clear();
                                }
                            }
                        }
                    }
                }
            }
            albums.push(album);
        }
        progress.finish_and_clear();

        for old in &previous.albums {
            if !seen.contains(&old.id) {
                debug!("Album \"{}\" no longer listed; dropping it", old.title);
                stats.dropped += 1;
            }
        }

        stats.albums = albums.len();
        let snapshot = RemoteCatalogSnapshot {
            albums,
            fetched_at: Some(Utc::now()),
        };
        self.store.save(&snapshot)?;

        info!(
            "Cached {} albums ({} fetched, {} unchanged, {} failed, {} dropped)",
            stats.albums, stats.fetched, stats.reused, stats.failed, stats.dropped
        );
        Ok((snapshot, stats))
    }
}
