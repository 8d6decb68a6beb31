//! Raw JSON shapes returned by the SmugMug 1.2.2 API and their conversion
//! into the typed catalog records.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::mirror::checksum;
use crate::mirror::model::{RemoteAlbum, RemoteImage};

/// Fields that mark an image entry as a video. Their presence alone counts.
pub(crate) const VIDEO_KEYS: [&str; 7] = [
    "Video320URL",
    "Video640URL",
    "Video960URL",
    "Video1280URL",
    "Video1920URL",
    "VideoSMILURL",
    "VideoStreamingURL",
];

/// The service answers "fail" with this code when a listing is empty.
pub(crate) const EMPTY_SET_CODE: i64 = 15;

/// Status fields present on every response.
#[derive(Deserialize, Debug)]
pub(crate) struct StatusEntry {
    pub stat: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusEntry {
    pub fn is_ok(&self) -> bool {
        self.stat == "ok"
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct LoginResponse {
    #[serde(rename = "Login")]
    pub login: LoginEntry,
}

#[derive(Deserialize, Debug)]
pub(crate) struct LoginEntry {
    #[serde(rename = "Session")]
    pub session: SessionEntry,
}

#[derive(Deserialize, Debug)]
pub(crate) struct SessionEntry {
    pub id: String,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct AlbumsResponse {
    #[serde(rename = "Albums", default)]
    pub albums: Vec<AlbumEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct NamedEntry {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct AlbumEntry {
    pub id: u64,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Category", default)]
    pub category: Option<NamedEntry>,
    #[serde(rename = "SubCategory", default)]
    pub subcategory: Option<NamedEntry>,
    #[serde(rename = "LastUpdated", default)]
    pub last_updated: String,
}

impl AlbumEntry {
    /// The typed album, without its images.
    pub fn into_album(self) -> RemoteAlbum {
        RemoteAlbum {
            id: self.id,
            key: self.key,
            title: self.title,
            category: self.category.map(|c| c.name).filter(|name| !name.is_empty()),
            subcategory: self.subcategory.map(|c| c.name).filter(|name| !name.is_empty()),
            last_updated: self.last_updated,
            images: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ImagesResponse {
    #[serde(rename = "Album", default)]
    pub album: ImageListEntry,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ImageListEntry {
    #[serde(rename = "Images", default)]
    pub images: Vec<ImageEntry>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ImageEntry {
    #[serde(rename = "FileName", default)]
    pub file_name: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "MD5Sum", default)]
    pub md5_sum: Option<String>,
    #[serde(rename = "OriginalURL", default)]
    pub original_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageEntry {
    pub fn is_video(&self) -> bool {
        VIDEO_KEYS.iter().any(|key| self.extra.contains_key(*key))
    }

    /// An absent `OriginalURL` becomes an empty URL; the planner reports
    /// such images as unavailable instead of queuing them.
    pub fn into_image(self) -> RemoteImage {
        let is_video = self.is_video();
        RemoteImage {
            filename: self.file_name,
            original_url: self.original_url.unwrap_or_default(),
            size_bytes: self.size,
            checksum: self.md5_sum.as_deref().and_then(checksum::normalize),
            is_video,
        }
    }
}
