//! Remote catalog access for SmugMug's JSON API 1.2.2.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::mirror::model::{RemoteAlbum, RemoteImage};
use crate::smugmug::connection_pool::{ConnectionPool, ConnectionPoolConfig, FetchError};
use crate::smugmug::entries::{
    AlbumEntry, AlbumsResponse, EMPTY_SET_CODE, ImageEntry, ImagesResponse, LoginResponse, StatusEntry,
};

pub(crate) mod connection_pool;
pub(crate) mod entries;

const API_URL: &str = "https://api.smugmug.com/services/api/json/1.2.2/";

/// Error types for catalog access
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    #[error("SmugMug API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for catalog access
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Source of album and image listings.
///
/// Whether checksums are populated depends on how the session was opened;
/// implementations report what the service gives them and never invent one.
pub trait CatalogProvider {
    async fn list_albums(&self, nickname: &str) -> CatalogResult<Vec<RemoteAlbum>>;

    async fn list_images(&self, album_id: u64, album_key: &str) -> CatalogResult<Vec<RemoteImage>>;
}

/// Session-holding client for the 1.2.2 API.
pub struct SmugMugClient {
    pool: ConnectionPool,
    api_key: String,
    session_id: Option<String>,
}

impl SmugMugClient {
    pub fn new(api_key: &str, pool_config: ConnectionPoolConfig) -> CatalogResult<Self> {
        Ok(Self {
            pool: ConnectionPool::with_config(pool_config)?,
            api_key: api_key.to_string(),
            session_id: None,
        })
    }

    /// Opens a session. With a password the session sees checksums,
    /// anonymously it only sees public listings.
    pub async fn login(&mut self, email: &str, password: Option<&str>) -> CatalogResult<()> {
        let response: Option<LoginResponse> = match password {
            Some(password) => {
                debug!("Logging in as {}", email);
                self.call("smugmug.login.withPassword", &[("EmailAddress", email), ("Password", password)])
                    .await?
            }
            None => {
                debug!("Logging in anonymously");
                self.call("smugmug.login.anonymously", &[]).await?
            }
        };

        let session = response.ok_or_else(|| CatalogError::Api {
            code: EMPTY_SET_CODE,
            message: "login returned no session".to_string(),
        })?;
        trace!("Session id: {}", "*".repeat(session.login.session.id.len()));
        self.session_id = Some(session.login.session.id);

        info!(
            "Logged in to SmugMug ({})",
            if password.is_some() { "with password" } else { "anonymously" }
        );
        Ok(())
    }

    /// A transport for original downloads, carrying the session cookie when logged in.
    pub fn download_pool(&self) -> CatalogResult<ConnectionPool> {
        match &self.session_id {
            Some(session_id) => Ok(self.pool.with_session(session_id)?),
            None => Ok(self.pool.clone()),
        }
    }

    /// Calls an API method. `None` means the service reported an empty set.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> CatalogResult<Option<T>> {
        let mut query: Vec<(&str, &str)> = vec![("method", method), ("APIKey", self.api_key.as_str())];
        if let Some(session_id) = &self.session_id {
            query.push(("SessionID", session_id.as_str()));
        }
        query.extend_from_slice(params);

        trace!("Calling {}", method);
        let value: Value = self.pool.get_json(API_URL, &query).await?;
        decode_response(value)
    }
}

impl CatalogProvider for SmugMugClient {
    async fn list_albums(&self, nickname: &str) -> CatalogResult<Vec<RemoteAlbum>> {
        let response: Option<AlbumsResponse> = self
            .call("smugmug.albums.get", &[("NickName", nickname), ("Heavy", "1")])
            .await?;

        Ok(response
            .unwrap_or_default()
            .albums
            .into_iter()
            .map(AlbumEntry::into_album)
            .collect())
    }

    async fn list_images(&self, album_id: u64, album_key: &str) -> CatalogResult<Vec<RemoteImage>> {
        let album_id = album_id.to_string();
        let response: Option<ImagesResponse> = self
            .call(
                "smugmug.images.get",
                &[("AlbumID", album_id.as_str()), ("AlbumKey", album_key), ("Heavy", "1")],
            )
            .await?;

        Ok(response
            .unwrap_or_default()
            .album
            .images
            .into_iter()
            .map(ImageEntry::into_image)
            .collect())
    }
}

/// Checks the status envelope and decodes the body.
fn decode_response<T: DeserializeOwned>(value: Value) -> CatalogResult<Option<T>> {
    let status = StatusEntry::deserialize(&value)?;
    if status.is_ok() {
        return Ok(Some(T::deserialize(value)?));
    }

    match status.code {
        Some(EMPTY_SET_CODE) => Ok(None),
        code => Err(CatalogError::Api {
            code: code.unwrap_or_default(),
            message: status.message.unwrap_or_else(|| "unknown error".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_set_is_none() {
        let value = json!({"stat": "fail", "code": 15, "message": "empty set"});
        let decoded: Option<AlbumsResponse> = decode_response(value).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_other_failures_are_errors() {
        let value = json!({"stat": "fail", "code": 18, "message": "invalid API key"});
        let decoded = decode_response::<AlbumsResponse>(value);
        assert!(matches!(decoded, Err(CatalogError::Api { code: 18, .. })));
    }

    #[test]
    fn test_login_session_decodes() {
        let value = json!({"stat": "ok", "method": "smugmug.login.anonymously",
                           "Login": {"Session": {"id": "s3ss10n"}}});
        let decoded: Option<LoginResponse> = decode_response(value).unwrap();
        assert_eq!(decoded.unwrap().login.session.id, "s3ss10n");
    }
}
