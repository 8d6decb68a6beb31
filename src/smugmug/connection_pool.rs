//! Shared HTTP client for API calls and image downloads.

use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::mirror::config_loader::Download;

/// Errors raised by the transport for a single request.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Never carries the URL: API calls put the key and password in the query.
    #[error("Request error: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("Invalid session cookie: {0}")]
    InvalidCookie(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Request(err.without_url())
    }
}

/// Result type for transport operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Anything that can fetch a URL's full body.
pub trait HttpFetch {
    async fn get(&self, url: &str) -> FetchResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    /// Maximum number of idle connections per host
    pub max_idle_per_host: usize,
    /// How long to keep idle connections alive
    pub idle_timeout: Duration,
    /// Connection timeout for new connections
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Attempts per request, including the first one
    pub retry_attempts: usize,
    /// Base delay for the exponential backoff between attempts
    pub base_retry_delay_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            retry_attempts: 3,
            base_retry_delay_ms: 1000,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ConnectionPoolConfig {
    pub fn from_download(download: &Download) -> Self {
        Self {
            max_idle_per_host: download.concurrency.max(8),
            request_timeout: Duration::from_secs(download.timeout_secs),
            retry_attempts: download.retry_attempts,
            base_retry_delay_ms: download.retry_backoff_ms,
            ..Self::default()
        }
    }
}

/// Pooled reqwest client with a bounded retry policy.
///
/// Retries only cover what the transport can know is transient: connection
/// failures, timeouts, 429 and 5xx. Anything else is returned to the caller
/// on the first attempt.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    client: Client,
    config: ConnectionPoolConfig,
}

impl ConnectionPool {
    pub fn with_config(config: ConnectionPoolConfig) -> FetchResult<Self> {
        let client = Self::build_client(&config, HeaderMap::new())?;
        Ok(Self { client, config })
    }

    /// Returns a pool whose requests carry the service's session cookie.
    pub fn with_session(&self, session_id: &str) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        let cookie = HeaderValue::from_str(&format!("SMSESS={}", session_id))
            .map_err(|e| FetchError::InvalidCookie(e.to_string()))?;
        headers.insert(COOKIE, cookie);

        let client = Self::build_client(&self.config, headers)?;
        Ok(Self {
            client,
            config: self.config.clone(),
        })
    }

    fn build_client(config: &ConnectionPoolConfig, headers: HeaderMap) -> FetchResult<Client> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Some(config.idle_timeout))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .gzip(true)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        debug!(
            "Initialized HTTP client: {} max idle per host, {}s timeout",
            config.max_idle_per_host,
            config.request_timeout.as_secs()
        );
        Ok(client)
    }

    /// GET with query parameters, decoding the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> FetchResult<T> {
        let response = self.send_with_retry(url, query).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_with_retry(&self, url: &str, query: &[(&str, &str)]) -> FetchResult<reqwest::Response> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            if attempts > 1 {
                info!("Retry attempt {}/{} for {}", attempts, self.config.retry_attempts, url);
            }

            let response = match self.client.get(url).query(query).send().await {
                Ok(response) => response,
                Err(e) => {
                    let e = e.without_url();
                    warn!("Request error: {}", e);
                    if attempts >= self.config.retry_attempts || !(e.is_connect() || e.is_timeout()) {
                        return Err(FetchError::Request(e));
                    }
                    self.back_off(attempts).await;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            warn!("HTTP error {} for {}", status, url);
            if !transient || attempts >= self.config.retry_attempts {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }
            self.back_off(attempts).await;
        }
    }

    async fn back_off(&self, attempt: usize) {
        let backoff = calculate_backoff(attempt, self.config.base_retry_delay_ms);
        info!("Backing off for {}ms before retry", backoff);
        sleep(Duration::from_millis(backoff)).await;
    }
}

impl HttpFetch for ConnectionPool {
    async fn get(&self, url: &str) -> FetchResult<Vec<u8>> {
        let response = self.send_with_retry(url, &[]).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Exponential backoff, capped at one minute.
fn calculate_backoff(attempt: usize, base_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let max_delay = 60_000;

    let delay = (1u64 << exponent).saturating_mul(base_delay_ms);
    std::cmp::min(delay, max_delay)
}
