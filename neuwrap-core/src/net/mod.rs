//! HTTP fetching with manual redirect handling and streaming downloads.
//!
//! Redirects are followed by hand so the hop count is bounded and every
//! hop is validated against the same URL policy as the initial request.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Maximum redirects followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Timeout for small API requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for artifact downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Hosts runtime artifacts are served from (subdomains included).
const ALLOWED_DOMAINS: &[&str] = &["github.com", "githubusercontent.com"];

/// Fetches small payloads and streams large ones to disk.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body. Uses the metadata timeout.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// GET `url` and stream the body into `dest`. Uses the download timeout.
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

// ============================================================================
// Download Progress
// ============================================================================

/// Progress information during a download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// Progress percentage (0.0 to 100.0), or None if total is unknown.
    pub percent: Option<f32>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

// ============================================================================
// HTTP Fetcher
// ============================================================================

/// [`Fetcher`] backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    metadata_timeout: Duration,
    download_timeout: Duration,
    restricted: bool,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("metadata_timeout", &self.metadata_timeout)
            .field("download_timeout", &self.download_timeout)
            .field("restricted", &self.restricted)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// HTTPS-only fetcher limited to the GitHub release hosts.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(concat!("neuwrap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| Error::Network {
                url: String::new(),
                source,
            })?;

        Ok(Self::with_client(client))
    }

    /// Wraps a prebuilt client. The client must not follow redirects itself
    /// (`Policy::none()`), or the hop limit is bypassed.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            metadata_timeout: METADATA_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
            restricted: true,
            progress: None,
        }
    }

    /// Lifts the scheme and host restrictions (plain HTTP, any host).
    pub fn unrestricted(mut self) -> Self {
        self.restricted = false;
        self
    }

    pub fn with_timeouts(mut self, metadata: Duration, download: Duration) -> Self {
        self.metadata_timeout = metadata;
        self.download_timeout = download;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    fn validate_url(&self, url: &Url) -> Result<()> {
        if !self.restricted {
            return match url.scheme() {
                "http" | "https" => Ok(()),
                other => Err(invalid(url.as_str(), format!("unsupported scheme {}", other))),
            };
        }

        if url.scheme() != "https" {
            return Err(invalid(url.as_str(), "URL must use HTTPS"));
        }

        let host = url
            .host_str()
            .ok_or_else(|| invalid(url.as_str(), "URL must have a host"))?;

        let is_allowed = ALLOWED_DOMAINS
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));

        if !is_allowed {
            return Err(invalid(
                url.as_str(),
                format!("download domain not allowed: {}", host),
            ));
        }

        Ok(())
    }

    /// Sends a GET, following redirects up to [`MAX_REDIRECTS`] hops.
    async fn get_following(&self, url: &str, timeout: Duration) -> Result<Response> {
        let mut current = Url::parse(url).map_err(|e| invalid(url, e.to_string()))?;
        self.validate_url(&current)?;

        for hop in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| request_error(current.as_str(), e))?;

            let status = response.status();
            if is_redirect(status) {
                if hop == MAX_REDIRECTS {
                    return Err(Error::TooManyRedirects {
                        url: url.to_string(),
                    });
                }

                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::UnexpectedStatus {
                        code: status.as_u16(),
                        url: current.to_string(),
                    })?;

                let next = current
                    .join(location)
                    .map_err(|e| invalid(location, e.to_string()))?;
                self.validate_url(&next)?;

                debug!(hop = hop + 1, from = %current, to = %next, "Following redirect");
                current = next;
                continue;
            }

            if status != StatusCode::OK {
                return Err(Error::UnexpectedStatus {
                    code: status.as_u16(),
                    url: current.to_string(),
                });
            }

            return Ok(response);
        }

        Err(Error::TooManyRedirects {
            url: url.to_string(),
        })
    }

    async fn stream_to_file(&self, url: &str, response: Response, dest: &Path) -> Result<u64> {
        let total_bytes = response.content_length();
        debug!("Content-Length: {:?}", total_bytes);

        let mut file = File::create(dest)
            .await
            .map_err(|e| Error::io(format!("failed to create {}", dest.display()), e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;
        self.report(DownloadProgress::new(0, total_bytes));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(format!("failed to write {}", dest.display()), e))?;

            bytes_downloaded += chunk.len() as u64;
            self.report(DownloadProgress::new(bytes_downloaded, total_bytes));
        }

        file.flush()
            .await
            .map_err(|e| Error::io(format!("failed to flush {}", dest.display()), e))?;

        Ok(bytes_downloaded)
    }

    fn report(&self, progress: DownloadProgress) {
        if let Some(cb) = &self.progress {
            cb(progress);
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);
        let response = self.get_following(url, self.metadata_timeout).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| request_error(url, e))?;
        Ok(body.to_vec())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }

        let response = self.get_following(url, self.download_timeout).await?;

        match self.stream_to_file(url, response, dest).await {
            Ok(bytes) => {
                info!(
                    "Download complete: {} bytes written to {}",
                    bytes,
                    dest.display()
                );
                Ok(bytes)
            }
            Err(e) => {
                // Don't leave a truncated archive behind
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn request_error(url: &str, source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::NetworkTimeout {
            url: url.to_string(),
        }
    } else {
        Error::Network {
            url: url.to_string(),
            source,
        }
    }
}

fn invalid(url: &str, reason: impl Into<String>) -> Error {
    Error::InvalidUrl {
        url: url.to_string(),
        reason: reason.into(),
    }
}
