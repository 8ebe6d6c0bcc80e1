pub mod webhook;

use std::{io, path::Path};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use tokio::{fs, io::AsyncWriteExt};
use ucb_relay_core::{config::UnityConfig, models::BuildDetails, util::size};
use ucb_relay_pipeline::{BuildApi, RelayError};
use url::Url;

/// Report download progress roughly once per this many bytes.
const PROGRESS_INTERVAL: u64 = 8 * 1024 * 1024;

/// Authenticated client for the Unity Cloud Build REST API.
#[derive(Debug, Clone)]
pub struct UnityClient {
    client: reqwest::Client,
    api_base: Url,
    api_key: String,
}

impl UnityClient {
    pub fn new(config: &UnityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create Unity Cloud Build client")?;
        Ok(Self { client, api_base: config.api_base.clone(), api_key: config.api_key.clone() })
    }

    /// GET `<api_base><href>` with the account's Basic auth key and parse the
    /// build detail payload.
    pub async fn fetch_build_details(&self, href: &str) -> Result<BuildDetails, RelayError> {
        let url = self.api_base.join(href).map_err(|e| RelayError::Fetch {
            message: format!("invalid build API link {href}: {e}"),
        })?;
        tracing::info!("Fetching build details from {url}");
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Basic {}", self.api_key))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| RelayError::Fetch { message: e.to_string() })?;
        response
            .json::<BuildDetails>()
            .await
            .map_err(|e| RelayError::Fetch { message: format!("invalid build details: {e}") })
    }

    /// Stream a binary artifact to `dest`, deleting any stale file there
    /// first. The file is fully flushed before this resolves. No partial-file
    /// cleanup on failure; the invocation's scratch directory handles that.
    pub async fn download_to(&self, url: &Url, dest: &Path) -> Result<(), RelayError> {
        let download_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            RelayError::Download { url: url.to_string(), source }
        };

        match fs::remove_file(dest).await {
            Ok(()) => tracing::debug!("Deleted stale file {}", dest.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(download_err(e.into())),
        }

        tracing::info!("Downloading {} to {}", url, dest.display());
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| download_err(e.into()))?;
        let total = response.content_length();

        let mut file = fs::File::create(dest).await.map_err(|e| download_err(e.into()))?;
        let mut stream = response.bytes_stream();
        let mut progress = Progress::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(e.into()))?;
            file.write_all(&chunk).await.map_err(|e| download_err(e.into()))?;
            if progress.advance(chunk.len() as u64) {
                match total {
                    Some(total) => tracing::info!(
                        "Downloading {}: {} / {}",
                        dest.display(),
                        size(progress.written),
                        size(total)
                    ),
                    None => tracing::info!(
                        "Downloading {}: {}",
                        dest.display(),
                        size(progress.written)
                    ),
                }
            }
        }
        file.flush().await.map_err(|e| download_err(e.into()))?;
        tracing::info!("Downloaded {} ({})", dest.display(), size(progress.written));
        Ok(())
    }
}

#[async_trait]
impl BuildApi for UnityClient {
    async fn build_details(&self, href: &str) -> Result<BuildDetails, RelayError> {
        self.fetch_build_details(href).await
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<(), RelayError> {
        self.download_to(url, dest).await
    }
}

/// Cumulative download progress, reporting once per [`PROGRESS_INTERVAL`].
struct Progress {
    written: u64,
    next_report: u64,
}

impl Progress {
    fn new() -> Self { Self { written: 0, next_report: PROGRESS_INTERVAL } }

    /// Advance by `n` bytes. Returns true when a report interval was crossed
    /// and the caller should emit a progress event.
    fn advance(&mut self, n: u64) -> bool {
        self.written += n;
        if self.written < self.next_report {
            return false;
        }
        while self.written >= self.next_report {
            self.next_report += PROGRESS_INTERVAL;
        }
        true
    }
}
