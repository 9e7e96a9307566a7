//! Fetching binaries from the build server.

use crate::bins::{Binary, BinarySet};
use crate::error::{HarnessError, HarnessResult};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Download behaviour
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Re-download binaries that are already present
    pub force: bool,
    /// Connect timeout for each request
    pub connect_timeout: Duration,
    /// Longest wait for the next piece of a response body
    pub read_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            force: false,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to one binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Fetched, with the number of bytes written
    Fetched(u64),
    /// Already present, left alone
    Cached,
}

/// Fetches binaries over HTTP
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    options: DownloadOptions,
}

impl Downloader {
    /// Build a downloader
    pub fn new(options: DownloadOptions) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self { client, options })
    }

    /// Download one binary into its directory and make it executable.
    ///
    /// The body is streamed to a temporary file next to the target which is renamed
    /// into place once complete, so an interrupted download never leaves a truncated
    /// executable behind.
    pub async fn fetch(&self, binary: &Binary) -> HarnessResult<DownloadOutcome> {
        let target = binary.path();
        if !self.options.force && is_present(&target).await {
            tracing::debug!("{} already present, skipping download", target.display());
            return Ok(DownloadOutcome::Cached);
        }

        tokio::fs::create_dir_all(binary.dir()).await?;
        tracing::info!("Downloading {} -> {}", binary.url(), target.display());

        let mut response = self.client.get(binary.url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::DownloadStatus {
                url: binary.url().to_string(),
                status: status.as_u16(),
            });
        }

        let partial = partial_path(binary);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        let copied: HarnessResult<()> = async {
            while let Some(chunk) = self.next_chunk(binary, &mut response).await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<(), HarnessError>(())
        }
        .await;
        drop(file);

        if let Err(e) = copied {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755)).await?;
        tokio::fs::rename(&partial, &target).await?;
        tracing::debug!(bytes = written, "Saved {}", target.display());
        Ok(DownloadOutcome::Fetched(written))
    }

    async fn next_chunk(
        &self,
        binary: &Binary,
        response: &mut reqwest::Response,
    ) -> HarnessResult<Option<bytes::Bytes>> {
        tokio::time::timeout(self.options.read_timeout, response.chunk())
            .await
            .map_err(|_| HarnessError::DownloadStalled {
                url: binary.url().to_string(),
                timeout: self.options.read_timeout,
            })?
            .map_err(HarnessError::from)
    }
}

async fn is_present(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn partial_path(binary: &Binary) -> PathBuf {
    binary.dir().join(format!(".{}.part", binary.name()))
}

/// Download every binary of a run, daemon and CLI first
pub async fn download_binaries(
    set: &BinarySet,
    options: DownloadOptions,
) -> HarnessResult<Vec<(Binary, DownloadOutcome)>> {
    let downloader = Downloader::new(options)?;
    let mut outcomes = Vec::new();
    for binary in set.all() {
        let outcome = downloader.fetch(binary).await?;
        outcomes.push((binary.clone(), outcome));
    }
    Ok(outcomes)
}
