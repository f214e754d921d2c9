mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use crate::config::FetcherSection;

pub use error::{FetchError, FetchResult};

/// A downloaded asset on local disk. Removal is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub bytes: u64,
}

#[async_trait(?Send)]
pub trait AssetFetch {
    /// Streams `source_url` into `destination`. A failed transfer may leave a
    /// partially written file behind.
    async fn fetch(&self, source_url: &str, destination: &Path) -> FetchResult<LocalAsset>;
}

#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: Client,
    transfer_timeout: Duration,
    stall_timeout: Duration,
}

impl HttpAssetFetcher {
    pub fn new(config: &FetcherSection) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.stall_timeout_seconds.max(1)))
            .build()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(Self {
            client,
            transfer_timeout: Duration::from_secs(config.transfer_timeout_seconds),
            stall_timeout: Duration::from_secs(config.stall_timeout_seconds),
        })
    }

    pub fn with_timeouts(mut self, transfer: Duration, stall: Duration) -> Self {
        self.transfer_timeout = transfer;
        self.stall_timeout = stall;
        self
    }

    async fn transfer(&self, url: &Url, destination: &Path) -> FetchResult<u64> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| FetchError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        if url.scheme() == "file" {
            let source_path = url.to_file_path().map_err(|_| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".into(),
            })?;
            return fs::copy(&source_path, destination)
                .await
                .map_err(|source| FetchError::Io {
                    path: source_path,
                    source,
                });
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.classify(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(destination)
            .await
            .map_err(|source| FetchError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        let mut written = 0u64;
        loop {
            let next = timeout(self.stall_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout(self.stall_timeout))?;
            let Some(chunk) = next else { break };
            let data = chunk.map_err(|err| self.classify(err))?;
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            written += data.len() as u64;
            debug!(bytes = written, "asset chunk written");
        }
        file.flush().await.map_err(|source| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        Ok(written)
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.stall_timeout)
        } else {
            FetchError::from(err)
        }
    }
}

#[async_trait(?Send)]
impl AssetFetch for HttpAssetFetcher {
    async fn fetch(&self, source_url: &str, destination: &Path) -> FetchResult<LocalAsset> {
        let url = Url::parse(source_url).map_err(|err| FetchError::InvalidUrl {
            url: source_url.to_string(),
            reason: err.to_string(),
        })?;
        info!(url = %url, destination = %destination.display(), "fetching asset");
        let bytes = timeout(self.transfer_timeout, self.transfer(&url, destination))
            .await
            .map_err(|_| FetchError::Timeout(self.transfer_timeout))??;
        info!(bytes, destination = %destination.display(), "asset stored");
        Ok(LocalAsset {
            path: destination.to_path_buf(),
            bytes,
        })
    }
}
