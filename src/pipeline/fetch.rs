//! Package retrieval: stream one archive from the primary or fallback endpoint
//! into the entry's temp directory.
//!
//! Packages run from a few kilobytes to several gigabytes, so the body is
//! written chunk by chunk as it arrives and never held in memory whole.
//!
//! ## Size guard
//!
//! When a byte ceiling is configured, each endpoint gets a `HEAD` first. A
//! declared `Content-Length` over the ceiling fails the entry immediately
//! with [`RetrievalError::TooLarge`]; another mirror would serve the same
//! file. A missing or unparsable length disables the pre-flight check for
//! that endpoint, and the ceiling is then enforced on the bytes actually
//! streamed.

use crate::config::HarvestConfig;
use crate::error::{HarvestError, RetrievalError};
use crate::manifest::ManifestEntry;
use crate::pipeline::normalize::is_safe_component;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("pmc-captions/", env!("CARGO_PKG_VERSION"));

/// Why a single endpoint attempt stopped.
enum AttemptError {
    /// Worth trying the next endpoint.
    Endpoint(String),
    /// Ends retrieval for this entry regardless of remaining endpoints.
    Final(RetrievalError),
}

/// Downloads packages with primary → fallback substitution.
#[derive(Debug, Clone)]
pub struct Retriever {
    client: Client,
    primary_base: String,
    fallback_base: Option<String>,
    archive_extension: String,
    max_bytes: Option<u64>,
    download_timeout: Duration,
    head_timeout: Duration,
}

impl Retriever {
    pub fn new(config: &HarvestConfig) -> Result<Self, HarvestError> {
        // Timeouts bound the connect and each read, not the whole transfer.
        let download_timeout = Duration::from_secs(config.download_timeout_secs);
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(download_timeout)
            .read_timeout(download_timeout)
            .build()
            .map_err(|e| HarvestError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            primary_base: config.primary_base.clone(),
            fallback_base: config.fallback_base.clone(),
            archive_extension: config.archive_extension.clone(),
            max_bytes: config.max_archive_bytes,
            download_timeout,
            head_timeout: Duration::from_secs(config.head_timeout_secs),
        })
    }

    /// Download `entry`'s package into `dest_dir` and return the file path.
    ///
    /// The file is named `<pmcid><archive extension>`, or `package<ext>` when the
    /// pmcid is not a plain file name. A partial file from a
    /// failed primary attempt is overwritten by the fallback attempt.
    pub async fn fetch(
        &self,
        entry: &ManifestEntry,
        dest_dir: &Path,
    ) -> Result<PathBuf, RetrievalError> {
        let stem = if is_safe_component(&entry.pmcid) {
            entry.pmcid.as_str()
        } else {
            "package"
        };
        let dest = dest_dir.join(format!("{stem}{}", self.archive_extension));

        let primary_url = package_url(&self.primary_base, &entry.path, &self.archive_extension);
        let primary_err = match self.attempt(&primary_url, &dest).await {
            Ok(bytes) => {
                debug!("Fetched {} ({} bytes)", primary_url, bytes);
                return Ok(dest);
            }
            Err(AttemptError::Final(e)) => return Err(e),
            Err(AttemptError::Endpoint(reason)) => reason,
        };

        let Some(ref fallback_base) = self.fallback_base else {
            return Err(RetrievalError::Failed {
                primary: primary_err,
                fallback: None,
            });
        };

        let fallback_url = package_url(fallback_base, &entry.path, &self.archive_extension);
        warn!(
            "Primary endpoint failed for {} ({}); trying {}",
            entry.pmcid, primary_err, fallback_url
        );
        match self.attempt(&fallback_url, &dest).await {
            Ok(bytes) => {
                debug!("Fetched {} ({} bytes)", fallback_url, bytes);
                Ok(dest)
            }
            Err(AttemptError::Final(e)) => Err(e),
            Err(AttemptError::Endpoint(fallback_err)) => Err(RetrievalError::Failed {
                primary: primary_err,
                fallback: Some(fallback_err),
            }),
        }
    }

    /// One endpoint: optional HEAD guard, then a streamed GET into `dest`.
    async fn attempt(&self, url: &str, dest: &Path) -> Result<u64, AttemptError> {
        if let Some(limit) = self.max_bytes {
            if let Some(size) = self.remote_size(url).await {
                if size > limit {
                    return Err(too_large(url, size, limit));
                }
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Endpoint(describe(&e, self.download_timeout)))?;
        if !response.status().is_success() {
            return Err(AttemptError::Endpoint(format!("HTTP {}", response.status())));
        }
        if let (Some(limit), Some(size)) = (self.max_bytes, declared_length(&response)) {
            if size > limit {
                return Err(too_large(url, size, limit));
            }
        }

        self.stream_to_file(url, response, dest).await
    }

    async fn stream_to_file(
        &self,
        url: &str,
        response: Response,
        dest: &Path,
    ) -> Result<u64, AttemptError> {
        let storage = |source| {
            AttemptError::Final(RetrievalError::Storage {
                path: dest.to_path_buf(),
                source,
            })
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(storage)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptError::Endpoint(describe(&e, self.download_timeout)))?;
            written += chunk.len() as u64;
            if let Some(limit) = self.max_bytes {
                if written > limit {
                    return Err(too_large(url, written, limit));
                }
            }
            file.write_all(&chunk).await.map_err(storage)?;
        }
        file.flush().await.map_err(storage)?;
        Ok(written)
    }

    /// Best-effort `Content-Length` via HEAD. Any failure yields `None`.
    async fn remote_size(&self, url: &str) -> Option<u64> {
        match self.client.head(url).timeout(self.head_timeout).send().await {
            Ok(resp) if resp.status().is_success() => declared_length(&resp),
            Ok(resp) => {
                debug!("HEAD {} returned {}; size unknown", url, resp.status());
                None
            }
            Err(e) => {
                debug!("HEAD {} failed: {}; size unknown", url, e);
                None
            }
        }
    }
}

/// `base` + `path`, with `extension` appended unless `path` already ends with it.
pub fn package_url(base: &str, path: &str, extension: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.ends_with(extension) {
        format!("{base}/{path}")
    } else {
        format!("{base}/{path}{extension}")
    }
}

// Read the header itself: for HEAD responses reqwest's `content_length()`
// reports the (empty) body size rather than the declared length.
fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn too_large(url: &str, size: u64, limit: u64) -> AttemptError {
    AttemptError::Final(RetrievalError::TooLarge {
        url: url.to_string(),
        size,
        limit,
    })
}

fn describe(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("no data for {}s", timeout.as_secs())
    } else {
        e.to_string()
    }
}
