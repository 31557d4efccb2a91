//! # Remote Archive Client
//!
//! Lists, fetches and uploads record files against the archive host. Every
//! operation is bounded by the configured timeout; a timed-out operation is a
//! failed one. Uploads go out in chunks so each transfer fits that bound however
//! large the pending backlog has grown.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transport::{ArchiveTransport, SshTransport};
use crate::config::ArchiveConfig;
use crate::error::{ArchiverError, Result};
use crate::store::naming::{is_valid_stamp, parse_record_stamp, stamp_in_range};

/// Files per upload transfer unless configured otherwise
pub const DEFAULT_UPLOAD_CHUNK: usize = 16;

/// Result of fetching one remote file
#[derive(Debug)]
pub struct FetchOutcome {
    pub remote_path: String,
    pub result: Result<PathBuf>,
}

/// Client for one archive endpoint
#[derive(Clone)]
pub struct RemoteArchiveClient {
    transport: Arc<dyn ArchiveTransport>,
    endpoint: String,
    remote_dir: String,
    timeout: Duration,
    upload_chunk: usize,
}

impl std::fmt::Debug for RemoteArchiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteArchiveClient")
            .field("endpoint", &self.endpoint)
            .field("remote_dir", &self.remote_dir)
            .field("timeout", &self.timeout)
            .field("upload_chunk", &self.upload_chunk)
            .finish_non_exhaustive()
    }
}

impl RemoteArchiveClient {
    pub fn new(
        transport: Arc<dyn ArchiveTransport>,
        endpoint: &str,
        remote_dir: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
            remote_dir: remote_dir.trim_end_matches('/').to_string(),
            timeout,
            upload_chunk: DEFAULT_UPLOAD_CHUNK,
        }
    }

    /// Send at most `files` files per upload transfer
    pub fn with_upload_chunk(mut self, files: usize) -> Self {
        self.upload_chunk = files.max(1);
        self
    }

    /// Client over `ssh`/`scp` for the configured endpoint
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(
            Arc::new(SshTransport::from_config(config)),
            &format!("{}@{}:{}", config.user, config.host, config.port),
            &config.remote_dir,
            config.timeout(),
        )
        .with_upload_chunk(config.upload_chunk_files)
    }

    async fn bounded<T, F>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ArchiverError::Timeout(format!(
                "{} against {} after {:?}",
                what, self.endpoint, self.timeout
            ))),
        }
    }

    /// Probe the archive host without running any remote command
    ///
    /// Never fails: connection, protocol and timeout errors are logged and
    /// reported as `false`.
    pub async fn is_reachable(&self) -> bool {
        match self.bounded("handshake", self.transport.handshake()).await {
            Ok(()) => {
                debug!("Archive host {} is reachable", self.endpoint);
                true
            }
            Err(e) => {
                warn!("Archive host {} unreachable: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Remote record paths whose stamp lies in `[start, end]`, ascending
    ///
    /// Files not named `record.<14 digits>.json` are ignored. No matches is an
    /// empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimestamp` for malformed bounds, or the transport error
    /// if listing fails.
    pub async fn list_matching(&self, start: &str, end: &str) -> Result<Vec<String>> {
        validate_range(start, end)?;

        let names = self
            .bounded("list", self.transport.list(&self.remote_dir))
            .await?;

        let mut matching: Vec<&String> = names
            .iter()
            .filter(|name| {
                parse_record_stamp(name).is_some_and(|stamp| stamp_in_range(stamp, start, end))
            })
            .collect();
        matching.sort();

        debug!(
            "{} of {} remote files in [{}, {}]",
            matching.len(),
            names.len(),
            start,
            end
        );

        Ok(matching
            .into_iter()
            .map(|name| format!("{}/{}", self.remote_dir, name))
            .collect())
    }

    /// Copy each remote path into `local_dir`
    ///
    /// Each file succeeds or fails on its own; files already copied stay put.
    pub async fn fetch(&self, remote_paths: &[String], local_dir: &Path) -> Vec<FetchOutcome> {
        if let Err(e) = tokio::fs::create_dir_all(local_dir).await {
            warn!("Failed to create {}: {}", local_dir.display(), e);
        }

        let mut outcomes = Vec::with_capacity(remote_paths.len());
        for remote_path in remote_paths {
            let result = self
                .bounded("fetch", self.transport.fetch_one(remote_path, local_dir))
                .await;

            if let Err(e) = &result {
                warn!("Failed to fetch {}: {}", remote_path, e);
            }

            outcomes.push(FetchOutcome {
                remote_path: remote_path.clone(),
                result,
            });
        }
        outcomes
    }

    /// Upload `local_files` in chunks, deleting each chunk locally once it lands
    ///
    /// Each chunk is one transfer under the client timeout. A failed chunk
    /// deletes nothing of its own and stops the upload; earlier chunks are
    /// already shipped and gone. Returns the number of files uploaded.
    ///
    /// # Errors
    ///
    /// Returns the transport or timeout error of the first failed chunk.
    pub async fn upload(&self, local_files: &[PathBuf]) -> Result<usize> {
        let mut uploaded = 0;

        for chunk in local_files.chunks(self.upload_chunk) {
            let sent = self
                .bounded("upload", self.transport.upload(chunk, &self.remote_dir))
                .await;

            if let Err(e) = sent {
                if uploaded > 0 {
                    warn!(
                        "Upload stopped after {} of {} record files",
                        uploaded,
                        local_files.len()
                    );
                }
                return Err(e);
            }

            for path in chunk {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Uploaded {} but could not delete it: {}", path.display(), e);
                }
            }
            uploaded += chunk.len();
        }

        if uploaded > 0 {
            info!(
                "Uploaded {} record files to {}:{}",
                uploaded, self.endpoint, self.remote_dir
            );
        }
        Ok(uploaded)
    }
}

/// Both bounds must be 14-digit stamps with `start <= end`
pub fn validate_range(start: &str, end: &str) -> Result<()> {
    for bound in [start, end] {
        if !is_valid_stamp(bound) {
            return Err(ArchiverError::InvalidTimestamp(format!(
                "'{}' is not a YYYYMMDDHHMMSS stamp",
                bound
            )));
        }
    }

    if start > end {
        return Err(ArchiverError::InvalidTimestamp(format!(
            "range start {} is after end {}",
            start, end
        )));
    }

    Ok(())
}
