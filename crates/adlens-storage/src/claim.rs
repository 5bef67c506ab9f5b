//! Per-identity write claims.
//!
//! A claim is a `{entry}.claim` file created with `create_new`, so at most
//! one writer holds it. Claims left behind by a crashed run expire after a
//! configurable age and are broken by the next writer.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Suffix appended to the entry name.
const CLAIM_SUFFIX: &str = ".claim";

/// Exclusive right to write one cache entry. Released on drop.
#[derive(Debug)]
pub struct WriteClaim {
    path: PathBuf,
}

impl WriteClaim {
    /// Claim file path for an entry.
    pub fn path_for(entry: &Path) -> StorageResult<PathBuf> {
        let name = entry
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(entry.to_path_buf()))?;
        Ok(entry.with_file_name(format!("{}{}", name, CLAIM_SUFFIX)))
    }

    /// Try to claim `entry`.
    ///
    /// Returns `None` when another writer holds a live claim.
    pub async fn try_acquire(entry: &Path, stale_after: Duration) -> StorageResult<Option<Self>> {
        let path = Self::path_for(entry)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Second attempt only after breaking a stale claim
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    let claim = Self::stamp(path, file).await?;
                    debug!(claim = %claim.path.display(), "Acquired write claim");
                    return Ok(Some(claim));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !is_stale(&path, stale_after).await {
                        info!(claim = %path.display(), "Entry claimed by another writer");
                        return Ok(None);
                    }
                    warn!(claim = %path.display(), "Breaking stale write claim");
                    match fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Record the holder in a freshly created claim file.
    ///
    /// The claim owns the file from the start, so a failed write drops it
    /// and removes the file instead of leaving an unstamped claim behind.
    async fn stamp<W: AsyncWrite + Unpin>(path: PathBuf, mut file: W) -> StorageResult<Self> {
        let claim = Self { path };
        let stamp = format!("{} {}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(stamp.as_bytes()).await?;
        file.flush().await?;
        Ok(claim)
    }
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(claim = %self.path.display(), error = %e, "Failed to release write claim");
            }
        }
    }
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        // Vanished between open and stat: the holder released it
        Err(_) => return true,
    };

    SystemTime::now()
        .duration_since(modified)
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}
