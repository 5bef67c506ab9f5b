//! Atomic artifact writes and tolerant reads.
//!
//! Writers never create the final entry directly: bytes go to a uniquely
//! named `.part` sibling that is renamed into place only once complete, so
//! an interrupted write can never leave an entry that looks valid.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Extension a downloaded video must carry to count as valid.
const VIDEO_EXTENSION: &str = "mp4";

/// Unique temporary sibling of `dest`.
pub(crate) fn part_path(dest: &Path) -> StorageResult<PathBuf> {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidPath(dest.to_path_buf()))?;
    Ok(dest.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple())))
}

async fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// A file being written that becomes visible at `dest` only on commit.
///
/// Dropping without committing removes the partial file.
#[derive(Debug)]
pub struct PartFile {
    part: PathBuf,
    dest: PathBuf,
    file: Option<fs::File>,
    written: u64,
}

impl PartFile {
    pub async fn create(dest: impl AsRef<Path>) -> StorageResult<Self> {
        let dest = dest.as_ref().to_path_buf();
        ensure_parent(&dest).await?;
        let part = part_path(&dest)?;
        let file = fs::File::create(&part).await?;

        Ok(Self {
            part,
            dest,
            file: Some(file),
            written: 0,
        })
    }

    /// Append a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::InvalidPath(self.part.clone()))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush to disk and rename into place. Returns the final size.
    pub async fn commit(mut self) -> StorageResult<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&self.part, &self.dest).await {
            let _ = fs::remove_file(&self.part).await;
            return Err(e.into());
        }
        debug!(path = %self.dest.display(), bytes = self.written, "Committed artifact");
        Ok(self.written)
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        // Still open means commit never ran
        if self.file.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.part) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.part.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
    }
}

/// Write `bytes` to `dest` atomically.
pub async fn write_atomic(dest: impl AsRef<Path>, bytes: &[u8]) -> StorageResult<()> {
    let mut part = PartFile::create(dest).await?;
    part.write(bytes).await?;
    part.commit().await?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it to `dest` atomically.
pub async fn write_json_atomic<T: Serialize>(dest: impl AsRef<Path>, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(dest, &bytes).await
}

/// Read a JSON artifact.
///
/// Returns `None` when the entry is missing or does not deserialize; a
/// corrupt entry is a cache miss and will be overwritten.
pub async fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> StorageResult<Option<T>> {
    let path = path.as_ref();
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable cache entry");
            Ok(None)
        }
    }
}

/// Read a text artifact, `None` when missing.
pub async fn read_text(path: impl AsRef<Path>) -> StorageResult<Option<String>> {
    match fs::read_to_string(path.as_ref()).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            warn!(path = %path.as_ref().display(), "Ignoring non UTF-8 cache entry");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// A downloaded video is valid only if it is a non-empty `.mp4` file.
pub async fn is_valid_video(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(VIDEO_EXTENSION))
        .unwrap_or(false);
    if !has_extension {
        return false;
    }

    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_part_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested/video_1.txt");

        write_atomic(&dest, b"hello").await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");
        assert_eq!(dir_entries(dest.parent().unwrap()), vec!["video_1.txt"]);
    }

    #[tokio::test]
    async fn test_dropped_part_file_is_removed() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("video_1.mp4");

        {
            let mut part = PartFile::create(&dest).await.unwrap();
            part.write(b"partial").await.unwrap();
        }

        assert!(!dest.exists());
        assert!(dir_entries(tmp.path()).is_empty());
        assert!(!is_valid_video(&dest).await);
    }

    #[tokio::test]
    async fn test_part_file_commit_reports_size() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("video_1.mp4");

        let mut part = PartFile::create(&dest).await.unwrap();
        part.write(b"abc").await.unwrap();
        part.write(b"def").await.unwrap();
        assert_eq!(part.commit().await.unwrap(), 6);
        assert!(is_valid_video(&dest).await);
    }

    #[tokio::test]
    async fn test_read_json_missing_and_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("entry.json");

        assert_eq!(read_json::<Entry>(&path).await.unwrap(), None);

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_json::<Entry>(&path).await.unwrap(), None);

        let entry = Entry {
            name: "x".to_string(),
        };
        write_json_atomic(&path, &entry).await.unwrap();
        assert_eq!(read_json::<Entry>(&path).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_read_text_missing() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(read_text(tmp.path().join("none.txt")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_video_validity() {
        let tmp = TempDir::new().unwrap();

        let empty = tmp.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert!(!is_valid_video(&empty).await);

        let wrong_ext = tmp.path().join("video.webm");
        std::fs::write(&wrong_ext, b"data").unwrap();
        assert!(!is_valid_video(&wrong_ext).await);

        let good = tmp.path().join("video.mp4");
        std::fs::write(&good, b"data").unwrap();
        assert!(is_valid_video(&good).await);

        assert!(!is_valid_video(tmp.path().join("missing.mp4")).await);
    }
}
