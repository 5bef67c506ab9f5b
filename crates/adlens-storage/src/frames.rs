//! Committed frame directories.
//!
//! Frames of one video are written into a `.part` directory together with a
//! `frames.json` manifest, and the directory is renamed into place as a
//! whole. A directory without a readable manifest was never committed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use adlens_models::{Frame, FrameManifest, FrameSet};

use crate::atomic::{part_path, read_json};
use crate::error::{StorageError, StorageResult};

/// Manifest file name inside a frame directory.
pub const MANIFEST_FILE: &str = "frames.json";

/// Load a committed frame directory, frames base64-encoded.
///
/// Returns `None` when the directory is missing, uncommitted, or a frame
/// listed in the manifest is gone.
pub async fn load_committed_frames(dir: &Path) -> StorageResult<Option<FrameSet>> {
    let Some(manifest) = read_json::<FrameManifest>(dir.join(MANIFEST_FILE)).await? else {
        return Ok(None);
    };

    let mut frames = Vec::with_capacity(manifest.frames.len());
    for entry in manifest.frames {
        let path = dir.join(&entry.name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!(path = %path.display(), "Empty frame in committed directory");
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Frame missing from committed directory");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        frames.push(Frame {
            index: entry.index,
            position: entry.position,
            name: entry.name,
            path,
            encoded: STANDARD.encode(&bytes),
        });
    }

    Ok(Some(FrameSet {
        video: manifest.video,
        total_frames: manifest.total_frames,
        frames,
    }))
}

/// Builds a frame directory out of sight, then commits it.
///
/// Dropping without committing removes the partial directory.
#[derive(Debug)]
pub struct FrameDirBuilder {
    part: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl FrameDirBuilder {
    pub async fn begin(dest: impl AsRef<Path>) -> StorageResult<Self> {
        let dest = dest.as_ref().to_path_buf();
        let part = part_path(&dest)?;
        fs::create_dir_all(&part).await?;

        Ok(Self {
            part,
            dest,
            committed: false,
        })
    }

    /// Where a frame with this file name should be written.
    pub fn frame_path(&self, name: &str) -> PathBuf {
        self.part.join(name)
    }

    /// Path the frame will have once committed.
    pub fn committed_path(&self, name: &str) -> PathBuf {
        self.dest.join(name)
    }

    /// Write the manifest and move the directory into place.
    ///
    /// An uncommitted directory already at the destination is replaced.
    pub async fn commit(mut self, manifest: &FrameManifest) -> StorageResult<()> {
        for entry in &manifest.frames {
            let path = self.part.join(&entry.name);
            let len = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                return Err(StorageError::invalid_artifact(path, "frame not written"));
            }
        }

        let bytes = serde_json::to_vec_pretty(manifest)?;
        fs::write(self.part.join(MANIFEST_FILE), bytes).await?;

        match fs::metadata(&self.dest).await {
            Ok(meta) if meta.is_dir() => {
                debug!(path = %self.dest.display(), "Replacing uncommitted frame directory");
                fs::remove_dir_all(&self.dest).await?;
            }
            Ok(_) => fs::remove_file(&self.dest).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::rename(&self.part, &self.dest).await?;
        self.committed = true;
        debug!(path = %self.dest.display(), frames = manifest.frames.len(), "Committed frame directory");
        Ok(())
    }
}

impl Drop for FrameDirBuilder {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_dir_all(&self.part) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.part.display(), error = %e, "Failed to remove partial frame directory");
                }
            }
        }
    }
}
