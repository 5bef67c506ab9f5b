//! Durable on-disk artifact cache.
//!
//! This crate provides:
//! - One directory per artifact kind, entries named after the video key
//! - Atomic writes (unique `.part` sibling, then rename)
//! - Per-identity exclusive write claims with stale-claim expiry
//! - Committed frame directories with a `frames.json` manifest
//! - Validity checks that treat broken entries as cache misses

pub mod atomic;
pub mod claim;
pub mod error;
pub mod frames;
pub mod layout;

pub use atomic::{is_valid_video, read_json, read_text, write_atomic, write_json_atomic, PartFile};
pub use claim::WriteClaim;
pub use error::{StorageError, StorageResult};
pub use frames::{load_committed_frames, FrameDirBuilder, MANIFEST_FILE};
pub use layout::{ArtifactKind, CacheLayout};
