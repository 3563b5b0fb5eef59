//! Patched-artifact cache — content-fingerprinted, digest-verified on
//! every read, atomic-rename on every write.
//!
//! On-disk layout, under `<repo>/cache/`:
//! ```text
//! <base_version>-<patch_digest[..16]>/
//!     artifact.bin          the patched image
//!     artifact.bin.sha256   sidecar hex digest
//! ```
//!
//! The key embeds the patch digest, so shipping a launcher with an
//! updated patch invalidates stale entries with no versioning logic.
//! Writes go through a temp file in the entry directory and rename into
//! place; concurrent launchers racing on one key each produce a correct
//! entry and the last writer wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::digest;
use crate::error::LauncherResult;
use crate::patch::PatchedArtifact;

const ARTIFACT_FILE: &str = "artifact.bin";

/// Cache key: (base version id, patch content digest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    base_version: String,
    patch_digest: String,
}

impl CacheKey {
    pub fn new(base_version: &str, patch_digest: &str) -> Self {
        Self {
            base_version: base_version.to_string(),
            patch_digest: patch_digest.trim().to_lowercase(),
        }
    }

    /// Directory name for this key. 16 hex chars of the patch digest is
    /// plenty to distinguish launcher revisions for one base version.
    fn dir_name(&self) -> String {
        let short = &self.patch_digest[..self.patch_digest.len().min(16)];
        format!("{}-{short}", self.base_version)
    }
}

pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(repo_dir: &Path) -> Self {
        Self {
            root: repo_dir.join("cache"),
        }
    }

    /// Path of the cached image for `key` (whether or not it exists yet).
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.dir_name()).join(ARTIFACT_FILE)
    }

    /// Look up a cached patched artifact.
    ///
    /// Re-verifies the stored bytes against both the sidecar digest and
    /// the expected output digest from the current patch. Any corruption
    /// behaves exactly like a miss: the entry is dropped (best effort)
    /// and the caller re-patches.
    pub fn lookup(&self, key: &CacheKey, expected_digest: &str) -> Option<PatchedArtifact> {
        let entry = self.entry_path(key);
        let sidecar = entry.with_extension("bin.sha256");

        let bytes = std::fs::read(&entry).ok()?;
        let stored = std::fs::read_to_string(&sidecar).ok()?;

        let actual = digest::sha256_hex(&bytes);
        if actual != stored.trim() || !actual.eq_ignore_ascii_case(expected_digest.trim()) {
            warn!(
                "cache entry {} failed verification, discarding",
                entry.display()
            );
            self.evict(key);
            return None;
        }

        debug!("cache hit for {}", key.dir_name());
        Some(PatchedArtifact {
            version: key.base_version.clone(),
            digest: actual,
            bytes,
        })
    }

    /// Persist a patched artifact. Atomic with respect to concurrent
    /// launches: readers see either nothing or a complete entry.
    ///
    /// Returns the path of the stored image.
    pub fn store(&self, key: &CacheKey, artifact: &PatchedArtifact) -> LauncherResult<PathBuf> {
        let entry = self.entry_path(key);
        write_atomic(&entry, &artifact.bytes)?;

        let sidecar = entry.with_extension("bin.sha256");
        write_atomic(&sidecar, digest::sha256_hex(&artifact.bytes).as_bytes())?;

        debug!("stored cache entry {}", entry.display());
        Ok(entry)
    }

    /// Remove an entry directory. Errors are ignored — a concurrent
    /// launcher may already have replaced it.
    fn evict(&self, key: &CacheKey) {
        let _ = std::fs::remove_dir_all(self.root.join(key.dir_name()));
    }
}

/// Write `bytes` to `path` via a temp file in the same directory followed
/// by an atomic rename. Creates parent directories as needed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> LauncherResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
