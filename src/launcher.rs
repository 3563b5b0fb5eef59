//! Full launcher — orchestrates the patch-and-launch pipeline:
//! obtain base, reuse or rebuild the cached patched artifact, install
//! extensions, hand off.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::cache::{ArtifactCache, CacheKey};
use crate::error::LauncherResult;
use crate::extensions::{self, TransformFramework};
use crate::handoff;
use crate::manifest::Manifest;
use crate::patch::{self, PatchBlob};
use crate::source::ArtifactSource;

/// Result of the compute-or-reuse stage, before handoff.
#[derive(Debug)]
pub struct PreparedLaunch {
    /// On-disk location of the verified patched image.
    pub image_path: PathBuf,
    /// Digest of the image (always the manifest's expected output).
    pub digest: String,
    /// Whether the patch applier ran, or a cached entry was reused.
    pub freshly_patched: bool,
}

pub struct Launcher {
    manifest: Manifest,
    manifest_dir: PathBuf,
    source: ArtifactSource,
    cache: ArtifactCache,
}

impl Launcher {
    pub fn new(manifest: Manifest, manifest_dir: &Path, source: ArtifactSource, repo_dir: &Path) -> Self {
        Self {
            manifest,
            manifest_dir: manifest_dir.to_path_buf(),
            source,
            cache: ArtifactCache::new(repo_dir),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Produce the patched image on disk, reusing the cache when its
    /// contents still verify. Idempotent; safe under concurrent
    /// launches of the same version.
    pub async fn prepare(&self, force_refresh: bool) -> LauncherResult<PreparedLaunch> {
        let key = CacheKey::new(&self.manifest.base.version, &self.manifest.patch.digest);
        let expected = &self.manifest.patch.output_digest;

        if force_refresh {
            info!("forced refresh, ignoring cached artifact");
        } else if let Some(hit) = self.cache.lookup(&key, expected) {
            info!("reusing cached patched artifact for {}", hit.version);
            return Ok(PreparedLaunch {
                image_path: self.cache.entry_path(&key),
                digest: hit.digest,
                freshly_patched: false,
            });
        }

        let base = self.source.obtain(&self.manifest.base).await?;
        let blob = PatchBlob::load(&self.manifest_dir, &self.manifest.patch)?;
        let artifact = patch::apply(&base, &blob)?;
        let image_path = self.cache.store(&key, &artifact)?;

        info!(
            "patched artifact {} ready ({} bytes)",
            artifact.version,
            artifact.bytes.len()
        );
        Ok(PreparedLaunch {
            image_path,
            digest: artifact.digest,
            freshly_patched: true,
        })
    }

    /// Install the pre-load transforms. Fatal on any failure — the
    /// patched artifact must never run untransformed.
    pub fn setup_extensions(&self, framework: &dyn TransformFramework) -> LauncherResult<()> {
        extensions::install(&self.manifest_dir, &self.manifest.transforms, framework)
    }

    /// Transfer control to the prepared image. Does not return on the
    /// success path.
    pub fn hand_off(&self, prepared: &PreparedLaunch, args: &[String]) -> LauncherResult<()> {
        handoff::invoke(&prepared.image_path, &self.manifest.runtime.runner, args)
    }
}
