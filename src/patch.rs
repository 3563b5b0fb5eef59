//! Binary delta application — a narrow wrapper over the external bsdiff
//! implementation (`qbsdiff`).
//!
//! This module's whole job is the double-check around the algorithm:
//! the patch must target the exact base version it was generated for
//! (pre-condition), and the produced bytes must match the expected
//! output digest (post-condition). A failure at either check discards
//! the output — it is never cached, never launched.

use std::path::Path;

use qbsdiff::Bspatch;
use tracing::debug;

use crate::digest;
use crate::error::{LauncherError, LauncherResult};
use crate::manifest::PatchSpec;
use crate::source::BaseArtifact;

/// The binary delta bundled with the launcher, digest-verified at load.
#[derive(Debug, Clone)]
pub struct PatchBlob {
    pub target_base_version: String,
    pub digest: String,
    pub expected_output_digest: String,
    pub bytes: Vec<u8>,
}

impl PatchBlob {
    /// Load the patch file named by the manifest, relative to the
    /// manifest's own directory, and verify its digest.
    pub fn load(manifest_dir: &Path, spec: &PatchSpec) -> LauncherResult<Self> {
        let path = manifest_dir.join(&spec.file);
        let bytes = std::fs::read(&path).map_err(|e| {
            LauncherError::Configuration(format!(
                "cannot read patch file {}: {e}",
                path.display()
            ))
        })?;
        digest::verify("patch blob", &bytes, &spec.digest)?;

        Ok(Self {
            target_base_version: spec.target_version.clone(),
            digest: spec.digest.trim().to_lowercase(),
            expected_output_digest: spec.output_digest.trim().to_lowercase(),
            bytes,
        })
    }
}

/// The customized artifact produced by applying a patch to a base.
#[derive(Debug, Clone)]
pub struct PatchedArtifact {
    pub version: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}

/// Apply `patch` to `base`, enforcing the version pre-condition and the
/// output-digest post-condition.
pub fn apply(base: &BaseArtifact, patch: &PatchBlob) -> LauncherResult<PatchedArtifact> {
    if patch.target_base_version != base.version {
        return Err(LauncherError::Integrity {
            artifact: "patch target".into(),
            detail: format!(
                "patch was generated against base version {}, got {}",
                patch.target_base_version, base.version
            ),
        });
    }

    let patcher = Bspatch::new(&patch.bytes).map_err(|e| LauncherError::Integrity {
        artifact: "patch blob".into(),
        detail: format!("unreadable delta payload: {e}"),
    })?;

    let mut output = Vec::with_capacity(patcher.hint_target_size() as usize);
    patcher
        .apply(&base.bytes, std::io::Cursor::new(&mut output))
        .map_err(|e| LauncherError::Integrity {
            artifact: "patch application".into(),
            detail: format!("delta did not apply cleanly: {e}"),
        })?;

    digest::verify("patched artifact", &output, &patch.expected_output_digest)?;
    debug!(
        "patched {} ({} -> {} bytes)",
        base.version,
        base.bytes.len(),
        output.len()
    );

    Ok(PatchedArtifact {
        version: base.version.clone(),
        digest: patch.expected_output_digest.clone(),
        bytes: output,
    })
}
