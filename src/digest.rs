//! SHA-256 digests over byte blobs — the integrity primitive for every
//! stage of the pipeline.

use sha2::{Digest, Sha256};

use crate::error::{LauncherError, LauncherResult};

/// Hex digest of a byte blob (lowercase, 64 chars).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Verify `bytes` against an expected hex digest.
///
/// An empty expected digest is a configuration error, never a pass —
/// a manifest that forgot a digest must not verify anything.
pub fn verify(artifact: &str, bytes: &[u8], expected: &str) -> LauncherResult<()> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Err(LauncherError::Configuration(format!(
            "no expected digest configured for {artifact}"
        )));
    }

    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(LauncherError::digest_mismatch(artifact, expected, &actual));
    }
    Ok(())
}
