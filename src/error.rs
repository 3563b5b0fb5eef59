//! Launcher error taxonomy and exit codes.
//!
//! Every failure in the pipeline maps to exactly one variant here and
//! exactly one process exit code. Nothing is swallowed: the binary prints
//! a single diagnostic line and exits with the documented code.

use thiserror::Error;

/// Hosting runtime below the launcher's minimum capability.
pub const EXIT_RUNTIME_TOO_OLD: i32 = 10;
/// Network/IO acquisition failure after bounded retries.
pub const EXIT_UNAVAILABLE: i32 = 11;
/// Digest or patch-target mismatch anywhere in the pipeline.
pub const EXIT_INTEGRITY: i32 = 12;
/// Malformed or incomplete manifest.
pub const EXIT_CONFIGURATION: i32 = 13;
/// Patched bytes do not resolve to a launchable image.
pub const EXIT_CORRUPT_ARTIFACT: i32 = 14;
/// Transform framework unavailable or descriptors unsatisfiable.
pub const EXIT_EXTENSION_SETUP: i32 = 15;
/// Any other I/O failure.
pub const EXIT_IO: i32 = 16;

#[derive(Debug, Error)]
pub enum LauncherError {
    /// Transient acquisition failure. Retried a bounded number of times
    /// by the artifact source before surfacing here.
    #[error("artifact unavailable: {0}")]
    Unavailable(String),

    /// Digest mismatch. Never retried — a corrupt source retried blindly
    /// could mask tampering.
    #[error("integrity check failed for {artifact}: {detail}")]
    Integrity { artifact: String, detail: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("corrupt patched artifact: {0}")]
    CorruptArtifact(String),

    #[error("extension setup failed for '{descriptor}': {reason}")]
    ExtensionSetup { descriptor: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LauncherError {
    /// Mismatch between an expected and a computed digest.
    pub fn digest_mismatch(artifact: &str, expected: &str, actual: &str) -> Self {
        Self::Integrity {
            artifact: artifact.to_string(),
            detail: format!("expected digest {expected}, got {actual}"),
        }
    }

    /// Stable process exit code for this failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unavailable(_) => EXIT_UNAVAILABLE,
            Self::Integrity { .. } => EXIT_INTEGRITY,
            Self::Configuration(_) => EXIT_CONFIGURATION,
            Self::CorruptArtifact(_) => EXIT_CORRUPT_ARTIFACT,
            Self::ExtensionSetup { .. } => EXIT_EXTENSION_SETUP,
            Self::Io(_) => EXIT_IO,
        }
    }
}

pub type LauncherResult<T> = Result<T, LauncherError>;
