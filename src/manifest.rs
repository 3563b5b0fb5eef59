//! Version manifest — the small structured record bundled with the
//! launcher at build time, read-only at runtime.
//!
//! Names the base artifact (version, digest, where to fetch it), the
//! bundled patch (file, digest, expected output digest), the minimum
//! hosting-runtime capability, and the transform descriptors to install
//! before handoff.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LauncherError, LauncherResult};

/// Default manifest file name, looked up next to the launcher executable.
pub const MANIFEST_FILE: &str = "patchway.json";

/// Hosting-runtime capability level, "major.minor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl RuntimeVersion {
    pub const ZERO: Self = Self { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for RuntimeVersion {
    type Err = String;

    /// Parse "21", "21.0" or "21.0.2" — anything past major.minor is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("empty version string: {s:?}"))?
            .parse::<u32>()
            .map_err(|_| format!("bad major version in {s:?}"))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| format!("bad minor version in {s:?}"))?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

/// Where the unmodified upstream artifact comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseSpec {
    /// Upstream version/build identifier, e.g. "1.21.4-r3".
    pub version: String,
    /// Expected SHA-256 of the stock artifact (hex).
    pub digest: String,
    /// Primary download location.
    pub url: String,
    /// Ordered fallback locations, tried after the primary is exhausted.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

/// The binary delta bundled next to the launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Patch file, relative to the manifest's directory.
    pub file: PathBuf,
    /// Base version this delta was generated against.
    pub target_version: String,
    /// Expected SHA-256 of the patch file itself (hex).
    pub digest: String,
    /// Expected SHA-256 of the patched output (hex).
    pub output_digest: String,
}

/// How to probe and drive the hosting runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Command + args whose stdout reveals the runtime version.
    pub probe: Vec<String>,
    /// Minimum capability the full launcher requires, "major.minor".
    pub min_version: String,
    /// Command prefix the patched image is launched through. Empty means
    /// the image is executed directly.
    #[serde(default)]
    pub runner: Vec<String>,
}

/// One pre-load transform the external framework must install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformDescriptor {
    pub name: String,
    /// Transforms that must be installed before this one.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Payload file, relative to the manifest's directory.
    pub payload: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub base: BaseSpec,
    pub patch: PatchSpec,
    pub runtime: RuntimeSpec,
    #[serde(default)]
    pub transforms: Vec<TransformDescriptor>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> LauncherResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LauncherError::Configuration(format!(
                "cannot read manifest {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate manifest JSON.
    pub fn parse(content: &str) -> LauncherResult<Self> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|e| LauncherError::Configuration(format!("malformed manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Minimum runtime capability, parsed.
    pub fn min_runtime(&self) -> LauncherResult<RuntimeVersion> {
        self.runtime
            .min_version
            .parse()
            .map_err(LauncherError::Configuration)
    }

    fn validate(&self) -> LauncherResult<()> {
        if self.base.version.trim().is_empty() {
            return Err(LauncherError::Configuration("base.version is empty".into()));
        }
        if self.base.url.trim().is_empty() {
            return Err(LauncherError::Configuration("base.url is empty".into()));
        }
        check_digest("base.digest", &self.base.digest)?;
        check_digest("patch.digest", &self.patch.digest)?;
        check_digest("patch.output_digest", &self.patch.output_digest)?;
        if self.patch.file.as_os_str().is_empty() {
            return Err(LauncherError::Configuration("patch.file is empty".into()));
        }
        if self.patch.target_version.trim().is_empty() {
            return Err(LauncherError::Configuration(
                "patch.target_version is empty".into(),
            ));
        }
        if self.runtime.probe.is_empty() {
            return Err(LauncherError::Configuration(
                "runtime.probe command is empty".into(),
            ));
        }
        self.min_runtime()?;

        let mut names = std::collections::HashSet::new();
        for transform in &self.transforms {
            if transform.name.trim().is_empty() {
                return Err(LauncherError::Configuration(
                    "transform with empty name".into(),
                ));
            }
            if !names.insert(transform.name.as_str()) {
                return Err(LauncherError::Configuration(format!(
                    "duplicate transform name '{}'",
                    transform.name
                )));
            }
            if transform.payload.as_os_str().is_empty() {
                return Err(LauncherError::Configuration(format!(
                    "transform '{}' has no payload",
                    transform.name
                )));
            }
        }
        Ok(())
    }
}

fn check_digest(field: &str, value: &str) -> LauncherResult<()> {
    let value = value.trim();
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LauncherError::Configuration(format!(
            "{field} is not a 64-char hex SHA-256: {value:?}"
        )));
    }
    Ok(())
}
