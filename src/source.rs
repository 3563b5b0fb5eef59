//! Base-artifact acquisition — local repo first, then remote with
//! bounded retries over the primary URL and its mirrors.
//!
//! Nothing leaves this module unverified: a returned `BaseArtifact`
//! always matches the manifest's expected digest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::write_atomic;
use crate::digest;
use crate::error::{LauncherError, LauncherResult};
use crate::manifest::BaseSpec;

/// Attempts per URL before moving to the next mirror.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Backoff between attempts, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// The unmodified upstream program image. Digest is pre-verified.
#[derive(Debug, Clone)]
pub struct BaseArtifact {
    pub version: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}

/// Transport boundary, swappable in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> LauncherResult<Vec<u8>>;
}

/// reqwest-backed fetcher used by the real launcher.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> LauncherResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LauncherError::Unavailable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::Unavailable(format!(
                "GET {url}: HTTP {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LauncherError::Unavailable(format!("reading body of {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Resolves the base artifact from the local repo or a remote location.
pub struct ArtifactSource {
    fetcher: Box<dyn Fetcher>,
    repo_dir: PathBuf,
}

impl ArtifactSource {
    pub fn new(fetcher: Box<dyn Fetcher>, repo_dir: &Path) -> Self {
        Self {
            fetcher,
            repo_dir: repo_dir.to_path_buf(),
        }
    }

    /// Where a verified copy of `version` lives on disk.
    pub fn local_path(&self, version: &str) -> PathBuf {
        self.repo_dir.join("base").join(format!("{version}.bin"))
    }

    /// Obtain the base artifact described by the manifest.
    ///
    /// A local copy that fails verification is discarded and re-fetched.
    /// A *fetched* copy that fails verification is fatal — tampering is
    /// never retried.
    pub async fn obtain(&self, spec: &BaseSpec) -> LauncherResult<BaseArtifact> {
        let local = self.local_path(&spec.version);

        if let Some(bytes) = self.try_local(&local, spec) {
            debug!("using local base artifact at {}", local.display());
            return Ok(BaseArtifact {
                version: spec.version.clone(),
                digest: spec.digest.trim().to_lowercase(),
                bytes,
            });
        }

        let bytes = self.fetch_remote(spec).await?;
        digest::verify(
            &format!("fetched base artifact {}", spec.version),
            &bytes,
            &spec.digest,
        )?;

        // Keep a verified copy for the next launch. Failure to persist is
        // not fatal; the bytes in hand are already verified.
        if let Err(e) = write_atomic(&local, &bytes) {
            warn!("could not persist base artifact to {}: {e}", local.display());
        }

        Ok(BaseArtifact {
            version: spec.version.clone(),
            digest: spec.digest.trim().to_lowercase(),
            bytes,
        })
    }

    /// Read and verify a previously stored copy. Returns `None` (after
    /// removing the file) when it is missing or fails verification.
    fn try_local(&self, local: &Path, spec: &BaseSpec) -> Option<Vec<u8>> {
        let bytes = std::fs::read(local).ok()?;
        match digest::verify(&format!("local base artifact {}", spec.version), &bytes, &spec.digest) {
            Ok(()) => Some(bytes),
            Err(e) => {
                warn!("discarding stale local base artifact: {e}");
                let _ = std::fs::remove_file(local);
                None
            }
        }
    }

    /// Try the primary URL then each mirror, `FETCH_ATTEMPTS` times each.
    async fn fetch_remote(&self, spec: &BaseSpec) -> LauncherResult<Vec<u8>> {
        let mut last_err = None;

        for url in std::iter::once(&spec.url).chain(spec.mirrors.iter()) {
            for attempt in 1..=FETCH_ATTEMPTS {
                info!("fetching base artifact {} from {url} (attempt {attempt}/{FETCH_ATTEMPTS})", spec.version);
                match self.fetcher.fetch(url).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e @ LauncherError::Unavailable(_)) => {
                        warn!("fetch failed: {e}");
                        last_err = Some(e);
                        if attempt < FETCH_ATTEMPTS {
                            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        }
                    }
                    // Anything other than a transport failure aborts the
                    // whole acquisition.
                    Err(e) => return Err(e),
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            LauncherError::Unavailable(format!("no download location for {}", spec.version))
        }))
    }
}
