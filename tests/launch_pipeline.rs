//! End-to-end pipeline tests against the public API: acquisition,
//! patching, caching, and the dispatcher gate — everything short of the
//! actual exec.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qbsdiff::Bsdiff;
use tempfile::TempDir;

use patchway::digest;
use patchway::dispatch::{self, Dispatch, RuntimeProbe};
use patchway::error::{LauncherError, LauncherResult, EXIT_INTEGRITY, EXIT_UNAVAILABLE};
use patchway::launcher::Launcher;
use patchway::manifest::{Manifest, RuntimeVersion};
use patchway::source::{ArtifactSource, Fetcher, FETCH_ATTEMPTS};

/// Serves fixed bytes and counts how often it was asked.
struct CountingFetcher {
    payload: Vec<u8>,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> LauncherResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

/// Always fails, like an unreachable download host.
struct DeadFetcher {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Fetcher for DeadFetcher {
    async fn fetch(&self, url: &str) -> LauncherResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LauncherError::Unavailable(format!(
            "connection refused: {url}"
        )))
    }
}

struct FixedProbe(Option<RuntimeVersion>);

impl RuntimeProbe for FixedProbe {
    fn detect(&self) -> Option<RuntimeVersion> {
        self.0
    }
}

fn bsdiff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut patch = Vec::new();
    Bsdiff::new(old, new)
        .compare(std::io::Cursor::new(&mut patch))
        .unwrap();
    patch
}

/// Lay out a launcher bundle on disk: manifest + patch file, returning
/// the parsed manifest and the bundle directory.
fn write_bundle(dir: &Path, base_bytes: &[u8], patched_bytes: &[u8]) -> (Manifest, PathBuf) {
    let bundle = dir.join("bundle");
    std::fs::create_dir_all(&bundle).unwrap();
    let patch_bytes = bsdiff(base_bytes, patched_bytes);
    std::fs::write(bundle.join("delta.bin"), &patch_bytes).unwrap();

    let json = format!(
        r#"{{
            "base": {{
                "version": "1.21.4-r3",
                "digest": "{}",
                "url": "https://upstream.invalid/stock-1.21.4.bin"
            }},
            "patch": {{
                "file": "delta.bin",
                "target_version": "1.21.4-r3",
                "digest": "{}",
                "output_digest": "{}"
            }},
            "runtime": {{
                "probe": ["target-vm", "--version"],
                "min_version": "21.0"
            }}
        }}"#,
        digest::sha256_hex(base_bytes),
        digest::sha256_hex(&patch_bytes),
        digest::sha256_hex(patched_bytes),
    );
    std::fs::write(bundle.join("patchway.json"), &json).unwrap();
    (Manifest::parse(&json).unwrap(), bundle)
}

fn make_launcher(
    manifest: Manifest,
    bundle: &Path,
    repo: &Path,
    fetcher: Box<dyn Fetcher>,
) -> Launcher {
    Launcher::new(manifest, bundle, ArtifactSource::new(fetcher, repo), repo)
}

// Scenario A: first launch patches and stores, second launch reuses the
// cached entry without fetching or re-patching.
#[tokio::test]
async fn full_launch_then_cached_relaunch() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"#!/bin/sh\nexec stock-server \"$@\"\n".repeat(64);
    let patched_bytes = b"#!/bin/sh\nexec custom-server \"$@\"\n".repeat(64);
    let (manifest, bundle) = write_bundle(dir.path(), &base_bytes, &patched_bytes);
    let expected_digest = digest::sha256_hex(&patched_bytes);

    let calls = Arc::new(AtomicU32::new(0));
    let repo = dir.path().join("repo");

    let first = make_launcher(
        manifest.clone(),
        &bundle,
        &repo,
        Box::new(CountingFetcher {
            payload: base_bytes.clone(),
            calls: calls.clone(),
        }),
    )
    .prepare(false)
    .await
    .unwrap();

    assert!(first.freshly_patched);
    assert_eq!(first.digest, expected_digest);
    assert_eq!(std::fs::read(&first.image_path).unwrap(), patched_bytes);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Fresh launcher process, same repo: must hit the cache and never
    // touch the network.
    let second = make_launcher(
        manifest,
        &bundle,
        &repo,
        Box::new(DeadFetcher {
            calls: calls.clone(),
        }),
    )
    .prepare(false)
    .await
    .unwrap();

    assert!(!second.freshly_patched);
    assert_eq!(second.digest, expected_digest);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// Scenario B: runtime below minimum never reaches the artifact source.
#[test]
fn old_runtime_diagnoses_without_touching_pipeline() {
    let decision = dispatch::decide(&FixedProbe(Some(RuntimeVersion::new(8, 0))), RuntimeVersion::new(21, 0));
    match &decision {
        Dispatch::DiagnosticExit { detected, required } => {
            assert_eq!(*detected, Some(RuntimeVersion::new(8, 0)));
            assert_eq!(*required, RuntimeVersion::new(21, 0));
        }
        other => panic!("expected DiagnosticExit, got {other:?}"),
    }
    let line = decision.diagnostic().unwrap();
    assert!(line.contains("8.0") && line.contains("21.0"));
}

#[cfg(unix)]
#[test]
fn command_probe_reads_real_process_output() {
    use patchway::dispatch::CommandProbe;

    let probe = CommandProbe::new(&[
        "sh".to_string(),
        "-c".to_string(),
        "echo 'mock-vm 21.0.2 (build 21.0.2+13)'".to_string(),
    ]);
    assert_eq!(probe.detect(), Some(RuntimeVersion::new(21, 0)));

    let missing = CommandProbe::new(&["definitely-not-a-real-binary-xyz".to_string()]);
    assert_eq!(missing.detect(), None);
}

// Scenario C: a dead remote exhausts the bounded retry budget and
// surfaces as Unavailable with the fetch-failure exit code.
#[tokio::test(start_paused = true)]
async fn dead_remote_exhausts_bounded_retries() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"stock".repeat(100);
    let patched_bytes = b"fixed".repeat(100);
    let (manifest, bundle) = write_bundle(dir.path(), &base_bytes, &patched_bytes);

    let calls = Arc::new(AtomicU32::new(0));
    let launcher = make_launcher(
        manifest,
        &bundle,
        &dir.path().join("repo"),
        Box::new(DeadFetcher {
            calls: calls.clone(),
        }),
    );

    let err = launcher.prepare(false).await.unwrap_err();
    assert!(matches!(err, LauncherError::Unavailable(_)));
    assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), FETCH_ATTEMPTS);
}

// A launcher upgrade (new patch digest) must ignore entries cached by
// the old patch and rebuild.
#[tokio::test]
async fn upgraded_patch_invalidates_old_cache() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"the stock artifact v1".repeat(64);
    let first_patched = b"customization round 1".repeat(64);
    let second_patched = b"customization round 2".repeat(64);
    let repo = dir.path().join("repo");

    let (manifest_v1, bundle_v1) = write_bundle(&dir.path().join("v1"), &base_bytes, &first_patched);
    make_launcher(
        manifest_v1,
        &bundle_v1,
        &repo,
        Box::new(CountingFetcher {
            payload: base_bytes.clone(),
            calls: Arc::new(AtomicU32::new(0)),
        }),
    )
    .prepare(false)
    .await
    .unwrap();

    let (manifest_v2, bundle_v2) = write_bundle(&dir.path().join("v2"), &base_bytes, &second_patched);
    let upgraded = make_launcher(
        manifest_v2,
        &bundle_v2,
        &repo,
        Box::new(CountingFetcher {
            payload: base_bytes.clone(),
            calls: Arc::new(AtomicU32::new(0)),
        }),
    )
    .prepare(false)
    .await
    .unwrap();

    assert!(upgraded.freshly_patched);
    assert_eq!(std::fs::read(&upgraded.image_path).unwrap(), second_patched);
}

// Corrupting the cached image on disk behaves like a miss: the next
// launch silently re-patches instead of handing off bad bytes.
#[tokio::test]
async fn tampered_cache_entry_triggers_repatch() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"original artifact".repeat(64);
    let patched_bytes = b"upgraded artifact".repeat(64);
    let (manifest, bundle) = write_bundle(dir.path(), &base_bytes, &patched_bytes);
    let repo = dir.path().join("repo");

    let launcher = make_launcher(
        manifest,
        &bundle,
        &repo,
        Box::new(CountingFetcher {
            payload: base_bytes.clone(),
            calls: Arc::new(AtomicU32::new(0)),
        }),
    );

    let first = launcher.prepare(false).await.unwrap();

    let mut bytes = std::fs::read(&first.image_path).unwrap();
    bytes[17] ^= 0xFF;
    std::fs::write(&first.image_path, &bytes).unwrap();

    let recovered = launcher.prepare(false).await.unwrap();
    assert!(recovered.freshly_patched);
    assert_eq!(std::fs::read(&recovered.image_path).unwrap(), patched_bytes);
}

// Two launchers racing on a cold cache both succeed and leave exactly
// one valid entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_launches_converge() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"shared stock bytes".repeat(256);
    let patched_bytes = b"shared fixed bytes".repeat(256);
    let (manifest, bundle) = write_bundle(dir.path(), &base_bytes, &patched_bytes);
    let repo = dir.path().join("repo");
    let expected_digest = digest::sha256_hex(&patched_bytes);

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let launcher = make_launcher(
            manifest.clone(),
            &bundle,
            &repo,
            Box::new(CountingFetcher {
                payload: base_bytes.clone(),
                calls: Arc::new(AtomicU32::new(0)),
            }),
        );
        tasks.push(tokio::spawn(async move { launcher.prepare(false).await }));
    }

    let mut image_paths = Vec::new();
    for task in tasks {
        let prepared = task.await.unwrap().unwrap();
        assert_eq!(prepared.digest, expected_digest);
        image_paths.push(prepared.image_path);
    }

    assert_eq!(image_paths[0], image_paths[1]);
    assert_eq!(std::fs::read(&image_paths[0]).unwrap(), patched_bytes);
}

// A patch aimed at a different base version must be rejected up front,
// with the integrity exit code.
#[tokio::test]
async fn version_mismatched_patch_is_integrity_failure() {
    let dir = TempDir::new().unwrap();
    let base_bytes = b"vN artifact bytes".repeat(64);
    let patched_bytes = b"vN customization!".repeat(64);
    let (_, bundle) = write_bundle(dir.path(), &base_bytes, &patched_bytes);

    // Rewrite the manifest so the patch claims a different target while
    // the base stays the same.
    let mut doctored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(bundle.join("patchway.json")).unwrap())
            .unwrap();
    doctored["patch"]["target_version"] = "1.21.3-r9".into();
    let manifest = Manifest::parse(&doctored.to_string()).unwrap();

    let launcher = make_launcher(
        manifest,
        &bundle,
        &dir.path().join("repo"),
        Box::new(CountingFetcher {
            payload: base_bytes.clone(),
            calls: Arc::new(AtomicU32::new(0)),
        }),
    );

    let err = launcher.prepare(false).await.unwrap_err();
    assert!(matches!(err, LauncherError::Integrity { .. }));
    assert_eq!(err.exit_code(), EXIT_INTEGRITY);
    let msg = err.to_string();
    assert!(msg.contains("1.21.3-r9") && msg.contains("1.21.4-r3"), "{msg}");
}
