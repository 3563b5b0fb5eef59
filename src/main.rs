use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use patchway::dispatch::{self, CommandProbe, Dispatch};
use patchway::error::{LauncherResult, EXIT_RUNTIME_TOO_OLD};
use patchway::extensions::EnvExportFramework;
use patchway::launcher::Launcher;
use patchway::manifest::{Manifest, MANIFEST_FILE};
use patchway::source::{ArtifactSource, HttpFetcher};

#[derive(Parser)]
#[command(name = "patchway", about = "Self-patching launcher: fetch, patch, cache, hand off.")]
struct Cli {
    /// Directory for fetched bases and patched artifacts
    #[arg(long, default_value = ".patchway")]
    repo_dir: PathBuf,

    /// Manifest path (defaults to patchway.json next to the executable)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Stop after the patched artifact is cached; do not launch
    #[arg(long)]
    patch_only: bool,

    /// Ignore the cache and re-patch from scratch
    #[arg(long)]
    force_refresh: bool,

    /// Arguments passed verbatim to the target program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("patchway=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            eprintln!("patchway: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> LauncherResult<()> {
    let manifest_path = match cli.manifest {
        Some(path) => path,
        None => default_manifest_path(),
    };
    let manifest = Manifest::load(&manifest_path)?;
    let manifest_dir = manifest_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    // Capability gate, before any network or cache activity. An
    // incompatible runtime is the common real-world failure and gets a
    // friendly one-liner, not a stack of pipeline errors.
    let probe = CommandProbe::new(&manifest.runtime.probe);
    let decision = dispatch::decide(&probe, manifest.min_runtime()?);
    if let Some(diagnostic) = decision.diagnostic() {
        eprintln!("patchway: {diagnostic}");
        std::process::exit(EXIT_RUNTIME_TOO_OLD);
    }
    if let Dispatch::Delegate { detected } = &decision {
        info!("hosting runtime capability {detected}");
    }

    let source = ArtifactSource::new(Box::new(HttpFetcher::new()), &cli.repo_dir);
    let launcher = Launcher::new(manifest, &manifest_dir, source, &cli.repo_dir);

    let prepared = launcher.prepare(cli.force_refresh).await?;
    if cli.patch_only {
        info!("patch-only run complete, image at {}", prepared.image_path.display());
        return Ok(());
    }

    launcher.setup_extensions(&EnvExportFramework)?;

    // Does not return on the success path.
    launcher.hand_off(&prepared, &cli.args)
}

/// patchway.json next to the launcher executable, falling back to the
/// working directory when the executable path is unavailable.
fn default_manifest_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(MANIFEST_FILE)))
        .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE))
}
