//! Handoff — the point where the launcher's process becomes the target
//! program.
//!
//! The patched image is validated, marked executable, and control is
//! transferred with the original argument vector: `exec` on unix (never
//! returns on success), spawn-and-exit elsewhere. The target runs from
//! its own on-disk image with a fresh argv, so nothing of the
//! launcher's state leaks into it beyond the environment it was meant
//! to inherit.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{LauncherError, LauncherResult};

/// Image formats the launcher knows how to hand off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// ELF, Mach-O or PE native executable.
    Native,
    /// `#!` interpreter script.
    Script,
    /// Zip-based archive (jar-style), launched through the runner.
    Archive,
}

/// Sanity-check the first bytes of a patched image. A blob that is
/// empty or matches no known format will never resolve to an entry
/// point, so it is rejected before any exec attempt.
pub fn classify_image(bytes: &[u8]) -> LauncherResult<ImageKind> {
    if bytes.is_empty() {
        return Err(LauncherError::CorruptArtifact("image is empty".into()));
    }
    match bytes {
        [0x7f, b'E', b'L', b'F', ..] => Ok(ImageKind::Native),
        [0xfe, 0xed, 0xfa, ..] | [0xcf, 0xfa, 0xed, 0xfe, ..] => Ok(ImageKind::Native),
        [b'M', b'Z', ..] => Ok(ImageKind::Native),
        [b'#', b'!', ..] => Ok(ImageKind::Script),
        [b'P', b'K', 0x03, 0x04, ..] => Ok(ImageKind::Archive),
        _ => Err(LauncherError::CorruptArtifact(format!(
            "unrecognized image format (leading bytes {:02x?})",
            &bytes[..bytes.len().min(4)]
        ))),
    }
}

/// Build the argument vector for the target: the runner prefix from the
/// manifest (if any), the image path, then the original program
/// arguments unchanged.
fn build_command(runner: &[String], image: &Path, args: &[String]) -> LauncherResult<Command> {
    let mut argv: Vec<String> = runner.to_vec();
    argv.push(image.display().to_string());
    argv.extend_from_slice(args);

    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| LauncherError::CorruptArtifact("empty handoff command".into()))?;
    let mut command = Command::new(program);
    command.args(rest);
    Ok(command)
}

/// Transfer control to the patched image. Does not return on the
/// success path on unix; elsewhere it exits with the child's status.
pub fn invoke(image: &Path, runner: &[String], args: &[String]) -> LauncherResult<()> {
    let head = read_head(image)?;
    let kind = classify_image(&head)?;

    if kind != ImageKind::Archive && runner.is_empty() {
        make_executable(image)?;
    }

    let mut command = build_command(runner, image, args)?;
    info!("handing off to {} ({kind:?})", image.display());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec replaces this process; reaching the next line is failure
        let err = command.exec();
        Err(LauncherError::CorruptArtifact(format!(
            "exec of {} failed: {err}",
            image.display()
        )))
    }

    #[cfg(not(unix))]
    {
        let status = command
            .status()
            .map_err(|e| LauncherError::CorruptArtifact(format!("spawn failed: {e}")))?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

fn read_head(image: &Path) -> LauncherResult<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(image)?;
    let mut head = vec![0u8; 8];
    let n = file.read(&mut head)?;
    head.truncate(n);
    Ok(head)
}

#[cfg(unix)]
fn make_executable(image: &Path) -> LauncherResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(image)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(image, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_image: &Path) -> LauncherResult<()> {
    Ok(())
}
