//! Runtime extension setup — orders the bundled transform descriptors
//! and installs them into the external transform framework before the
//! target program loads any code.
//!
//! The framework itself is opaque behind [`TransformFramework`]; this
//! module only guarantees that every payload exists, that the order
//! respects declared dependencies, and that a setup failure aborts the
//! launch. Running the target without its transforms is never allowed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LauncherError, LauncherResult};
use crate::manifest::TransformDescriptor;

/// Environment variable the ordered transform list is exported under.
/// Format: `name=payload_path` entries joined by `;`.
pub const TRANSFORMS_ENV: &str = "PATCHWAY_TRANSFORMS";

/// Boundary to the external code-transform framework.
pub trait TransformFramework {
    /// Install an ordered list of transforms. The list is already
    /// dependency-sorted and every payload path exists.
    fn install(&self, transforms: &[ResolvedTransform]) -> LauncherResult<()>;
}

/// A descriptor whose payload path has been resolved and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransform {
    pub name: String,
    pub payload: PathBuf,
}

/// Production framework: exports the ordered list into the launcher's
/// environment, which the exec'd target inherits and the in-process
/// framework reads at startup.
pub struct EnvExportFramework;

impl TransformFramework for EnvExportFramework {
    fn install(&self, transforms: &[ResolvedTransform]) -> LauncherResult<()> {
        let value = transforms
            .iter()
            .map(|t| format!("{}={}", t.name, t.payload.display()))
            .collect::<Vec<_>>()
            .join(";");
        std::env::set_var(TRANSFORMS_ENV, &value);
        info!("installed {} transform(s)", transforms.len());
        Ok(())
    }
}

/// Order descriptors so every transform comes after the ones it
/// requires. Deterministic: ties break in declaration order.
pub fn resolve_order(
    transforms: &[TransformDescriptor],
) -> LauncherResult<Vec<TransformDescriptor>> {
    let by_name: HashMap<&str, &TransformDescriptor> = transforms
        .iter()
        .map(|t| (t.name.as_str(), t))
        .collect();

    let mut ordered = Vec::with_capacity(transforms.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a TransformDescriptor>,
        done: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
        ordered: &mut Vec<TransformDescriptor>,
    ) -> LauncherResult<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !in_progress.insert(name) {
            return Err(LauncherError::ExtensionSetup {
                descriptor: name.to_string(),
                reason: "dependency cycle".into(),
            });
        }

        let descriptor = by_name[name];
        for dep in &descriptor.requires {
            if !by_name.contains_key(dep.as_str()) {
                return Err(LauncherError::ExtensionSetup {
                    descriptor: name.to_string(),
                    reason: format!("requires unknown transform '{dep}'"),
                });
            }
            visit(dep, by_name, done, in_progress, ordered)?;
        }

        in_progress.remove(name);
        done.insert(name);
        ordered.push(descriptor.clone());
        Ok(())
    }

    for t in transforms {
        visit(&t.name, &by_name, &mut done, &mut in_progress, &mut ordered)?;
    }
    Ok(ordered)
}

/// Verify payloads, order by dependency, and hand the list to the
/// framework. Must succeed before handoff; any error here is fatal.
pub fn install(
    manifest_dir: &Path,
    transforms: &[TransformDescriptor],
    framework: &dyn TransformFramework,
) -> LauncherResult<()> {
    if transforms.is_empty() {
        debug!("no transforms declared, skipping extension setup");
        return Ok(());
    }

    let ordered = resolve_order(transforms)?;

    let mut resolved = Vec::with_capacity(ordered.len());
    for t in &ordered {
        let payload = manifest_dir.join(&t.payload);
        if !payload.is_file() {
            return Err(LauncherError::ExtensionSetup {
                descriptor: t.name.clone(),
                reason: format!("payload {} not found", payload.display()),
            });
        }
        resolved.push(ResolvedTransform {
            name: t.name.clone(),
            payload,
        });
    }

    framework.install(&resolved)
}
