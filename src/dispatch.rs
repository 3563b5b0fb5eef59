//! Bootstrap dispatcher — the version-gated first stage.
//!
//! Probes the hosting runtime before anything touches the network or
//! disk, and either delegates to the full launcher or produces a
//! friendly "runtime too old" diagnostic with its own exit code. This
//! stage deliberately depends on nothing but process spawning and
//! string parsing, so it works even where the rest of the pipeline
//! could not.

use tracing::debug;

use crate::manifest::RuntimeVersion;

/// Probes the hosting runtime's capability level. Swappable in tests.
pub trait RuntimeProbe {
    /// `None` when the runtime cannot be found or queried at all.
    fn detect(&self) -> Option<RuntimeVersion>;
}

/// Runs the manifest's probe command and parses a version out of its
/// output (stdout first, then stderr — some runtimes report there).
pub struct CommandProbe {
    command: Vec<String>,
}

impl CommandProbe {
    pub fn new(command: &[String]) -> Self {
        Self {
            command: command.to_vec(),
        }
    }
}

impl RuntimeProbe for CommandProbe {
    fn detect(&self) -> Option<RuntimeVersion> {
        let (program, args) = self.command.split_first()?;
        let output = std::process::Command::new(program).args(args).output().ok()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_version_output(&stdout).or_else(|| parse_version_output(&stderr))
    }
}

/// Pull the first thing that looks like a version number out of probe
/// output such as `openjdk 21.0.2 2024-01-16` or `target-vm v8.5`.
pub fn parse_version_output(output: &str) -> Option<RuntimeVersion> {
    for token in output.split_whitespace() {
        let token = token.trim_start_matches(['v', 'V']).trim_matches('"');
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            if let Ok(version) = token.parse::<RuntimeVersion>() {
                return Some(version);
            }
        }
    }
    None
}

/// Outcome of the probing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Runtime is capable enough; hand over to the full launcher.
    Delegate { detected: RuntimeVersion },
    /// Runtime missing or below minimum; print the diagnostic and stop.
    DiagnosticExit {
        detected: Option<RuntimeVersion>,
        required: RuntimeVersion,
    },
}

impl Dispatch {
    /// The human-readable line printed on the diagnostic path, naming
    /// both the detected and the required capability levels.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Dispatch::Delegate { .. } => None,
            Dispatch::DiagnosticExit { detected, required } => {
                let detected = match detected {
                    Some(v) => v.to_string(),
                    None => "none (runtime not found)".into(),
                };
                Some(format!(
                    "hosting runtime is too old to launch: detected {detected}, required {required} or newer"
                ))
            }
        }
    }
}

/// Decide between diagnostic-exit and full-launch.
pub fn decide(probe: &dyn RuntimeProbe, required: RuntimeVersion) -> Dispatch {
    match probe.detect() {
        Some(detected) if detected >= required => {
            debug!("runtime capability {detected} satisfies minimum {required}");
            Dispatch::Delegate { detected }
        }
        detected => Dispatch::DiagnosticExit { detected, required },
    }
}
