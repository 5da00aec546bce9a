//! Launcher scripts and the model install protocol.
//!
//! The launcher is a small per-OS script rendered from a configured
//! template. It wraps the runtime executable with the runtime environment
//! and forwards its arguments, so `launcher pull <ref>` behaves like the
//! runtime's own `pull` verb. Unix scripts are run through `bash`; Windows
//! batch files are run directly.
//!
//! Installing a model is three invocations: `pull <ref>`, `cp <ref> <name>`,
//! `rm <ref>`. They are not atomic, so [`install_model`] tracks how far it
//! got in a [`ModelInstallState`] and reports each failure distinctly.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};
use upon::Engine;

use crate::error::{LauncherError, ProvisionError};
use crate::platform::HostOs;
use crate::runtime::RuntimeEnv;

// ═══════════════════════════════════════════════════════════════════════
// Script generation
// ═══════════════════════════════════════════════════════════════════════

/// Renders a launcher template.
///
/// Templates may reference `bin_dir`, `models_dir`, `home_dir`, and `host`,
/// e.g. `exec "{{ bin_dir }}/ollama" "$@"`.
pub fn render_script(template: &str, env: &RuntimeEnv) -> Result<String, ProvisionError> {
    let engine = Engine::new();
    let compiled = engine
        .compile(template.to_string())
        .map_err(|e| ProvisionError::Template(e.to_string()))?;
    compiled
        .render(
            &engine,
            upon::value! {
                bin_dir: env.bin_dir.display().to_string(),
                models_dir: env.models_dir.display().to_string(),
                home_dir: env.home_dir.display().to_string(),
                host: env.host.clone(),
            },
        )
        .to_string()
        .map_err(|e| ProvisionError::Template(e.to_string()))
}

/// Writes the launcher to `path`, marking it executable for `os` when on unix.
pub fn write_script(path: &Path, body: &str, os: HostOs) -> Result<(), ProvisionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ProvisionError::io_at("create", parent, e))?;
    }
    let body = if os.is_unix() {
        body.replace("\r\n", "\n")
    } else {
        body.to_string()
    };
    fs::write(path, body).map_err(|e| ProvisionError::io_at("write", path, e))?;

    #[cfg(unix)]
    if os.is_unix() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| ProvisionError::io_at("chmod", path, e))?;
    }
    debug!(path = %path.display(), "wrote launcher script");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Invocation
// ═══════════════════════════════════════════════════════════════════════

/// Runs verbs through a generated launcher script.
#[derive(Debug, Clone)]
pub struct Launcher {
    script: PathBuf,
    os: HostOs,
    env: Vec<(String, OsString)>,
    timeout: Duration,
}

impl Launcher {
    pub fn new(script: PathBuf, os: HostOs, env: &RuntimeEnv, timeout: Duration) -> Self {
        Self {
            script,
            os,
            env: env.vars(),
            timeout,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn exists(&self) -> bool {
        self.script.is_file()
    }

    fn program_and_args(&self, args: &[&str]) -> (OsString, Vec<OsString>) {
        let mut argv: Vec<OsString> = Vec::with_capacity(args.len() + 1);
        let program = if self.os.is_unix() {
            argv.push(self.script.clone().into_os_string());
            OsString::from("bash")
        } else {
            self.script.clone().into_os_string()
        };
        argv.extend(args.iter().map(OsString::from));
        (program, argv)
    }

    /// Runs `args` and returns combined stdout/stderr. Exceeding the
    /// timeout kills the process and yields
    /// [`LauncherError::ExternalProcessTimeout`].
    pub async fn run(&self, args: &[&str]) -> Result<String, LauncherError> {
        let verb = args.first().copied().unwrap_or_default().to_string();
        let (program, argv) = self.program_and_args(args);
        debug!(script = %self.script.display(), ?args, "running launcher");

        let child = tokio::process::Command::new(&program)
            .args(&argv)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_os_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LauncherError::Spawn {
                verb: verb.clone(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| LauncherError::Spawn {
                verb: verb.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(verb = %verb, timeout_secs = self.timeout.as_secs(), "launcher timed out");
                return Err(LauncherError::ExternalProcessTimeout {
                    verb,
                    timeout: self.timeout,
                });
            }
        };

        collect_output(verb, output)
    }

    /// Runs `args` on the calling thread without a timeout.
    pub fn run_blocking(&self, args: &[&str]) -> Result<String, LauncherError> {
        let verb = args.first().copied().unwrap_or_default().to_string();
        let (program, argv) = self.program_and_args(args);
        let output = std::process::Command::new(&program)
            .args(&argv)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_os_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| LauncherError::Spawn {
                verb: verb.clone(),
                reason: e.to_string(),
            })?;

        collect_output(verb, output)
    }

    pub async fn list(&self) -> Result<String, LauncherError> {
        self.run(&["list"]).await
    }
}

fn collect_output(verb: String, output: std::process::Output) -> Result<String, LauncherError> {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(text)
    } else {
        Err(LauncherError::Failed {
            verb,
            code: output.status.code(),
            output: text,
        })
    }
}

/// The three verbs of the model install protocol.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn pull(&self, reference: &str) -> Result<(), LauncherError>;
    async fn copy(&self, reference: &str, name: &str) -> Result<(), LauncherError>;
    async fn remove(&self, reference: &str) -> Result<(), LauncherError>;

    /// Asks a running runtime to stop. Used before re-provisioning.
    async fn stop(&self) -> Result<(), LauncherError> {
        Ok(())
    }
}

#[async_trait]
impl ModelRuntime for Launcher {
    async fn pull(&self, reference: &str) -> Result<(), LauncherError> {
        self.run(&["pull", reference]).await.map(|_| ())
    }

    async fn copy(&self, reference: &str, name: &str) -> Result<(), LauncherError> {
        self.run(&["cp", reference, name]).await.map(|_| ())
    }

    async fn remove(&self, reference: &str) -> Result<(), LauncherError> {
        self.run(&["rm", reference]).await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), LauncherError> {
        self.run(&["stop"]).await.map(|_| ())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Model install state machine
// ═══════════════════════════════════════════════════════════════════════

/// How far a model install got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelInstallState {
    NotStarted,
    Pulled,
    Tagged,
    OriginalRemoved,
    /// Tagged, but the original reference could not be removed after a
    /// retry. Both names exist; the model is usable under its friendly name.
    DuplicateRetained,
}

#[derive(Debug, Clone)]
pub struct ModelInstallReport {
    pub reference: String,
    pub name: Option<String>,
    pub state: ModelInstallState,
    /// The failure that stopped the sequence, or the cleanup failure for
    /// [`ModelInstallState::DuplicateRetained`].
    pub error: Option<LauncherError>,
}

impl ModelInstallReport {
    /// True when the model is usable under its intended name.
    pub fn is_success(&self) -> bool {
        match self.state {
            ModelInstallState::NotStarted | ModelInstallState::Tagged => false,
            ModelInstallState::Pulled => self.name.is_none(),
            ModelInstallState::OriginalRemoved | ModelInstallState::DuplicateRetained => true,
        }
    }

    /// Name the model can be used under, if any.
    pub fn usable_name(&self) -> Option<&str> {
        match self.state {
            ModelInstallState::NotStarted => None,
            ModelInstallState::Pulled => Some(&self.reference),
            _ => self.name.as_deref().or(Some(&self.reference)),
        }
    }
}

/// Pulls `reference`, then tags it as `name` and removes the original.
///
/// A failed pull stops before any other step. When `name` is `None` the
/// model is only pulled. A failed `rm` is retried once; if it fails again
/// the report ends in [`ModelInstallState::DuplicateRetained`].
pub async fn install_model(
    runtime: &dyn ModelRuntime,
    reference: &str,
    name: Option<&str>,
) -> ModelInstallReport {
    let mut report = ModelInstallReport {
        reference: reference.to_string(),
        name: name.map(str::to_string),
        state: ModelInstallState::NotStarted,
        error: None,
    };

    info!(reference, "pulling model");
    if let Err(e) = runtime.pull(reference).await {
        report.error = Some(e);
        return report;
    }
    report.state = ModelInstallState::Pulled;

    let Some(name) = name else {
        return report;
    };
    if name == reference {
        report.state = ModelInstallState::OriginalRemoved;
        return report;
    }

    if let Err(e) = runtime.copy(reference, name).await {
        report.error = Some(e);
        return report;
    }
    report.state = ModelInstallState::Tagged;

    match runtime.remove(reference).await {
        Ok(()) => report.state = ModelInstallState::OriginalRemoved,
        Err(first) => {
            warn!(reference, error = %first, "removing original reference failed; retrying");
            match runtime.remove(reference).await {
                Ok(()) => report.state = ModelInstallState::OriginalRemoved,
                Err(second) => {
                    warn!(reference, tag = name, "original reference retained alongside tagged copy");
                    report.state = ModelInstallState::DuplicateRetained;
                    report.error = Some(second);
                }
            }
        }
    }
    report
}
