//! Provisioning orchestrator.
//!
//! For a target OS, every configured binary is resolved against its
//! release index and installed into `<data_dir>/bin/<name>`. Binaries are
//! independent: a failure is recorded in that binary's report and the
//! others continue. Afterwards the launcher script is rendered for the
//! target OS. When the target is the host, the runtime directories are
//! created and the configured models are pulled through the launcher.
//!
//! Installs run on blocking threads and concurrently with each other,
//! since each touches only its own destination directory.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{BinaryConfig, Config};
use crate::error::ProvisionError;
use crate::install::{install, AssetSource};
use crate::launcher::{
    install_model, render_script, write_script, Launcher, ModelInstallReport, ModelRuntime,
};
use crate::models::{InstallTarget, ReleaseAsset};
use crate::platform::{HostOs, HostPlatform};
use crate::progress::ProgressReporter;
use crate::release::{first_match, resolve, ReleaseIndex};
use crate::runtime::RuntimeEnv;

/// One provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub target_os: HostOs,
    /// Release tag per binary name, overriding the configured version.
    pub version_overrides: BTreeMap<String, String>,
}

impl ProvisionRequest {
    pub fn new(target_os: HostOs) -> Self {
        Self {
            target_os,
            version_overrides: BTreeMap::new(),
        }
    }

    pub fn pin(mut self, binary: impl Into<String>, version: impl Into<String>) -> Self {
        self.version_overrides.insert(binary.into(), version.into());
        self
    }
}

#[derive(Debug)]
pub struct BinaryReport {
    pub name: String,
    pub destination: PathBuf,
    /// Asset that was installed, when resolution succeeded.
    pub asset: Option<ReleaseAsset>,
    pub error: Option<ProvisionError>,
}

impl BinaryReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct ModelReport {
    /// Role from the configuration (`embedding` or `llm`).
    pub role: String,
    pub install: ModelInstallReport,
}

#[derive(Debug)]
pub struct ProvisionReport {
    pub target_os: HostOs,
    pub binaries: Vec<BinaryReport>,
    pub launcher: Option<PathBuf>,
    pub launcher_error: Option<ProvisionError>,
    pub runtime_error: Option<ProvisionError>,
    pub models: Vec<ModelReport>,
    /// Set when model pulls were skipped, with the reason.
    pub models_skipped: Option<String>,
}

impl ProvisionReport {
    fn new(target_os: HostOs) -> Self {
        Self {
            target_os,
            binaries: Vec::new(),
            launcher: None,
            launcher_error: None,
            runtime_error: None,
            models: Vec::new(),
            models_skipped: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.binaries.iter().all(BinaryReport::is_success)
            && self.launcher_error.is_none()
            && self.runtime_error.is_none()
            && self.models.iter().all(|m| m.install.is_success())
    }

    /// Human-readable summary, one line per step.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Provisioning for {}:", self.target_os);
        for binary in &self.binaries {
            match (&binary.error, &binary.asset) {
                (None, Some(asset)) => {
                    let _ = writeln!(
                        out,
                        "  ok     {:<10} {} -> {}",
                        binary.name,
                        asset.name,
                        binary.destination.display()
                    );
                }
                (None, None) => {
                    let _ = writeln!(out, "  ok     {}", binary.name);
                }
                (Some(err), _) => {
                    let _ = writeln!(out, "  FAILED {:<10} {}", binary.name, err);
                }
            }
        }
        if let Some(path) = &self.launcher {
            let _ = writeln!(out, "  ok     launcher   {}", path.display());
        }
        if let Some(err) = &self.launcher_error {
            let _ = writeln!(out, "  FAILED launcher   {}", err);
        }
        if let Some(err) = &self.runtime_error {
            let _ = writeln!(out, "  FAILED runtime     {}", err);
        }
        for model in &self.models {
            let install = &model.install;
            let state = format!("{:?}", install.state);
            match (&install.error, install.is_success()) {
                (None, _) => {
                    let _ = writeln!(
                        out,
                        "  ok     {:<10} {} ({})",
                        model.role,
                        install.usable_name().unwrap_or(&install.reference),
                        state
                    );
                }
                (Some(err), true) => {
                    let _ = writeln!(
                        out,
                        "  warn   {:<10} {} ({}): {}",
                        model.role, install.reference, state, err
                    );
                }
                (Some(err), false) => {
                    let _ = writeln!(
                        out,
                        "  FAILED {:<10} {} ({}): {}",
                        model.role, install.reference, state, err
                    );
                }
            }
        }
        if let Some(reason) = &self.models_skipped {
            let _ = writeln!(out, "  skip   models     {}", reason);
        }
        out
    }
}

/// Sequences resolve, install, launcher generation, and model pulls.
pub struct Provisioner {
    config: Config,
    host: HostPlatform,
    index: Arc<dyn ReleaseIndex>,
    source: Arc<dyn AssetSource>,
    progress: Arc<dyn ProgressReporter>,
    runtime: Option<Arc<dyn ModelRuntime>>,
}

impl Provisioner {
    pub fn new(
        config: Config,
        host: HostPlatform,
        index: Arc<dyn ReleaseIndex>,
        source: Arc<dyn AssetSource>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            host,
            index,
            source,
            progress,
            runtime: None,
        }
    }

    /// Uses `runtime` for stop and model pulls instead of the generated launcher.
    pub fn with_model_runtime(mut self, runtime: Arc<dyn ModelRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn launcher_for(&self, os: HostOs) -> Launcher {
        let env = RuntimeEnv::from_config(&self.config, os);
        Launcher::new(
            self.config.launcher.script_path(&self.config.paths.bin_dir(), os),
            os,
            &env,
            Duration::from_secs(self.config.runtime.process_timeout_secs),
        )
    }

    fn model_runtime(&self) -> Arc<dyn ModelRuntime> {
        match &self.runtime {
            Some(runtime) => Arc::clone(runtime),
            None => Arc::new(self.launcher_for(self.host.os)),
        }
    }

    pub async fn run(&self, request: &ProvisionRequest) -> ProvisionReport {
        let target = request.target_os;
        let for_host = target == self.host.os;
        let mut report = ProvisionReport::new(target);
        info!(target = %target, host = %self.host.os, arch = %self.host.arch, "provisioning");

        if for_host {
            self.stop_running_runtime().await;
        }

        report.binaries = self.install_binaries(request).await;

        match self.generate_launcher(target) {
            Ok(path) => report.launcher = Some(path),
            Err(e) => {
                error!(error = %e, "launcher generation failed");
                report.launcher_error = Some(e);
            }
        }

        if !for_host {
            report.models_skipped = Some(format!(
                "target {} is not the host ({})",
                target, self.host.os
            ));
            return report;
        }

        let env = RuntimeEnv::from_config(&self.config, target);
        if let Err(e) = env.ensure_dirs() {
            error!(error = %e, "runtime directories could not be created");
            report.runtime_error = Some(e);
            return report;
        }

        let runtime_ok = report
            .binaries
            .iter()
            .find(|b| b.name == self.config.launcher.binary)
            .map(BinaryReport::is_success)
            .unwrap_or(false);
        if !runtime_ok || report.launcher_error.is_some() {
            report.models_skipped = Some("the model runtime is not installed".to_string());
            return report;
        }

        let runtime = self.model_runtime();
        for (role, spec) in self.config.models.auto_pull() {
            let install = install_model(runtime.as_ref(), &spec.pull, spec.name.as_deref()).await;
            if install.is_success() {
                info!(role, reference = %spec.pull, state = ?install.state, "model ready");
            } else {
                warn!(role, reference = %spec.pull, state = ?install.state, "model install incomplete");
            }
            report.models.push(ModelReport {
                role: role.to_string(),
                install,
            });
        }
        report
    }

    async fn stop_running_runtime(&self) {
        if self.runtime.is_none() && !self.launcher_for(self.host.os).exists() {
            return;
        }
        if let Err(e) = self.model_runtime().stop().await {
            debug!(error = %e, "runtime stop before provisioning failed; continuing");
        }
    }

    async fn install_binaries(&self, request: &ProvisionRequest) -> Vec<BinaryReport> {
        let bin_root = self.config.paths.bin_dir();
        let mut tasks = Vec::new();

        for (name, binary) in &self.config.binaries {
            let version = request
                .version_overrides
                .get(name)
                .cloned()
                .or_else(|| binary.version.clone());
            let job = BinaryJob {
                name: name.clone(),
                binary: binary.clone(),
                version,
                os: request.target_os,
                arch: self.host.arch.clone(),
                destination: bin_root.join(name),
                archive_types: self.config.releases.archive_types.clone(),
            };
            let index = Arc::clone(&self.index);
            let source = Arc::clone(&self.source);
            let progress = Arc::clone(&self.progress);
            let destination = job.destination.clone();
            let name = name.clone();

            tasks.push(async move {
                let joined = tokio::task::spawn_blocking(move || {
                    job.run(index.as_ref(), source.as_ref(), progress.as_ref())
                })
                .await;
                let (asset, error) = match joined {
                    Ok(Ok(asset)) => (Some(asset), None),
                    Ok(Err(e)) => (None, Some(e)),
                    Err(e) => (
                        None,
                        Some(ProvisionError::io(
                            "install task aborted",
                            std::io::Error::other(e.to_string()),
                        )),
                    ),
                };
                if let Some(e) = &error {
                    error!(binary = %name, error = %e, "provisioning failed");
                }
                BinaryReport {
                    name,
                    destination,
                    asset,
                    error,
                }
            });
        }

        futures::future::join_all(tasks).await
    }

    fn generate_launcher(&self, os: HostOs) -> Result<PathBuf, ProvisionError> {
        let env = RuntimeEnv::from_config(&self.config, os);
        let body = render_script(self.config.launcher.template(os), &env)?;
        let path = self
            .config
            .launcher
            .script_path(&self.config.paths.bin_dir(), os);
        write_script(&path, &body, os)?;
        info!(path = %path.display(), "launcher ready");
        Ok(path)
    }
}

/// Owned inputs for one binary install on a blocking thread.
struct BinaryJob {
    name: String,
    binary: BinaryConfig,
    version: Option<String>,
    os: HostOs,
    arch: String,
    destination: PathBuf,
    archive_types: Vec<String>,
}

impl BinaryJob {
    fn run(
        &self,
        index: &dyn ReleaseIndex,
        source: &dyn AssetSource,
        progress: &dyn ProgressReporter,
    ) -> Result<ReleaseAsset, ProvisionError> {
        let key = self
            .binary
            .match_key(self.os, &self.arch)
            .ok_or_else(|| ProvisionError::NoMatchKey {
                binary: self.name.clone(),
                os: self.os.to_string(),
                arch: self.arch.clone(),
            })?;

        let assets = resolve(
            index,
            &self.binary.owner,
            &self.binary.project,
            self.version.as_deref(),
            &self.archive_types,
        )?;
        let asset = first_match(key, &assets)
            .cloned()
            .ok_or_else(|| ProvisionError::NoAssetResolved {
                project: self.binary.project.clone(),
                key: key.to_string(),
                candidates: assets.len(),
            })?;
        info!(binary = %self.name, asset = %asset.name, "resolved release asset");

        install(
            source,
            &InstallTarget::new(asset.download_url.clone(), &self.destination),
            progress,
        )?;
        Ok(asset)
    }
}
