//! # RAG Harness CLI (`rag`)
//!
//! The `rag` binary provisions the local toolchain, drives the model
//! runtime through its launcher, and extracts documents.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag setup` | Install the configured binaries, write the launcher, pull models |
//! | `rag extract <paths..>` | Extract files and directories into content units |
//! | `rag models list` | List models known to the runtime |
//! | `rag models pull <ref> [name]` | Pull a model and optionally re-tag it |
//! | `rag models rm <name>` | Remove a model |
//! | `rag models fetch <ref>` | Pull a model as a background task |
//! | `rag env` | Print the runtime environment |
//!
//! ## Examples
//!
//! ```bash
//! # Provision for this machine
//! rag setup
//!
//! # Prepare a bundle for a Windows machine, pinning the converter
//! rag setup --os windows --pin pandoc=3.1.11
//!
//! # Extract a docs folder as JSON
//! rag extract ./docs --json > units.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rag_harness::batch::extract_batch;
use rag_harness::config::{self, Config};
use rag_harness::install::HttpSource;
use rag_harness::launcher::{install_model, Launcher, ModelRuntime};
use rag_harness::platform::{HostOs, HostPlatform};
use rag_harness::progress::{ProgressMode, ProgressReporter};
use rag_harness::provision::{ProvisionRequest, Provisioner};
use rag_harness::release::GitHubReleases;
use rag_harness::router::default_router;
use rag_harness::runtime::RuntimeEnv;
use rag_harness::scan::scan_paths;
use rag_harness::workers::{download_model, TaskRunner};

/// RAG Harness CLI: local toolchain provisioning and document extraction.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: provision a local model runtime and extract documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Log at debug level instead of info (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured binaries and generate the launcher.
    ///
    /// When the target OS is this machine, the runtime directories are
    /// created and the configured models are pulled afterwards.
    Setup {
        /// Target OS (`linux`, `darwin`, `windows`). Defaults to the host.
        #[arg(long)]
        os: Option<HostOs>,

        /// Release tag for the document converter.
        #[arg(long)]
        pandoc_version: Option<String>,

        /// Release tag for the model runtime.
        #[arg(long)]
        ollama_version: Option<String>,

        /// Release tag for any configured binary, as `name=version`.
        #[arg(long = "pin", value_parser = parse_key_val)]
        pins: Vec<(String, String)>,
    },

    /// Extract files into content units.
    ///
    /// Directories are walked recursively using the configured globs.
    /// Each file succeeds or fails on its own.
    Extract {
        /// Files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print the full report as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Include glob for directory inputs, replacing the configured ones.
        #[arg(long = "glob")]
        globs: Vec<String>,
    },

    /// Manage models through the launcher.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Print the environment the runtime is launched with.
    Env {
        /// Target OS. Defaults to the host.
        #[arg(long)]
        os: Option<HostOs>,
    },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// List models in the local store.
    List,
    /// Pull a model, then re-tag it under `name` if given.
    Pull {
        reference: String,
        name: Option<String>,
    },
    /// Remove a model from the local store.
    Rm { name: String },
    /// Pull a model as a background task and wait for its status.
    Fetch { reference: String },
}

/// Parse a `key=value` pair for `--pin` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let host = HostPlatform::detect()?;
    debug!(os = %host.os, arch = %host.arch, config = %cli.config.display(), "starting");
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Setup {
            os,
            pandoc_version,
            ollama_version,
            pins,
        } => {
            let named = pandoc_version
                .map(|v| ("--pandoc-version", "pandoc".to_string(), v))
                .into_iter()
                .chain(
                    ollama_version
                        .map(|v| ("--ollama-version", cfg.launcher.binary.clone(), v)),
                )
                .chain(pins.into_iter().map(|(name, v)| ("--pin", name, v)));

            let mut request = ProvisionRequest::new(os.unwrap_or(host.os));
            for (flag, name, version) in named {
                if !cfg.binaries.contains_key(&name) {
                    bail!("{} {}: not a configured binary", flag, name);
                }
                request = request.pin(name, version);
            }
            run_setup(cfg, host, progress, &request).await?;
        }
        Commands::Extract { paths, json, globs } => {
            let mut cfg = cfg;
            if !globs.is_empty() {
                cfg.extraction.include_globs = globs;
            }
            run_extract(&cfg, host.os, &paths, json).await?;
        }
        Commands::Models { action } => {
            run_models(&cfg, host.os, action).await?;
        }
        Commands::Env { os } => {
            let env = RuntimeEnv::from_config(&cfg, os.unwrap_or(host.os));
            for (key, value) in env.vars() {
                println!("{}={}", key, value.to_string_lossy());
            }
        }
    }

    Ok(())
}

async fn run_setup(
    cfg: Config,
    host: HostPlatform,
    progress: ProgressMode,
    request: &ProvisionRequest,
) -> Result<()> {
    let download_timeout = match cfg.releases.download_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let index = GitHubReleases::new(&cfg.releases)?;
    let source = HttpSource::new(download_timeout)?;
    let reporter: Arc<dyn ProgressReporter> = Arc::from(progress.reporter());

    let provisioner = Provisioner::new(cfg, host, Arc::new(index), Arc::new(source), reporter);
    let report = provisioner.run(request).await;
    print!("{}", report.summary());

    if !report.is_success() {
        bail!("provisioning for {} did not complete", report.target_os);
    }
    Ok(())
}

async fn run_extract(cfg: &Config, os: HostOs, inputs: &[PathBuf], json: bool) -> Result<()> {
    let files = scan_paths(inputs, &cfg.extraction)?;
    let router = default_router(cfg, os)?;
    let report = extract_batch(Arc::new(router), files, cfg.extraction.concurrency).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    for result in &report.results {
        match result.outcome.error() {
            None => println!(
                "ok      {} ({} units)",
                result.path.display(),
                result.outcome.units().len()
            ),
            Some(kind) => println!("failed  {} ({})", result.path.display(), kind),
        }
    }
    println!(
        "{} of {} files extracted, {} units",
        report.succeeded(),
        report.results.len(),
        report.total_units()
    );
    Ok(())
}

fn host_launcher(cfg: &Config, os: HostOs) -> Result<Launcher> {
    let env = RuntimeEnv::from_config(cfg, os);
    let launcher = Launcher::new(
        cfg.launcher.script_path(&cfg.paths.bin_dir(), os),
        os,
        &env,
        Duration::from_secs(cfg.runtime.process_timeout_secs),
    );
    if !launcher.exists() {
        bail!(
            "launcher not found at {}; run `rag setup` first",
            launcher.script().display()
        );
    }
    Ok(launcher)
}

async fn run_models(cfg: &Config, os: HostOs, action: ModelsAction) -> Result<()> {
    let launcher = host_launcher(cfg, os)?;

    match action {
        ModelsAction::List => {
            print!("{}", launcher.list().await?);
        }
        ModelsAction::Pull { reference, name } => {
            let report = install_model(&launcher, &reference, name.as_deref()).await;
            if let Some(err) = &report.error {
                eprintln!("warning: {}", err);
            }
            if !report.is_success() {
                bail!("model {} not installed ({:?})", reference, report.state);
            }
            println!(
                "{} ready ({:?})",
                report.usable_name().unwrap_or(&reference),
                report.state
            );
        }
        ModelsAction::Rm { name } => {
            launcher.remove(&name).await?;
            println!("removed {}", name);
        }
        ModelsAction::Fetch { reference } => {
            let mut runner = TaskRunner::new();
            download_model(&runner, Arc::new(launcher), &reference);
            println!("fetching {} in the background...", reference);
            let status = runner
                .next()
                .await
                .context("background task queue closed")?;
            println!(
                "{}",
                serde_json::to_string(&status).context("Failed to serialize status")?
            );
            if !status.is_success() {
                bail!("download of {} exited with {}", reference, status.code);
            }
        }
    }
    Ok(())
}
