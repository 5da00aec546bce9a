//! TOML configuration, loaded once at startup.
//!
//! See `config/rag.example.toml` for an annotated example. Platform match
//! keys and launcher templates are data, so supporting a new platform is a
//! configuration change rather than a code change.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::platform::HostOs;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub releases: ReleasesConfig,
    #[serde(default)]
    pub binaries: BTreeMap<String, BinaryConfig>,
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl PathsConfig {
    /// Shared root under which every managed binary gets its own directory.
    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReleasesConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Suffix allow-list applied to release asset names.
    #[serde(default = "default_archive_types")]
    pub archive_types: Vec<String>,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
    /// Whole-transfer timeout for asset downloads; 0 disables it.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for ReleasesConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            archive_types: default_archive_types(),
            timeout_secs: default_index_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_archive_types() -> Vec<String> {
    vec![
        ".zip".to_string(),
        ".tar.gz".to_string(),
        ".tgz".to_string(),
        ".tar.bz2".to_string(),
    ]
}
fn default_index_timeout() -> u64 {
    30
}
fn default_download_timeout() -> u64 {
    3600
}

/// One managed third-party binary (e.g. the model runtime or the converter).
#[derive(Debug, Deserialize, Clone)]
pub struct BinaryConfig {
    pub owner: String,
    pub project: String,
    /// Pinned release tag; latest when absent. The CLI may override it.
    #[serde(default)]
    pub version: Option<String>,
    /// Substring keys selecting the asset, keyed by `"<os>-<arch>"` or `"<os>"`.
    #[serde(default)]
    pub match_keys: BTreeMap<String, String>,
}

impl BinaryConfig {
    /// Looks up the asset match key, preferring the most specific entry.
    pub fn match_key(&self, os: HostOs, arch: &str) -> Option<&str> {
        self.match_keys
            .get(&format!("{}-{}", os, arch))
            .or_else(|| self.match_keys.get(os.as_str()))
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LauncherConfig {
    /// Name of the binary (a key of `[binaries]`) the launcher drives.
    #[serde(default = "default_launcher_binary")]
    pub binary: String,
    /// File stem of the generated script; the extension follows the OS.
    #[serde(default = "default_launcher_stem")]
    pub stem: String,
    pub linux: String,
    pub darwin: String,
    pub windows: String,
}

fn default_launcher_binary() -> String {
    "ollama".to_string()
}
fn default_launcher_stem() -> String {
    "ollama_portable".to_string()
}

impl LauncherConfig {
    pub fn template(&self, os: HostOs) -> &str {
        match os {
            HostOs::Linux => &self.linux,
            HostOs::Darwin => &self.darwin,
            HostOs::Windows => &self.windows,
        }
    }

    /// Script location inside the runtime's install directory.
    pub fn script_path(&self, bin_dir: &Path, os: HostOs) -> PathBuf {
        bin_dir
            .join(&self.binary)
            .join(format!("{}.{}", self.stem, os.script_extension()))
    }
}

/// A model pulled by reference and optionally re-tagged under a friendly name.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelSpec {
    pub pull: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub embedding: Option<ModelSpec>,
    #[serde(default)]
    pub llm: Option<ModelSpec>,
}

impl ModelsConfig {
    /// Models pulled automatically after provisioning, in pull order.
    pub fn auto_pull(&self) -> Vec<(&'static str, &ModelSpec)> {
        let mut out = Vec::new();
        if let Some(spec) = &self.embedding {
            out.push(("embedding", spec));
        }
        if let Some(spec) = &self.llm {
            out.push(("llm", spec));
        }
        out
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_host")]
    pub host: String,
    /// Defaults to `<data_dir>/models`.
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/runtime`.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: default_runtime_host(),
            models_dir: None,
            home_dir: None,
            process_timeout_secs: default_process_timeout(),
        }
    }
}

fn default_runtime_host() -> String {
    "127.0.0.1:11434".to_string()
}
fn default_process_timeout() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Per-strategy file-size ceiling in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Concurrent extractions in a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Document converter executable; defaults to the provisioned one.
    #[serde(default)]
    pub converter: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            concurrency: default_concurrency(),
            converter: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    25
}
fn default_concurrency() -> usize {
    4
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: default_chunking_enabled(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_chunking_enabled() -> bool {
    true
}
fn default_max_tokens() -> usize {
    700
}

impl Config {
    pub fn runtime_models_dir(&self) -> PathBuf {
        self.runtime
            .models_dir
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("models"))
    }

    pub fn runtime_home_dir(&self) -> PathBuf {
        self.runtime
            .home_dir
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("runtime"))
    }

    /// Directory holding the runtime executable for the given OS.
    pub fn runtime_bin_dir(&self, os: HostOs) -> PathBuf {
        let root = self.paths.bin_dir().join(&self.launcher.binary);
        match os {
            HostOs::Linux => root.join("bin"),
            HostOs::Darwin | HostOs::Windows => root,
        }
    }

    /// Document converter executable, either configured or provisioned.
    pub fn converter_path(&self, os: HostOs) -> PathBuf {
        if let Some(path) = &self.extraction.converter {
            return path.clone();
        }
        let root = self.paths.bin_dir().join("pandoc");
        match os {
            HostOs::Windows => root.join("pandoc.exe"),
            HostOs::Linux | HostOs::Darwin => root.join("bin").join("pandoc"),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate releases
    if config.releases.archive_types.is_empty() {
        bail!("releases.archive_types must list at least one suffix");
    }
    if let Some(bad) = config
        .releases
        .archive_types
        .iter()
        .find(|s| !s.starts_with('.'))
    {
        bail!("releases.archive_types entries must start with '.': '{}'", bad);
    }

    // Validate binaries
    for (name, binary) in &config.binaries {
        if binary.owner.trim().is_empty() || binary.project.trim().is_empty() {
            bail!("binaries.{}: owner and project must be set", name);
        }
        if binary.match_keys.is_empty() {
            bail!("binaries.{}: match_keys must not be empty", name);
        }
        for key in binary.match_keys.keys() {
            let os = key.split('-').next().unwrap_or_default();
            if os.parse::<HostOs>().is_err() {
                bail!(
                    "binaries.{}.match_keys: '{}' must start with linux, darwin, or windows",
                    name,
                    key
                );
            }
        }
    }

    if !config.binaries.contains_key(&config.launcher.binary) {
        bail!(
            "launcher.binary '{}' is not a configured binary",
            config.launcher.binary
        );
    }

    // Validate extraction
    if config.extraction.max_file_size_mb == 0 {
        bail!("extraction.max_file_size_mb must be > 0");
    }
    if config.extraction.concurrency == 0 {
        bail!("extraction.concurrency must be > 0");
    }

    // Validate chunking
    if config.chunking.enabled && config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    Ok(config)
}
