//! Environment contract for the model runtime.
//!
//! The runtime reads its bind address, model store, and home directory from
//! three environment variables. Provisioning creates both directories before
//! the runtime is started, and `rag env` prints the same values for shells
//! that start the runtime themselves.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::ProvisionError;
use crate::platform::HostOs;

pub const ENV_HOST: &str = "OLLAMA_HOST";
pub const ENV_MODELS: &str = "OLLAMA_MODELS";
pub const ENV_HOME: &str = "OLLAMA_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub host: String,
    pub models_dir: PathBuf,
    pub home_dir: PathBuf,
    /// Directory holding the runtime executable; prepended to `PATH`.
    pub bin_dir: PathBuf,
}

impl RuntimeEnv {
    pub fn from_config(config: &Config, os: HostOs) -> Self {
        Self {
            host: config.runtime.host.clone(),
            models_dir: config.runtime_models_dir(),
            home_dir: config.runtime_home_dir(),
            bin_dir: config.runtime_bin_dir(os),
        }
    }

    /// Creates the model store and home directory if they are missing.
    pub fn ensure_dirs(&self) -> Result<(), ProvisionError> {
        for dir in [&self.models_dir, &self.home_dir] {
            fs::create_dir_all(dir).map_err(|e| ProvisionError::io_at("create", dir, e))?;
        }
        Ok(())
    }

    /// Variables to set on a runtime child process.
    pub fn vars(&self) -> Vec<(String, OsString)> {
        let mut vars = vec![
            (ENV_HOST.to_string(), OsString::from(&self.host)),
            (ENV_MODELS.to_string(), self.models_dir.clone().into_os_string()),
            (ENV_HOME.to_string(), self.home_dir.clone().into_os_string()),
        ];
        let existing = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![self.bin_dir.clone()];
        paths.extend(std::env::split_paths(&existing));
        if let Ok(joined) = std::env::join_paths(paths) {
            vars.push(("PATH".to_string(), joined));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn config(data_dir: &std::path::Path) -> Config {
        let toml = format!(
            r#"
[paths]
data_dir = "{}"

[binaries.ollama]
owner = "ollama"
project = "ollama"
match_keys = {{ linux = "linux-amd64" }}

[launcher]
linux = ""
darwin = ""
windows = ""
"#,
            data_dir.display().to_string().replace('\\', "/")
        );
        parse_config(&toml).unwrap()
    }

    #[test]
    fn ensure_dirs_creates_store_and_home() {
        let tmp = TempDir::new().unwrap();
        let env = RuntimeEnv::from_config(&config(tmp.path()), HostOs::Linux);
        env.ensure_dirs().unwrap();
        assert!(tmp.path().join("models").is_dir());
        assert!(tmp.path().join("runtime").is_dir());
    }

    #[test]
    fn vars_prepend_bin_dir_to_path() {
        let tmp = TempDir::new().unwrap();
        let env = RuntimeEnv::from_config(&config(tmp.path()), HostOs::Linux);
        let vars = env.vars();

        let host = vars.iter().find(|(k, _)| k == ENV_HOST).unwrap();
        assert_eq!(host.1, OsString::from("127.0.0.1:11434"));

        let path = vars.iter().find(|(k, _)| k == "PATH").unwrap();
        let first = std::env::split_paths(&path.1).next().unwrap();
        assert_eq!(first, tmp.path().join("bin").join("ollama").join("bin"));
    }
}
