//! Host operating system and architecture detection.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Operating-system families that binaries can be provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOs {
    Linux,
    Darwin,
    Windows,
}

impl HostOs {
    /// The OS this process is running on, if it is a supported family.
    pub fn current() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(HostOs::Linux),
            "macos" => Some(HostOs::Darwin),
            "windows" => Some(HostOs::Windows),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostOs::Linux => "linux",
            HostOs::Darwin => "darwin",
            HostOs::Windows => "windows",
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, HostOs::Windows)
    }

    /// Extension of launcher scripts on this OS.
    pub fn script_extension(&self) -> &'static str {
        if self.is_unix() {
            "sh"
        } else {
            "bat"
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostOs {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(HostOs::Linux),
            "darwin" | "macos" => Ok(HostOs::Darwin),
            "windows" => Ok(HostOs::Windows),
            other => Err(anyhow!(
                "unsupported OS '{}': expected linux, darwin, or windows",
                other
            )),
        }
    }
}

/// The machine provisioning runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: HostOs,
    /// Machine architecture as reported by the toolchain (`x86_64`, `aarch64`, ...).
    pub arch: String,
}

impl HostPlatform {
    pub fn detect() -> Result<Self> {
        let os = HostOs::current()
            .ok_or_else(|| anyhow!("unsupported host OS: {}", std::env::consts::OS))?;
        Ok(Self {
            os,
            arch: std::env::consts::ARCH.to_string(),
        })
    }
}
