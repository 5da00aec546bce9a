//! Error taxonomy for provisioning and extraction.
//!
//! Provisioning errors ([`ProvisionError`]) are raised to the orchestrator,
//! which stops the affected binary but keeps going with independent ones.
//! Extraction failures never escape the router: strategies return
//! [`crate::extract::ExtractError`], which the router folds into an
//! [`ExtractionErrorKind`] inside an [`crate::models::ExtractionOutcome`].

use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failures while resolving, downloading, or installing a release archive.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The asset URL does not end in a known container suffix.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Transport or HTTP status error while fetching an asset.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The archive is corrupt, unreadable, or contains unsafe entries.
    #[error("archive extraction failed: {0}")]
    ExtractionFailed(String),

    /// No filtered release asset contains the platform match key.
    #[error("no release asset of {project} matches '{key}' (candidates: {candidates})")]
    NoAssetResolved {
        project: String,
        key: String,
        candidates: usize,
    },

    /// The configuration has no match key for this binary on this platform.
    #[error("no match key configured for {binary} on {os}/{arch}; add one under [binaries.{binary}.match_keys]")]
    NoMatchKey {
        binary: String,
        os: String,
        arch: String,
    },

    /// The release index could not be queried or decoded.
    #[error("release index query failed: {0}")]
    ReleaseIndex(String),

    /// A launcher template failed to compile or render.
    #[error("launcher template error: {0}")]
    Template(String),

    /// Filesystem error during install bookkeeping (backup, rollback, staging).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {} {}", action, path.display()), source)
    }
}

/// Per-file extraction failure reported by the router.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    #[error("file not found")]
    FileNotFound,
    #[error("file exceeds the configured size limit")]
    FileSizeLimit,
    #[error("file type not recognized")]
    FileTypeNotRecognized,
    #[error("content not supported by the extractor")]
    UnsupportedContent,
    #[error("unknown extraction error")]
    UnknownError,
}

/// Failures of a single launcher invocation.
///
/// A timeout is reported as a value so the caller can decide whether to
/// continue; the process has already been killed when this is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LauncherError {
    #[error("failed to start launcher for `{verb}`: {reason}")]
    Spawn { verb: String, reason: String },

    #[error("launcher `{verb}` exited with code {code:?}{detail}", detail = format_output(.output))]
    Failed {
        verb: String,
        code: Option<i32>,
        output: String,
    },

    #[error("launcher `{verb}` did not finish within {secs}s and was terminated", secs = .timeout.as_secs())]
    ExternalProcessTimeout { verb: String, timeout: Duration },
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_failure_message_includes_output() {
        let err = LauncherError::Failed {
            verb: "pull".to_string(),
            code: Some(1),
            output: "  manifest not found \n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "launcher `pull` exited with code Some(1): manifest not found"
        );
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = LauncherError::ExternalProcessTimeout {
            verb: "pull".to_string(),
            timeout: Duration::from_secs(90),
        };
        assert!(err.to_string().contains("90s"));
    }
}
