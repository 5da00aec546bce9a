//! Archive installer: download, extract, and swap an install directory.
//!
//! With `backup` enabled the operation is transactional with respect to the
//! destination. A populated destination is renamed to `<dest>.backup`
//! before anything is written; any failure afterwards deletes the partial
//! destination and renames the backup back. On success the backup is
//! removed. Without a backup a failed install leaves whatever was written,
//! and the error is returned to the caller.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::archive::{remove_path, safe_extract, ArchiveFormat};
use crate::error::ProvisionError;
use crate::models::InstallTarget;
use crate::progress::{ProgressEvent, ProgressReporter, Throttle};

const READ_CHUNK: usize = 8192;
const PROGRESS_STEP: u64 = 1024 * 1024;

/// Byte source for release assets.
pub trait AssetSource: Send + Sync {
    /// Streams `url` into `sink`, calling `on_progress(bytes, total)` as data
    /// arrives. Returns the number of bytes written.
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, ProvisionError>;
}

/// Downloads assets over HTTP(S).
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    /// `timeout` bounds the whole transfer; `None` disables it.
    pub fn new(timeout: Option<Duration>) -> Result<Self, ProvisionError> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(concat!("rag-harness/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ProvisionError::DownloadFailed {
            url: String::new(),
            reason: e.to_string(),
        })?;
        Ok(Self { client })
    }
}

impl AssetSource for HttpSource {
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, ProvisionError> {
        let failed = |reason: String| ProvisionError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let total = response.content_length();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut written: u64 = 0;
        loop {
            let n = response.read(&mut buf).map_err(|e| failed(e.to_string()))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])
                .map_err(|e| failed(format!("writing download: {}", e)))?;
            written += n as u64;
            on_progress(written, total);
        }
        sink.flush().map_err(|e| failed(e.to_string()))?;
        Ok(written)
    }
}

/// Sibling path used to hold the previous install during an update.
pub fn backup_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    destination.with_file_name(name)
}

fn is_populated(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Installs the archive at `target.url` into `target.destination`.
pub fn install(
    source: &dyn AssetSource,
    target: &InstallTarget,
    progress: &dyn ProgressReporter,
) -> Result<(), ProvisionError> {
    let format = ArchiveFormat::from_name(&target.url)
        .ok_or_else(|| ProvisionError::UnsupportedFormat(target.url.clone()))?;

    let dest = &target.destination;
    let label = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dest.display().to_string());

    let backup = if target.backup && is_populated(dest) {
        let backup = backup_path(dest);
        if backup.exists() {
            debug!(path = %backup.display(), "clearing stale backup");
            remove_path(&backup)?;
        }
        fs::rename(dest, &backup).map_err(|e| ProvisionError::io_at("back up", dest, e))?;
        info!(from = %dest.display(), to = %backup.display(), "backed up existing install");
        Some(backup)
    } else {
        None
    };

    match download_and_extract(source, &target.url, format, dest, &label, progress) {
        Ok(()) => {
            if let Some(backup) = backup {
                if let Err(e) = remove_path(&backup) {
                    warn!(error = %e, "install succeeded but the backup could not be removed");
                }
            }
            progress.report(ProgressEvent::Finished { label });
            info!(url = %target.url, dest = %dest.display(), "install complete");
            Ok(())
        }
        Err(err) => {
            error!(url = %target.url, error = %err, "install failed");
            if let Some(backup) = backup {
                match restore(dest, &backup) {
                    Ok(()) => info!(dest = %dest.display(), "restored previous install"),
                    Err(restore_err) => error!(
                        dest = %dest.display(),
                        backup = %backup.display(),
                        error = %restore_err,
                        "could not restore previous install"
                    ),
                }
            }
            Err(err)
        }
    }
}

fn download_and_extract(
    source: &dyn AssetSource,
    url: &str,
    format: ArchiveFormat,
    dest: &Path,
    label: &str,
    progress: &dyn ProgressReporter,
) -> Result<(), ProvisionError> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ProvisionError::io_at("create", parent, e))?;

    let mut archive = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(format.suffix())
        .tempfile_in(parent)
        .map_err(|e| ProvisionError::io_at("create temporary file in", parent, e))?;

    let mut throttle = Throttle::new(PROGRESS_STEP);
    let mut on_progress = |bytes: u64, total: Option<u64>| {
        if throttle.should_report(bytes, total) {
            progress.report(ProgressEvent::Downloading {
                label: label.to_string(),
                bytes,
                total,
            });
        }
    };
    let bytes = source.fetch(url, archive.as_file_mut(), &mut on_progress)?;
    debug!(url, bytes, "download finished");

    safe_extract(archive.path(), format, dest, label, progress)?;

    archive
        .close()
        .map_err(|e| ProvisionError::io("failed to remove temporary archive", e))?;
    Ok(())
}

fn restore(dest: &Path, backup: &Path) -> Result<(), ProvisionError> {
    if dest.exists() {
        remove_path(dest)?;
    }
    fs::rename(backup, dest).map_err(|e| ProvisionError::io_at("restore backup to", dest, e))
}
