//! Archive format detection and safe extraction.
//!
//! Archives are unpacked into a staging directory inside the destination
//! and then promoted. When the staged tree is a single directory, that
//! directory is treated as a wrapper and its children are promoted
//! instead, so `pandoc-3.1/bin/pandoc` installs as `bin/pandoc`.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::ProvisionError;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Staging directory created inside the destination during extraction.
pub const STAGING_DIR: &str = "__extract_tmp__";

/// Container formats the installer knows how to unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    /// Detects the format from a file name or URL suffix (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let lower = lower.split(['?', '#']).next().unwrap_or_default();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Some(ArchiveFormat::TarBz2)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }

    /// Canonical suffix, used to name the temporary download.
    pub fn suffix(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::TarBz2 => ".tar.bz2",
        }
    }
}

/// Extracts `archive` into `dest`, stripping a single wrapper folder.
///
/// Existing entries in `dest` with the same name as a promoted entry are
/// replaced; other existing entries are left alone.
pub fn safe_extract(
    archive: &Path,
    format: ArchiveFormat,
    dest: &Path,
    label: &str,
    progress: &dyn ProgressReporter,
) -> Result<(), ProvisionError> {
    fs::create_dir_all(dest).map_err(|e| ProvisionError::io_at("create", dest, e))?;

    let staging = dest.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .map_err(|e| ProvisionError::io_at("clear stale staging dir", &staging, e))?;
    }
    fs::create_dir(&staging).map_err(|e| ProvisionError::io_at("create", &staging, e))?;

    let unpacked = match format {
        ArchiveFormat::Zip => extract_zip(archive, &staging, label, progress),
        ArchiveFormat::Tar | ArchiveFormat::TarGz | ArchiveFormat::TarBz2 => {
            extract_tar(archive, format, &staging, label, progress)
        }
    };
    if let Err(err) = unpacked {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    promote(&staging, dest)?;
    fs::remove_dir_all(&staging).map_err(|e| ProvisionError::io_at("remove", &staging, e))?;
    Ok(())
}

fn extraction_error(archive: &Path, err: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::ExtractionFailed(format!("{}: {}", archive.display(), err))
}

fn extract_zip(
    archive: &Path,
    staging: &Path,
    label: &str,
    progress: &dyn ProgressReporter,
) -> Result<(), ProvisionError> {
    let file = File::open(archive).map_err(|e| extraction_error(archive, e))?;
    let mut zip =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| extraction_error(archive, e))?;
    let total = zip.len() as u64;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| extraction_error(archive, e))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            extraction_error(archive, format!("unsafe entry path '{}'", entry.name()))
        })?;
        let out_path = staging.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| extraction_error(archive, e))?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| extraction_error(archive, e))?;
            }
            let mut out = File::create(&out_path).map_err(|e| extraction_error(archive, e))?;
            std::io::copy(&mut entry, &mut out).map_err(|e| extraction_error(archive, e))?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))
                .map_err(|e| extraction_error(archive, e))?;
        }

        progress.report(ProgressEvent::Extracting {
            label: label.to_string(),
            n: i as u64 + 1,
            total: Some(total),
        });
    }
    Ok(())
}

fn extract_tar(
    archive: &Path,
    format: ArchiveFormat,
    staging: &Path,
    label: &str,
    progress: &dyn ProgressReporter,
) -> Result<(), ProvisionError> {
    let file = BufReader::new(File::open(archive).map_err(|e| extraction_error(archive, e))?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        ArchiveFormat::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
        _ => Box::new(file),
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);

    let entries = tar.entries().map_err(|e| extraction_error(archive, e))?;
    for (n, entry) in entries.enumerate() {
        let mut entry = entry.map_err(|e| extraction_error(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| extraction_error(archive, e))?
            .into_owned();
        if !is_enclosed(&path) {
            return Err(extraction_error(
                archive,
                format!("unsafe entry path '{}'", path.display()),
            ));
        }
        entry
            .unpack_in(staging)
            .map_err(|e| extraction_error(archive, e))?;

        progress.report(ProgressEvent::Extracting {
            label: label.to_string(),
            n: n as u64 + 1,
            total: None,
        });
    }
    Ok(())
}

/// True when `path` is relative and never climbs above its root.
fn is_enclosed(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Moves the staged payload into `dest`, skipping a lone wrapper directory.
fn promote(staging: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let top = list_dir(staging)?;
    let source_dir = match top.as_slice() {
        [single] if single.is_dir() => {
            debug!(wrapper = %single.display(), "stripping wrapper folder");
            single.clone()
        }
        _ => staging.to_path_buf(),
    };

    for item in list_dir(&source_dir)? {
        let Some(name) = item.file_name() else {
            continue;
        };
        let target = dest.join(name);
        if target.exists() {
            remove_path(&target)?;
        }
        fs::rename(&item, &target).map_err(|e| ProvisionError::io_at("move", &item, e))?;
    }
    Ok(())
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    let mut items = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ProvisionError::io_at("read", dir, e))? {
        let entry = entry.map_err(|e| ProvisionError::io_at("read", dir, e))?;
        items.push(entry.path());
    }
    items.sort();
    Ok(items)
}

pub(crate) fn remove_path(path: &Path) -> Result<(), ProvisionError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| ProvisionError::io_at("remove", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn tar_into<W: Write>(out: W, entries: &[(&str, &str)]) -> W {
        let mut builder = tar::Builder::new(out);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        tar_into(encoder, entries).finish().unwrap();
    }

    fn write_tar_bz2(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        tar_into(encoder, entries).finish().unwrap();
    }

    fn write_tar(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        tar_into(file, entries).flush().unwrap();
    }

    #[test]
    fn detects_formats_from_suffix() {
        assert_eq!(ArchiveFormat::from_name("a.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_name("https://x/ollama-linux-amd64.TGZ"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_name("a.tar.bz2"),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(ArchiveFormat::from_name("a.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(
            ArchiveFormat::from_name("https://x/a.zip?download=1"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::from_name("a.exe"), None);
        assert_eq!(ArchiveFormat::from_name("a.tar.xz"), None);
    }

    #[test]
    fn zip_wrapper_folder_is_stripped() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        write_zip(&archive, &[("X/a", "alpha"), ("X/b", "beta")]);
        let dest = tmp.path().join("dest");

        safe_extract(&archive, ArchiveFormat::Zip, &dest, "pkg", &NoProgress).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("b")).unwrap(), "beta");
        assert!(!dest.join("X").exists());
        assert!(!dest.join(STAGING_DIR).exists());
    }

    #[test]
    fn flat_archive_keeps_structure() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar.gz");
        write_tar_gz(&archive, &[("a", "alpha"), ("b", "beta")]);
        let dest = tmp.path().join("dest");

        safe_extract(&archive, ArchiveFormat::TarGz, &dest, "pkg", &NoProgress).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("b")).unwrap(), "beta");
    }

    #[test]
    fn single_top_level_file_is_not_a_wrapper() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        write_zip(&archive, &[("tool", "bin")]);
        let dest = tmp.path().join("dest");

        safe_extract(&archive, ArchiveFormat::Zip, &dest, "pkg", &NoProgress).unwrap();
        assert_eq!(fs::read_to_string(dest.join("tool")).unwrap(), "bin");
    }

    #[cfg(unix)]
    #[test]
    fn tar_preserves_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar.gz");
        write_tar_gz(&archive, &[("pandoc-3.1/bin/pandoc", "#!/bin/sh\n")]);
        let dest = tmp.path().join("dest");

        safe_extract(&archive, ArchiveFormat::TarGz, &dest, "pkg", &NoProgress).unwrap();

        let mode = fs::metadata(dest.join("bin/pandoc"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn corrupt_archive_fails_and_cleans_staging() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();
        let dest = tmp.path().join("dest");

        let err = safe_extract(&archive, ArchiveFormat::Zip, &dest, "pkg", &NoProgress).unwrap_err();
        assert!(matches!(err, ProvisionError::ExtractionFailed(_)));
        assert!(!dest.join(STAGING_DIR).exists());
    }

    #[test]
    fn tar_bz2_wrapper_folder_is_stripped() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tbz2");
        write_tar_bz2(&archive, &[("pkg-1.0/bin/tool", "bz2 payload")]);
        let dest = tmp.path().join("dest");

        let format = ArchiveFormat::from_name("pkg.tbz2").unwrap();
        assert_eq!(format, ArchiveFormat::TarBz2);
        safe_extract(&archive, format, &dest, "pkg", &NoProgress).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("bin/tool")).unwrap(),
            "bz2 payload"
        );
        assert!(!dest.join("pkg-1.0").exists());
    }

    #[test]
    fn uncompressed_tar_is_extracted() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar");
        write_tar(&archive, &[("a", "alpha"), ("dir/b", "beta")]);
        let dest = tmp.path().join("dest");

        safe_extract(&archive, ArchiveFormat::Tar, &dest, "pkg", &NoProgress).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("dir/b")).unwrap(), "beta");
    }

    #[test]
    fn zip_entry_escaping_destination_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("ok", "fine"), ("../evil", "payload")]);
        let dest = tmp.path().join("dest");

        let err = safe_extract(&archive, ArchiveFormat::Zip, &dest, "pkg", &NoProgress).unwrap_err();
        match err {
            ProvisionError::ExtractionFailed(msg) => assert!(msg.contains("../evil"), "{}", msg),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
        assert!(!dest.join("evil").exists());
        assert!(!tmp.path().join("evil").exists());
        assert!(!dest.join(STAGING_DIR).exists());
    }

    #[test]
    fn stale_staging_dir_is_cleared_first() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("dest");
        let stale = dest.join(STAGING_DIR);
        fs::create_dir_all(stale.join("old")).unwrap();
        fs::write(stale.join("leftover"), "from a crashed run").unwrap();

        let archive = tmp.path().join("pkg.zip");
        write_zip(&archive, &[("X/a", "alpha")]);
        safe_extract(&archive, ArchiveFormat::Zip, &dest, "pkg", &NoProgress).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a")).unwrap(), "alpha");
        assert!(!dest.join("leftover").exists());
        assert!(!dest.join("old").exists());
        assert!(!stale.exists());
    }

    #[test]
    fn enclosed_paths() {
        assert!(is_enclosed(Path::new("a/b/c")));
        assert!(is_enclosed(Path::new("./a/../b")));
        assert!(!is_enclosed(Path::new("../evil")));
        assert!(!is_enclosed(Path::new("a/../../evil")));
        assert!(!is_enclosed(Path::new("/etc/passwd")));
    }
}
