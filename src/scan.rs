//! Expands CLI inputs into the list of files to extract.
//!
//! Files named explicitly are kept as given, in order, even when they do
//! not exist, so the router can report them as missing. Directories are
//! walked recursively and filtered by the configured include/exclude
//! globs, matched against paths relative to the directory.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ExtractionConfig;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/__extract_tmp__/**",
];

pub fn scan_paths(inputs: &[PathBuf], config: &ExtractionConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(config.include_globs.iter().map(String::as_str))?;
    let exclude_set = build_globset(
        DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(config.exclude_globs.iter().map(String::as_str)),
    )?;

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(scan_dir(input, &include_set, &exclude_set)?);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn scan_dir(root: &Path, include_set: &GlobSet, exclude_set: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        // Apply exclude patterns
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        // Apply include patterns
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
