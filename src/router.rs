//! Extraction router: file type to strategy, with fault containment.
//!
//! Routers have two phases. A [`RouterBuilder`] registers strategies and
//! file-type mappings, rejecting duplicates and mappings to unknown ids at
//! registration time. [`RouterBuilder::build`] then freezes it into an
//! [`ExtractionRouter`], which is read-only and can be shared across
//! threads.
//!
//! [`ExtractionRouter::extract`] never fails and never panics: strategy
//! errors become an [`ExtractionErrorKind`], and a panicking strategy is
//! reported as [`ExtractionErrorKind::UnknownError`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chunk::{ParagraphSplitter, Splitter};
use crate::classify::classify;
use crate::config::Config;
use crate::error::ExtractionErrorKind;
use crate::extract::{
    ConverterExtractor, Extractor, PdfExtractor, PlainTextExtractor, SizeLimit, SlideDeckExtractor,
    SpreadsheetExtractor, MIME_DOCX, MIME_EPUB, MIME_ODS, MIME_ODT, MIME_PDF, MIME_PPTX, MIME_RTF,
    MIME_XLS, MIME_XLSB, MIME_XLSX,
};
use crate::models::{ContentUnit, ExtractionOutcome};
use crate::platform::HostOs;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("extractor '{0}' is already registered")]
    DuplicateExtractor(String),
    #[error("cannot map file types to '{0}': no such extractor")]
    UnknownExtractor(String),
}

struct Strategy {
    extractor: Box<dyn Extractor>,
    splitter: Option<Box<dyn Splitter>>,
}

impl Strategy {
    fn run(&self, path: &Path) -> Result<Vec<ContentUnit>, crate::extract::ExtractError> {
        let units = self.extractor.extract(path)?;
        Ok(match &self.splitter {
            Some(splitter) => splitter.split(units),
            None => units,
        })
    }
}

/// Registration phase of a router.
#[derive(Default)]
pub struct RouterBuilder {
    strategies: HashMap<String, Strategy>,
    file_map: HashMap<String, String>,
}

fn normalize_key(key: &str) -> String {
    key.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy under `id`, optionally followed by a splitter.
    pub fn add_extractor(
        &mut self,
        id: &str,
        extractor: impl Extractor + 'static,
        splitter: Option<Box<dyn Splitter>>,
    ) -> Result<&mut Self, RouterError> {
        if self.strategies.contains_key(id) {
            return Err(RouterError::DuplicateExtractor(id.to_string()));
        }
        self.strategies.insert(
            id.to_string(),
            Strategy {
                extractor: Box::new(extractor),
                splitter,
            },
        );
        Ok(self)
    }

    /// Maps file-type keys (extensions or MIME types, case-insensitive) to
    /// a registered strategy. A later mapping for the same key replaces
    /// the earlier one.
    pub fn add_file_mapping<I, S>(&mut self, id: &str, keys: I) -> Result<&mut Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.strategies.contains_key(id) {
            return Err(RouterError::UnknownExtractor(id.to_string()));
        }
        for key in keys {
            self.file_map.insert(normalize_key(key.as_ref()), id.to_string());
        }
        Ok(self)
    }

    pub fn build(self) -> ExtractionRouter {
        ExtractionRouter {
            strategies: self.strategies,
            file_map: self.file_map,
        }
    }
}

/// Dispatch phase of a router. Immutable.
pub struct ExtractionRouter {
    strategies: HashMap<String, Strategy>,
    file_map: HashMap<String, String>,
}

impl ExtractionRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Strategy id that would handle `path`, if any.
    pub fn route(&self, path: &Path) -> Result<&str, ExtractionErrorKind> {
        let file_type = classify(path)?;
        let id = file_type
            .keys()
            .find_map(|key| self.file_map.get(&normalize_key(key)))
            .map(String::as_str)
            .ok_or(ExtractionErrorKind::FileTypeNotRecognized);
        id
    }

    pub fn extract(&self, path: &Path) -> ExtractionOutcome {
        let id = match self.route(path) {
            Ok(id) => id,
            Err(kind) => {
                debug!(path = %path.display(), ?kind, "no extractor for file");
                return ExtractionOutcome::Failure(kind);
            }
        };
        let Some(strategy) = self.strategies.get(id) else {
            return ExtractionOutcome::Failure(ExtractionErrorKind::UnknownError);
        };
        if !path.exists() {
            return ExtractionOutcome::Failure(ExtractionErrorKind::FileNotFound);
        }

        debug!(path = %path.display(), extractor = id, "extracting");
        match catch_unwind(AssertUnwindSafe(|| strategy.run(path))) {
            Ok(Ok(units)) => ExtractionOutcome::Success(units),
            Ok(Err(e)) => {
                debug!(path = %path.display(), extractor = id, error = %e, "extraction failed");
                ExtractionOutcome::Failure(e.kind())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                warn!(path = %path.display(), extractor = id, %message, "extractor panicked");
                ExtractionOutcome::Failure(ExtractionErrorKind::UnknownError)
            }
        }
    }
}

/// Extensions handled as plain UTF-8 text.
const PLAIN_TEXT_KEYS: &[&str] = &[
    "txt", "text", "md", "markdown", "rst", "csv", "tsv", "log", "json", "yaml", "yml", "toml",
    "ini", "xml", "text/xml", "rs", "py", "js", "ts", "go", "java", "c", "h", "cpp", "hpp", "rb",
    "sh", "sql",
];

/// Router with the built-in strategies, configured from `config`.
///
/// `os` selects the provisioned converter layout when no converter path
/// is configured.
pub fn default_router(config: &Config, os: HostOs) -> Result<ExtractionRouter, RouterError> {
    let limit = SizeLimit::new(config.extraction.max_file_size_mb);
    let splitter = || -> Option<Box<dyn Splitter>> {
        config
            .chunking
            .enabled
            .then(|| Box::new(ParagraphSplitter::new(config.chunking.max_tokens)) as Box<dyn Splitter>)
    };

    let mut builder = RouterBuilder::new();
    builder
        .add_extractor("plain", PlainTextExtractor { limit }, splitter())?
        .add_file_mapping("plain", PLAIN_TEXT_KEYS)?;
    builder
        .add_extractor("spreadsheet", SpreadsheetExtractor { limit }, None)?
        .add_file_mapping(
            "spreadsheet",
            [
                "xlsx", "xlsm", "xls", "xlsb", "ods", MIME_XLSX, MIME_XLS, MIME_XLSB, MIME_ODS,
            ],
        )?;
    builder
        .add_extractor(
            "document",
            ConverterExtractor::new(config.converter_path(os), limit),
            splitter(),
        )?
        .add_file_mapping(
            "document",
            [
                "docx", "odt", "rtf", "epub", "html", "htm", MIME_DOCX, MIME_ODT, MIME_RTF,
                MIME_EPUB, "text/html",
            ],
        )?;
    builder
        .add_extractor("pdf", PdfExtractor { limit }, splitter())?
        .add_file_mapping("pdf", ["pdf", MIME_PDF])?;
    builder
        .add_extractor("presentation", SlideDeckExtractor { limit }, splitter())?
        .add_file_mapping("presentation", ["pptx", MIME_PPTX])?;
    Ok(builder.build())
}
