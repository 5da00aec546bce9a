//! Core data types that flow through provisioning and extraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ExtractionErrorKind;

/// A downloadable asset attached to an upstream release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// One provisioning operation: fetch `url` and install it into `destination`.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub url: String,
    pub destination: PathBuf,
    /// Move a populated destination aside first and restore it on failure.
    pub backup: bool,
}

impl InstallTarget {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            backup: true,
        }
    }
}

/// Metadata value attached to a [`ContentUnit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Int(i64),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            MetadataValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            MetadataValue::Text(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

/// Atomic unit of extracted content handed to the indexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentUnit {
    pub text: String,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl ContentUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata insert.
    pub fn with(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

/// Result of routing one file through the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Success(Vec<ContentUnit>),
    Failure(ExtractionErrorKind),
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }

    pub fn units(&self) -> &[ContentUnit] {
        match self {
            ExtractionOutcome::Success(units) => units,
            ExtractionOutcome::Failure(_) => &[],
        }
    }

    pub fn error(&self) -> Option<ExtractionErrorKind> {
        match self {
            ExtractionOutcome::Success(_) => None,
            ExtractionOutcome::Failure(kind) => Some(*kind),
        }
    }
}
