//! File-type classification for extraction routing.
//!
//! A file is classified by content first: the leading bytes are sniffed
//! for a known signature and mapped to a MIME type. The lowercased
//! extension is kept alongside so the router can fall back to it when
//! sniffing is inconclusive (plain text, CSV, source code) or the sniffed
//! MIME type has no mapping. A path without an extension is never
//! classified, whatever its content.

use std::path::Path;

use crate::error::ExtractionErrorKind;

/// Classification keys for one file, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    /// Lowercased extension without the dot.
    pub extension: String,
    /// MIME type from content sniffing, when a signature matched.
    pub mime: Option<String>,
}

impl FileType {
    /// Lookup keys in precedence order: MIME type, then extension.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.mime
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.extension.as_str()))
    }

    /// Value recorded as `file_type` metadata.
    pub fn label(&self) -> &str {
        self.mime.as_deref().unwrap_or(&self.extension)
    }
}

/// Lowercased extension of `path`, if it has a non-empty one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

/// MIME type from the file's signature, if recognized.
pub fn sniff_mime(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.mime_type().to_string()),
        _ => None,
    }
}

/// Classifies `path`, or reports [`ExtractionErrorKind::FileTypeNotRecognized`]
/// when it has no extension.
pub fn classify(path: &Path) -> Result<FileType, ExtractionErrorKind> {
    let extension = extension_of(path).ok_or(ExtractionErrorKind::FileTypeNotRecognized)?;
    Ok(FileType {
        extension,
        mime: sniff_mime(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn no_extension_is_not_recognized() {
        assert_eq!(
            classify(Path::new("README")),
            Err(ExtractionErrorKind::FileTypeNotRecognized)
        );
        assert_eq!(
            classify(Path::new("archive.")),
            Err(ExtractionErrorKind::FileTypeNotRecognized)
        );
    }

    #[test]
    fn text_falls_back_to_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.TXT");
        fs::write(&path, "hello").unwrap();

        let file_type = classify(&path).unwrap();
        assert_eq!(file_type.extension, "txt");
        assert_eq!(file_type.mime, None);
        assert_eq!(file_type.keys().collect::<Vec<_>>(), vec!["txt"]);
        assert_eq!(file_type.label(), "txt");
    }

    #[test]
    fn sniffed_mime_comes_first() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.bin");
        fs::write(&path, b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();

        let file_type = classify(&path).unwrap();
        assert_eq!(file_type.mime.as_deref(), Some("application/pdf"));
        assert_eq!(
            file_type.keys().collect::<Vec<_>>(),
            vec!["application/pdf", "bin"]
        );
    }

    #[test]
    fn missing_file_still_classifies_by_extension() {
        let file_type = classify(Path::new("/nonexistent/deck.pptx")).unwrap();
        assert_eq!(file_type.extension, "pptx");
        assert!(file_type.mime.is_none());
    }
}
