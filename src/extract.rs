//! Extraction strategies: turn one file into content units.
//!
//! Every strategy checks the file-size ceiling before reading the file, so
//! an oversized input is rejected without any parsing work. Strategies
//! return [`ExtractError`]; the router folds it into an
//! [`ExtractionErrorKind`] and never lets it escape a batch.
//!
//! | Strategy | Formats | Units |
//! |----------|---------|-------|
//! | [`PlainTextExtractor`] | txt, md, csv, source code | one per file |
//! | [`SpreadsheetExtractor`] | xlsx, xlsm, xls, xlsb, ods | one per sheet |
//! | [`ConverterExtractor`] | docx, odt, rtf, epub, html (via pandoc) | one per file |
//! | [`PdfExtractor`] | pdf | one per file |
//! | [`SlideDeckExtractor`] | pptx | one per file |

use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{extension_of, sniff_mime};
use crate::error::ExtractionErrorKind;
use crate::models::ContentUnit;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_XLSB: &str = "application/vnd.ms-excel.sheet.binary.macroenabled.12";
pub const MIME_ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
pub const MIME_EPUB: &str = "application/epub+zip";
pub const MIME_ODT: &str = "application/vnd.oasis.opendocument.text";
pub const MIME_RTF: &str = "application/rtf";

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("file is {size_mb} MB, above the {limit_mb} MB limit")]
    SizeLimit { size_mb: u64, limit_mb: u64 },
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Workbook(String),
    #[error("document converter failed: {0}")]
    Converter(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Outcome kind reported by the router.
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            ExtractError::NotFound(_) => ExtractionErrorKind::FileNotFound,
            ExtractError::SizeLimit { .. } => ExtractionErrorKind::FileSizeLimit,
            ExtractError::UnsupportedContent(_)
            | ExtractError::Pdf(_)
            | ExtractError::Ooxml(_)
            | ExtractError::Workbook(_) => ExtractionErrorKind::UnsupportedContent,
            ExtractError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ExtractionErrorKind::FileNotFound
            }
            ExtractError::Converter(_) | ExtractError::Io(_) => ExtractionErrorKind::UnknownError,
        }
    }
}

/// Turns one file into an ordered sequence of content units.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError>;
}

impl<F> Extractor for F
where
    F: Fn(&Path) -> Result<Vec<ContentUnit>, ExtractError> + Send + Sync,
{
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self(path)
    }
}

/// File-size ceiling in megabytes.
///
/// Sizes are rounded to the nearest whole megabyte before comparing, so
/// with a 25 MB limit a 25.4 MB file passes and a 25.5 MB file does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimit {
    pub max_mb: u64,
}

impl SizeLimit {
    pub fn new(max_mb: u64) -> Self {
        Self { max_mb }
    }

    /// Returns the file size in bytes, or an error when it is over the limit.
    pub fn check(&self, path: &Path) -> Result<u64, ExtractError> {
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractError::NotFound(path.to_path_buf()),
            _ => ExtractError::Io(e),
        })?;
        let bytes = meta.len();
        let size_mb = round_half_even_mb(bytes);
        if size_mb > self.max_mb {
            return Err(ExtractError::SizeLimit {
                size_mb,
                limit_mb: self.max_mb,
            });
        }
        Ok(bytes)
    }
}

/// Whole megabytes, with an exact half rounded to the even neighbour.
fn round_half_even_mb(bytes: u64) -> u64 {
    const HALF: u64 = 1 << 19;
    let whole = bytes >> 20;
    let rest = bytes & ((1 << 20) - 1);
    if rest > HALF || (rest == HALF && whole % 2 == 1) {
        whole + 1
    } else {
        whole
    }
}

impl Default for SizeLimit {
    fn default() -> Self {
        Self::new(25)
    }
}

/// Unit carrying the per-file metadata every strategy records.
fn file_unit(path: &Path, text: String, file_type: &str) -> ContentUnit {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ContentUnit::new(text)
        .with("file_name", name)
        .with("file_path", path.display().to_string())
        .with("file_type", file_type)
}

fn sniffed_type(path: &Path) -> String {
    sniff_mime(path)
        .or_else(|| extension_of(path))
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════
// Plain text
// ═══════════════════════════════════════════════════════════════════════

/// Passes UTF-8 text through unchanged.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor {
    pub limit: SizeLimit,
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self.limit.check(path)?;
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ExtractError::UnsupportedContent("file is not valid UTF-8".to_string()))?;
        let file_type = extension_of(path).unwrap_or_default();
        Ok(vec![file_unit(path, text, &file_type)])
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Documents via external converter
// ═══════════════════════════════════════════════════════════════════════

/// Converts documents to plain text with an external converter
/// (`<program> --sandbox -t plain <file>`).
///
/// When the converter cannot be started, `.docx` files are still handled
/// by reading `word/document.xml` directly.
#[derive(Debug, Clone)]
pub struct ConverterExtractor {
    pub limit: SizeLimit,
    pub program: PathBuf,
}

impl ConverterExtractor {
    pub fn new(program: impl Into<PathBuf>, limit: SizeLimit) -> Self {
        Self {
            limit,
            program: program.into(),
        }
    }

    fn convert(&self, path: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.program)
            .args(["--sandbox", "-t", "plain"])
            .arg(path)
            .output();
        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && is_docx(path) => {
                debug!(program = %self.program.display(), "converter missing; reading docx directly");
                let bytes = std::fs::read(path)?;
                return extract_docx(&bytes);
            }
            Err(e) => {
                return Err(ExtractError::Converter(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                )))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Converter(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_docx(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("docx")
}

impl Extractor for ConverterExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self.limit.check(path)?;
        let text = self.convert(path)?;
        Ok(vec![file_unit(path, text, &sniffed_type(path))])
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

/// Extracts the text of all pages as one unit, each page followed by a
/// newline.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    pub limit: SizeLimit,
}

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self.limit.check(path)?;
        let bytes = std::fs::read(path)?;
        let text = extract_pdf(&bytes)?;
        Ok(vec![file_unit(path, text, &sniffed_type(path))])
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let mut text = String::new();
    for page in pages {
        text.push_str(&page);
        text.push('\n');
    }
    Ok(text)
}

// ═══════════════════════════════════════════════════════════════════════
// OOXML: shared helpers
// ═══════════════════════════════════════════════════════════════════════

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn read_optional_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    if archive.index_for_name(name).is_none() {
        return Ok(None);
    }
    read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES).map(Some)
}

/// Collects the text of `<*:t>` runs, starting a new line at the end of
/// every `<*:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_optional_entry(&mut archive, "word/document.xml")?
        .ok_or_else(|| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    extract_paragraph_text(&xml)
}

/// Entries under `prefix` named `<prefix><n>.xml`, in numeric order.
fn numbered_entries<R: Read + Seek>(archive: &zip::ZipArchive<R>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter(|n| !n[prefix.len()..].contains('/'))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

// ═══════════════════════════════════════════════════════════════════════
// Slide decks
// ═══════════════════════════════════════════════════════════════════════

/// Extracts slide text in slide order; slides are separated by a blank line.
#[derive(Debug, Clone, Default)]
pub struct SlideDeckExtractor {
    pub limit: SizeLimit,
}

impl Extractor for SlideDeckExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self.limit.check(path)?;
        let bytes = std::fs::read(path)?;
        let text = extract_pptx(&bytes)?;
        Ok(vec![file_unit(path, text, &sniffed_type(path))])
    }
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide");
    if slide_names.is_empty() {
        return Err(ExtractError::Ooxml("no slides found".to_string()));
    }
    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_paragraph_text(&xml)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

// ═══════════════════════════════════════════════════════════════════════
// Spreadsheets
// ═══════════════════════════════════════════════════════════════════════

/// Extracts one unit per worksheet, tagged with `sheet_index` and
/// `sheet_name`. Cells are tab-separated and rows newline-separated.
#[derive(Debug, Clone, Default)]
pub struct SpreadsheetExtractor {
    pub limit: SizeLimit,
}

impl Extractor for SpreadsheetExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractError> {
        self.limit.check(path)?;
        let bytes = std::fs::read(path)?;
        let file_type = sniffed_type(path);
        let sheets = match extension_of(path).as_deref() {
            Some("xls" | "xlsb" | "ods") => extract_workbook(bytes)?,
            _ => extract_xlsx(&bytes)?,
        };
        Ok(sheets
            .into_iter()
            .enumerate()
            .map(|(index, sheet)| {
                file_unit(path, sheet.text, &file_type)
                    .with("sheet_index", index)
                    .with("sheet_name", sheet.name)
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sheet {
    name: String,
    text: String,
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<Sheet>, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = match read_optional_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheets = list_worksheets(&mut archive)?;
    if sheets.is_empty() {
        return Err(ExtractError::Ooxml("workbook has no worksheets".to_string()));
    }

    let mut out = Vec::new();
    for (name, entry) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &entry, MAX_XML_ENTRY_BYTES)?;
        let text =
            extract_xlsx_sheet_cells(&name, &xml, &shared_strings, XLSX_MAX_CELLS_PER_SHEET)?;
        out.push(Sheet { name, text });
    }
    Ok(out)
}

/// Legacy, binary, and OpenDocument workbooks. Rows and cells are laid out
/// the same way as for xlsx.
fn extract_workbook(bytes: Vec<u8>) -> Result<Vec<Sheet>, ExtractError> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto_from_rs(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Workbook(e.to_string()))?;
    let names = workbook.sheet_names();
    if names.is_empty() {
        return Err(ExtractError::Workbook("workbook has no worksheets".to_string()));
    }

    let mut out = Vec::new();
    for name in names.into_iter().take(XLSX_MAX_SHEETS) {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Workbook(format!("{}: {}", name, e)))?;
        let mut rows: Vec<String> = Vec::new();
        let mut cell_count = 0usize;
        for row in range.rows() {
            if cell_count + row.len() > XLSX_MAX_CELLS_PER_SHEET {
                warn!(
                    sheet = %name,
                    limit = XLSX_MAX_CELLS_PER_SHEET,
                    "sheet truncated at cell limit"
                );
                break;
            }
            cell_count += row.len();
            let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            rows.push(cells.join("\t").trim_end().to_string());
        }
        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }
        out.push(Sheet {
            name,
            text: rows.join("\n"),
        });
    }
    Ok(out)
}

/// Shared string table; rich-text runs of one `<si>` are concatenated.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, matches: impl Fn(&[u8]) -> bool) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if matches(a.key.as_ref()) {
            Some(
                a.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned()),
            )
        } else {
            None
        }
    })
}

/// Worksheets as `(display name, zip entry)` in workbook order.
///
/// Names come from `xl/workbook.xml` and entries from its relationships.
/// Workbooks without that metadata fall back to numbered sheet entries.
fn list_worksheets<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<(String, String)>, ExtractError> {
    let workbook = read_optional_entry(archive, "xl/workbook.xml")?;
    let rels = read_optional_entry(archive, "xl/_rels/workbook.xml.rels")?;

    if let (Some(workbook), Some(rels)) = (workbook, rels) {
        let targets = read_relationships(&rels)?;
        let mut sheets = Vec::new();
        for (name, rel_id) in read_workbook_sheets(&workbook)? {
            let Some(target) = targets.get(&rel_id) else {
                continue;
            };
            let entry = match target.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => format!("xl/{}", target),
            };
            if archive.index_for_name(&entry).is_some() {
                sheets.push((name, entry));
            }
        }
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    Ok(numbered_entries(archive, "xl/worksheets/sheet")
        .into_iter()
        .enumerate()
        .map(|(i, entry)| (format!("Sheet{}", i + 1), entry))
        .collect())
}

fn read_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, |k| k == b"name");
                let rel_id = attribute(&e, |k| k.ends_with(b":id"));
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn read_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (
                    attribute(&e, |k| k == b"Id"),
                    attribute(&e, |k| k == b"Target"),
                ) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Renders one worksheet: cells joined by tabs, rows by newlines.
/// Shared-string, inline-string, and raw values are supported. Cells past
/// `max_cells` are dropped with a warning.
fn extract_xlsx_sheet_cells(
    sheet: &str,
    xml: &[u8],
    shared_strings: &[String],
    max_cells: usize,
) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut capture = false;
    let mut cell_count = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"c" && cell_count >= max_cells =>
            {
                warn!(sheet, limit = max_cells, "sheet truncated at cell limit");
                break;
            }
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = attribute(&e, |k| k == b"t");
                    value.clear();
                }
                b"v" | b"t" => capture = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                row.push(String::new());
                cell_count += 1;
            }
            Ok(Event::Text(te)) if capture => {
                value.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    let text = match cell_type.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        _ => value.clone(),
                    };
                    row.push(text);
                    cell_type = None;
                    cell_count += 1;
                }
                b"row" => {
                    let line = row.join("\t");
                    rows.push(line.trim_end().to_string());
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t").trim_end().to_string());
    }
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    pub(crate) fn zip_file(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Age" sheetId="1" r:id="rId1"/>
    <sheet name="Age 2" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId2" Type="worksheet" Target="worksheets/sheet2.xml"/>
  <Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

    const SHARED: &str = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <si><t>Age</t></si>
  <si><r><t>Under </t></r><r><t>18</t></r></si>
  <si><t>18-24</t></si>
</sst>"#;

    const SHEET1: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
  <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>Count</t></is></c></row>
  <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>42</v></c></row>
</sheetData></worksheet>"#;

    const SHEET2: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
  <row r="1"><c r="A1" t="s"><v>2</v></c></row>
</sheetData></worksheet>"#;

    pub(crate) fn write_xlsx(path: &Path) {
        zip_file(
            path,
            &[
                ("xl/workbook.xml", WORKBOOK),
                ("xl/_rels/workbook.xml.rels", RELS),
                ("xl/sharedStrings.xml", SHARED),
                ("xl/worksheets/sheet1.xml", SHEET1),
                ("xl/worksheets/sheet2.xml", SHEET2),
            ],
        );
    }

    pub(crate) fn write_pptx(path: &Path) {
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
                text
            )
        };
        let (s1, s2, s10) = (slide("Intro"), slide("Details"), slide("Summary"));
        zip_file(
            path,
            &[
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
                ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
            ],
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            ExtractError::SizeLimit {
                size_mb: 26,
                limit_mb: 25
            }
            .kind(),
            ExtractionErrorKind::FileSizeLimit
        );
        assert_eq!(
            ExtractError::Pdf("bad".into()).kind(),
            ExtractionErrorKind::UnsupportedContent
        );
        assert_eq!(
            ExtractError::Converter("x".into()).kind(),
            ExtractionErrorKind::UnknownError
        );
        assert_eq!(
            ExtractError::NotFound(PathBuf::from("x")).kind(),
            ExtractionErrorKind::FileNotFound
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn size_limit_rounds_to_nearest_megabyte() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        let file = std::fs::File::create(&path).unwrap();

        file.set_len(2 * 1024 * 1024 + 400 * 1024).unwrap();
        assert!(SizeLimit::new(2).check(&path).is_ok());

        file.set_len(2 * 1024 * 1024 + 600 * 1024).unwrap();
        let err = SizeLimit::new(2).check(&path).unwrap_err();
        assert!(matches!(err, ExtractError::SizeLimit { size_mb: 3, limit_mb: 2 }));
    }

    #[test]
    fn size_limit_rounds_exact_halves_to_even() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("half.txt");
        let file = std::fs::File::create(&path).unwrap();

        file.set_len(2 * 1024 * 1024 + 512 * 1024).unwrap();
        assert!(SizeLimit::new(2).check(&path).is_ok());

        file.set_len(3 * 1024 * 1024 + 512 * 1024).unwrap();
        let err = SizeLimit::new(3).check(&path).unwrap_err();
        assert!(matches!(err, ExtractError::SizeLimit { size_mb: 4, limit_mb: 3 }));
    }

    #[test]
    fn size_limit_on_missing_file_is_not_found() {
        let err = SizeLimit::default()
            .check(Path::new("/nonexistent/file.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::FileNotFound);
    }

    #[test]
    fn plain_text_records_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("age.csv");
        std::fs::write(&path, "Age,Age 2\nUnder 18,Under 18\n").unwrap();

        let units = PlainTextExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Age,Age 2\nUnder 18,Under 18\n");
        assert_eq!(units[0].meta("file_name").unwrap().as_str(), Some("age"));
        assert_eq!(units[0].meta("file_type").unwrap().as_str(), Some("csv"));
    }

    #[test]
    fn plain_text_rejects_binary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let err = PlainTextExtractor::default().extract(&path).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::UnsupportedContent);
    }

    #[test]
    fn spreadsheet_yields_one_unit_per_sheet() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("age.xlsx");
        write_xlsx(&path);

        let units = SpreadsheetExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "Age\tCount\nUnder 18\t42");
        assert_eq!(units[0].meta("sheet_index").unwrap().as_int(), Some(0));
        assert_eq!(units[0].meta("sheet_name").unwrap().as_str(), Some("Age"));
        assert_eq!(units[1].text, "18-24");
        assert_eq!(units[1].meta("sheet_index").unwrap().as_int(), Some(1));
        assert_eq!(units[1].meta("sheet_name").unwrap().as_str(), Some("Age 2"));
    }

    #[test]
    fn spreadsheet_without_workbook_uses_numbered_sheets() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bare.xlsx");
        zip_file(
            &path,
            &[
                ("xl/sharedStrings.xml", SHARED),
                ("xl/worksheets/sheet1.xml", SHEET1),
            ],
        );
        let units = SpreadsheetExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].meta("sheet_name").unwrap().as_str(), Some("Sheet1"));
    }

    #[test]
    fn sheet_stops_at_cell_limit() {
        let shared = read_shared_strings(SHARED.as_bytes()).unwrap();
        let text = extract_xlsx_sheet_cells("Age", SHEET1.as_bytes(), &shared, 3).unwrap();
        assert_eq!(text, "Age\tCount\nUnder 18");
    }

    fn write_ods(path: &Path) {
        const CONTENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" office:version="1.2">
<office:body><office:spreadsheet>
<table:table table:name="Budget">
<table:table-row><table:table-cell office:value-type="string"><text:p>Rent</text:p></table:table-cell><table:table-cell office:value-type="float" office:value="1200"><text:p>1200</text:p></table:table-cell></table:table-row>
</table:table>
<table:table table:name="Notes">
<table:table-row><table:table-cell office:value-type="string"><text:p>Paid monthly</text:p></table:table-cell></table:table-row>
</table:table>
</office:spreadsheet></office:body></office:document-content>"#;
        const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0" manifest:version="1.2">
<manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.spreadsheet"/>
<manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/>
</manifest:manifest>"#;
        zip_file(
            path,
            &[
                ("mimetype", MIME_ODS),
                ("META-INF/manifest.xml", MANIFEST),
                ("content.xml", CONTENT),
            ],
        );
    }

    #[test]
    fn opendocument_spreadsheet_yields_one_unit_per_sheet() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("budget.ods");
        write_ods(&path);

        let units = SpreadsheetExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].text.contains("Rent"), "{:?}", units[0].text);
        assert!(units[0].text.contains("1200"), "{:?}", units[0].text);
        assert_eq!(units[0].meta("sheet_name").unwrap().as_str(), Some("Budget"));
        assert_eq!(units[1].text, "Paid monthly");
        assert_eq!(units[1].meta("sheet_index").unwrap().as_int(), Some(1));
        assert_eq!(units[1].meta("sheet_name").unwrap().as_str(), Some("Notes"));
    }

    #[test]
    fn legacy_workbook_that_is_not_a_workbook_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.xls");
        std::fs::write(&path, "just text").unwrap();
        let err = SpreadsheetExtractor::default().extract(&path).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::UnsupportedContent);
    }

    /// One line of Courier text per page.
    fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids: Vec<Object> = Vec::new();
        for line in lines {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => lines.len() as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn pdf_pages_are_separated_by_newlines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("two.pdf");
        std::fs::write(&path, pdf_with_pages(&["PageOneEnd", "PageTwoStart"])).unwrap();

        let units = PdfExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 1);
        let text = &units[0].text;
        let first = text.find("PageOneEnd").unwrap();
        let second = text.find("PageTwoStart").unwrap();
        assert!(first < second, "{:?}", text);
        assert!(
            text[first..second].contains('\n'),
            "pages run together: {:?}",
            text
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn slides_follow_numeric_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deck.pptx");
        write_pptx(&path);

        let units = SlideDeckExtractor::default().extract(&path).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Intro\n\nDetails\n\nSummary");
    }

    #[test]
    fn converter_falls_back_to_docx_reader() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memo.docx");
        zip_file(
            &path,
            &[(
                "word/document.xml",
                r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>First</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r></w:p></w:body></w:document>"#,
            )],
        );
        let extractor = ConverterExtractor::new(tmp.path().join("no-such-pandoc"), SizeLimit::default());
        let units = extractor.extract(&path).unwrap();
        assert_eq!(units[0].text, "First\nSecond");
    }

    #[test]
    fn missing_converter_is_an_unknown_error_for_other_formats() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("book.odt");
        std::fs::write(&path, "x").unwrap();
        let extractor = ConverterExtractor::new(tmp.path().join("no-such-pandoc"), SizeLimit::default());
        let err = extractor.extract(&path).unwrap_err();
        assert_eq!(err.kind(), ExtractionErrorKind::UnknownError);
    }

    #[test]
    fn closures_are_extractors() {
        let extractor = |path: &Path| -> Result<Vec<ContentUnit>, ExtractError> {
            Ok(vec![ContentUnit::new(path.display().to_string())])
        };
        let units = extractor.extract(Path::new("a.txt")).unwrap();
        assert_eq!(units[0].text, "a.txt");
    }
}
