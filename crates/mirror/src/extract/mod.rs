//! Content extraction
//!
//! Converts downloaded bytes into normalized plain text. Extraction is total:
//! unsupported or corrupt input yields a short diagnostic string instead of
//! an error, so one bad file never stops a pass.

mod docx;
mod pdf;
mod sheet;
mod workbook;
mod xml;

use std::collections::HashMap;

use crate::drive::mime;

/// Capability to turn raw bytes into text
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str, source_url: Option<&str>) -> String;
}

/// Returned for PDFs without an extractable text layer
pub const PDF_PLACEHOLDER: &str = "This PDF has no extractable text.";

/// The extraction strategies available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// Word documents (and Google Docs exported as such)
    Docx,
    /// Delimited text (CSV files and Google Sheets exported as CSV)
    Spreadsheet,
    /// Excel workbooks, first sheet only
    Workbook,
    PlainText,
    /// Text layer of a PDF
    Pdf,
    Unsupported,
}

impl Extractor {
    /// Run the extractor. The result is not yet normalized.
    pub fn run(self, bytes: &[u8], mime_type: &str, source_url: Option<&str>) -> String {
        match self {
            Extractor::Docx => docx::extract(bytes).unwrap_or_else(|e| {
                log::warn!("Failed to read Word document: {:#}", e);
                format!("Could not extract text from Word document: {}", e)
            }),
            Extractor::Spreadsheet => sheet::extract_csv(bytes, source_url),
            Extractor::Workbook => workbook::extract(bytes, source_url).unwrap_or_else(|e| {
                log::warn!("Failed to read Excel workbook: {:#}", e);
                format!("Could not extract text from Excel workbook: {}", e)
            }),
            Extractor::PlainText => String::from_utf8_lossy(bytes).into_owned(),
            Extractor::Pdf => pdf::extract(bytes),
            Extractor::Unsupported => format!("Unsupported format: {}", mime_type),
        }
    }
}

/// Maps MIME types to extractors, with [`Extractor::Unsupported`] as the default
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    by_mime: HashMap<String, Extractor>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(mime::GOOGLE_DOC, Extractor::Docx);
        registry.register(mime::DOCX, Extractor::Docx);
        registry.register(mime::GOOGLE_SHEET, Extractor::Spreadsheet);
        registry.register(mime::CSV, Extractor::Spreadsheet);
        registry.register(mime::CSV_ALT, Extractor::Spreadsheet);
        registry.register(mime::XLSX, Extractor::Workbook);
        registry.register(mime::TEXT, Extractor::PlainText);
        registry.register(mime::MARKDOWN, Extractor::PlainText);
        registry.register(mime::PDF, Extractor::Pdf);
        registry
    }
}

impl ExtractorRegistry {
    /// A registry where every type is unsupported
    pub fn empty() -> Self {
        Self {
            by_mime: HashMap::new(),
        }
    }

    pub fn register(&mut self, mime_type: &str, extractor: Extractor) {
        self.by_mime.insert(mime_type.to_string(), extractor);
    }

    pub fn lookup(&self, mime_type: &str) -> Extractor {
        self.by_mime
            .get(mime_type)
            .copied()
            .unwrap_or(Extractor::Unsupported)
    }
}

impl ContentExtractor for ExtractorRegistry {
    fn extract(&self, bytes: &[u8], mime_type: &str, source_url: Option<&str>) -> String {
        let raw = self.lookup(mime_type).run(bytes, mime_type, source_url);
        normalize_text(&raw)
    }
}

/// Normalize line endings and whitespace.
///
/// Trailing whitespace is trimmed per line, runs of blank lines collapse to
/// one, and leading/trailing blank lines are dropped.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }

    out
}
