//! PDF text extraction

use std::panic::{AssertUnwindSafe, catch_unwind};

use super::PDF_PLACEHOLDER;

/// Text layer of a PDF. Scans, encrypted files and anything the parser
/// rejects fall back to the placeholder.
pub(super) fn extract(bytes: &[u8]) -> String {
    // The parser panics on some malformed inputs
    let result = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match result {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        Ok(Ok(_)) => {
            log::debug!("PDF has no text layer");
            PDF_PLACEHOLDER.to_string()
        }
        Ok(Err(e)) => {
            log::warn!("Failed to read PDF: {:?}", e);
            PDF_PLACEHOLDER.to_string()
        }
        Err(_) => {
            log::warn!("PDF parser aborted on malformed input");
            PDF_PLACEHOLDER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_pdf_falls_back() {
        assert_eq!(extract(b"%PDF-1.7\n"), PDF_PLACEHOLDER);
        assert_eq!(extract(b""), PDF_PLACEHOLDER);
    }
}
