//! PDF text extraction via lopdf.
//!
//! Extraction is per-page so chunk metadata can carry page numbers.
//! A page that fails to decode becomes an empty string rather than failing
//! the whole document; a PDF with no extractable text at all is an error.

use lopdf::Document;
use tracing::warn;

use crate::error::AppError;

/// Extract per-page plain text from PDF bytes.
///
/// Returns one entry per page, whitespace-normalised. Pages with no
/// extractable text are kept as empty strings so indices still line up
/// with page numbers.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, AppError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| AppError::Ingest(format!("cannot parse PDF: {e}")))?;

    if doc.is_encrypted() {
        return Err(AppError::Ingest("encrypted PDFs are not supported".into()));
    }

    let page_map = doc.get_pages();
    if page_map.is_empty() {
        return Err(AppError::Ingest("PDF has no pages".into()));
    }

    let mut pages = Vec::with_capacity(page_map.len());
    for (&page_no, _) in &page_map {
        match doc.extract_text(&[page_no]) {
            Ok(raw) => pages.push(clean_text(&raw)),
            Err(e) => {
                warn!(page = page_no, error = %e, "failed to extract page text");
                pages.push(String::new());
            }
        }
    }

    if pages.iter().all(|p| p.is_empty()) {
        return Err(AppError::Ingest(
            "no extractable text in PDF (scanned image?)".into(),
        ));
    }

    Ok(pages)
}

/// Collapse whitespace runs (including newlines from the PDF text operators)
/// into single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bytes_error() {
        let result = extract_pages(b"this is not a pdf");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot parse PDF"));
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("a\n b\t\tc   d "), "a b c d");
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("  \n "), "");
    }
}
