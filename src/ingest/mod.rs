//! Document ingestion — PDF text extraction and fixed-size chunking.
//!
//! The pipeline is: extract per-page text ([`pdf::extract_pages`]) →
//! normalise whitespace → slice into overlapping chunks
//! ([`chunker::chunk_text`]) → hand off to the memory subsystem for
//! indexing.

pub mod chunker;
pub mod pdf;

/// Derive a document title from an uploaded filename: strip the extension
/// and replace separator characters with spaces.
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let title = stem.replace(['_', '-'], " ").trim().to_string();
    if title.is_empty() {
        "Untitled document".to_string()
    } else {
        title
    }
}
