//! Per-page PDF text extraction.
//!
//! Turns raw PDF bytes into ordered [`TextSegment`]s, one per page with
//! non-blank text. Only a container that cannot be parsed at all is an
//! error; a page that fails to decode is logged and skipped so the rest of
//! the document still gets checked.

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::TextSegment;

pub const MIME_PDF: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document {document} is unreadable: {reason}")]
    DocumentUnreadable { document: String, reason: String },
}

/// Check that `bytes` parse as a PDF container without extracting text.
pub fn check_readable(source: &str, bytes: &[u8]) -> Result<(), ExtractError> {
    lopdf::Document::load_mem(bytes)
        .map(|_| ())
        .map_err(|e| ExtractError::DocumentUnreadable {
            document: source.to_string(),
            reason: e.to_string(),
        })
}

/// Extract page text from a PDF held in memory.
///
/// Pages are visited in document order. Pages whose text is empty or
/// whitespace-only are not emitted.
pub fn extract_segments(source: &str, bytes: &[u8]) -> Result<Vec<TextSegment>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::DocumentUnreadable {
        document: source.to_string(),
        reason: e.to_string(),
    })?;

    let pages = doc.get_pages();
    let mut segments = Vec::with_capacity(pages.len());

    // BTreeMap keys are page numbers, so iteration is document order.
    for page in pages.keys().copied() {
        match doc.extract_text(&[page]) {
            Ok(text) => {
                if text.trim().is_empty() {
                    debug!(document = %source, page, "skipping blank page");
                    continue;
                }
                segments.push(TextSegment {
                    source: source.to_string(),
                    page,
                    text,
                });
            }
            Err(e) => {
                warn!(document = %source, page, error = %e, "page text extraction failed, skipping page");
            }
        }
    }

    Ok(segments)
}
