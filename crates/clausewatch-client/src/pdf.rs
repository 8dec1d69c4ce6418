use std::panic;

use clausewatch_core::error::AppError;

/// A PDF yielding less text than this is treated as unreadable.
pub const MIN_PDF_TEXT: usize = 100;

/// Extract the text layer of a PDF and normalize its whitespace.
pub fn extract_text(bytes: &[u8]) -> Result<String, AppError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let raw = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| AppError::ExtractionError("PDF parser aborted on malformed input".into()))?
        .map_err(|e| AppError::ExtractionError(format!("Unreadable PDF: {e}")))?;

    let text = crate::extractor::normalize_plain_text(&raw);
    let length = text.chars().count();
    if length < MIN_PDF_TEXT {
        return Err(AppError::ContentTooShort {
            length,
            required: MIN_PDF_TEXT,
        });
    }

    tracing::debug!(chars = length, "Extracted PDF text");
    Ok(text)
}
