//! Document extraction: source bytes + filename -> normalised plain text.
//!
//! Dispatch is by file extension (case-insensitive). DOCX/DOCM are unpacked
//! in-process from the zip container; PDF goes through a pluggable
//! [`PdfTextExtractor`] so the byte-to-text engine stays replaceable; TXT
//! is passed through. All paths emit UTF-8 with `\n` paragraph breaks, no
//! carriage returns, and collapsed whitespace runs.

mod docx;
mod pdf;

pub use pdf::{FixedPdfExtractor, LayoutPdfExtractor, PdfTextExtractor};

use quayside_protocol::SourceFormat;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {file_name}")]
    UnsupportedFormat { file_name: String },
    #[error("document is empty")]
    Empty,
    #[error("extraction failed: {detail}")]
    ExtractFailed { detail: String },
}

impl ExtractError {
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::ExtractFailed {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Extraction engine. Cheap to clone; the PDF engine is shared.
#[derive(Clone)]
pub struct DocumentExtractor {
    pdf: Arc<dyn PdfTextExtractor>,
}

impl DocumentExtractor {
    pub fn new(pdf: Arc<dyn PdfTextExtractor>) -> Self {
        Self { pdf }
    }

    /// Extract normalised text from `bytes` named `file_name`.
    ///
    /// Synchronous by design; callers on the async side run it on the
    /// blocking pool.
    pub fn extract(&self, bytes: &[u8], file_name: &str) -> Result<String> {
        let format = SourceFormat::from_file_name(file_name).ok_or_else(|| {
            ExtractError::UnsupportedFormat {
                file_name: file_name.to_string(),
            }
        })?;
        if bytes.is_empty() {
            return Err(ExtractError::Empty);
        }
        tracing::debug!(file_name, format = format.as_str(), size = bytes.len(), "extracting");

        let raw = match format {
            SourceFormat::Pdf => self.pdf.extract_text(bytes)?,
            // DOCM differs from DOCX only by its macro payload, which the
            // walker never opens.
            SourceFormat::Docx | SourceFormat::Docm => docx::extract_docx_text(bytes)?,
            SourceFormat::Txt => String::from_utf8_lossy(bytes).into_owned(),
        };

        let text = normalise_text(&raw);
        if text.is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text)
    }
}

/// Normalise extractor output: CRLF -> LF, tabs -> spaces, collapse runs of
/// spaces, cap consecutive blank lines at one, trim the ends.
pub fn normalise_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n").replace('\t', " ");

    let mut out = String::with_capacity(unified.len());
    let mut pending_newlines = 0usize;
    for line in unified.split('\n') {
        let mut collapsed = String::with_capacity(line.len());
        let mut prev_space = false;
        for c in line.chars() {
            if c == ' ' || c == '\u{a0}' {
                if !prev_space {
                    collapsed.push(' ');
                }
                prev_space = true;
            } else {
                collapsed.push(c);
                prev_space = false;
            }
        }
        let trimmed = collapsed.trim();
        if trimmed.is_empty() {
            pending_newlines = pending_newlines.max(2);
        } else {
            if !out.is_empty() {
                for _ in 0..pending_newlines.max(1) {
                    out.push('\n');
                }
            }
            out.push_str(trimmed);
            pending_newlines = 0;
        }
    }
    out
}
