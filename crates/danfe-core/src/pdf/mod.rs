//! PDF processing module.

mod content;
mod extractor;
#[cfg(test)]
pub(crate) mod fixtures;

pub use content::{Matrix, TextRun};
pub use extractor::PdfExtractor;

use crate::error::PdfError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Type of PDF content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfType {
    /// Contains extractable text.
    Text,
    /// Contains only images (scanned document).
    Image,
    /// Contains both text and images.
    Hybrid,
    /// Empty or unreadable.
    Empty,
}

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Trait for PDF processing implementations.
pub trait PdfProcessor {
    /// Load a PDF from bytes.
    fn load(&mut self, data: &[u8]) -> Result<()>;

    /// Get the number of pages in the PDF.
    fn page_count(&self) -> u32;

    /// Analyze the PDF to determine its type.
    fn analyze(&self) -> PdfType;

    /// Extract text from the entire PDF.
    fn extract_text(&self) -> Result<String>;

    /// Text of the first `max_pages` pages (0 = all), joined with newlines.
    fn extract_text_pages(&self, max_pages: usize) -> Result<String>;

    /// Positioned text runs of a page, in content-stream order.
    fn text_runs(&self, page: u32) -> Result<Vec<TextRun>>;

    /// Extract embedded images from a page.
    fn extract_images(&self, page: u32) -> Result<Vec<DynamicImage>>;
}
