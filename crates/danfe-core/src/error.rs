//! Error types for the danfe-core library.

use thiserror::Error;

/// Main error type for the danfe library.
#[derive(Error, Debug)]
pub enum DanfeError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Invoice extraction error.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Registry lookup error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Narrative text analyzer error.
    #[error("narrative error: {0}")]
    Narrative(#[from] NarrativeError),

    /// Configuration error. The only error that aborts a pipeline run.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to PDF processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// Failed to extract images from PDF.
    #[error("failed to extract images: {0}")]
    ImageExtraction(String),

    /// Failed to decode a page content stream.
    #[error("failed to decode page {page} content: {reason}")]
    Content { page: u32, reason: String },

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),
}

/// Errors related to OCR processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors related to invoice field extraction and normalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// No strategy produced any candidate for the document.
    #[error("no invoice data found in {0}")]
    NoData(String),

    /// Field validation failed.
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The record lacks the fields needed to be usable.
    #[error("record not viable, missing: {}", missing.join(", "))]
    NotViable { missing: Vec<String> },
}

/// Errors raised while talking to registry providers or the profile cache.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The cache file could not be read or written.
    #[error("profile cache error: {0}")]
    Cache(String),

    /// The registry settings are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from a narrative text analyzer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NarrativeError {
    /// The analyzer is not usable as configured (e.g. no API key).
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    /// The request could not be sent or returned a non-success status.
    #[error("request failed: {0}")]
    Request(String),

    /// The response carried no usable text.
    #[error("unexpected response: {0}")]
    Response(String),
}

/// Configuration problems. Fatal at analyzer startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required rate constant is not configured.
    #[error("missing required rate: {0}")]
    MissingRate(&'static str),

    /// A rate lies outside [0, 1].
    #[error("rate {name} out of range: {value}")]
    RateOutOfRange { name: &'static str, value: String },

    /// The CFOP rule table is malformed.
    #[error("malformed rule table: {0}")]
    RuleTable(String),

    /// Any other invalid setting.
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Result type for the danfe library.
pub type Result<T> = std::result::Result<T, DanfeError>;
