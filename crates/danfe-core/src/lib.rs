//! Core library for Brazilian invoice (DANFE) processing.
//!
//! This crate provides:
//! - PDF processing (text layer, positioned text runs, page images)
//! - Layered field extraction (text layer, layout, OCR) with per-strategy diagnostics
//! - Normalization of candidates into typed invoice records (BRL amounts, dates, CNPJ/CPF, CFOP)
//! - Taxpayer registry enrichment with caching and provider fallback
//! - Financial metrics and CFOP impact simulation against a declared regime

pub mod analysis;
pub mod error;
pub mod invoice;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod registry;

pub use analysis::{analyze, ImpactResult, TextAnalyzer};
pub use error::{DanfeError, Result};
pub use invoice::{ExtractionCandidate, Normalizer, RawDocument, StrategyChain, StrategyKind};
pub use models::{DanfeConfig, FiscalProfile, InvoiceRecord, Regime, RegistrationStatus, TaxId};
pub use ocr::{OcrBackend, OcrResult, TextBox};
pub use pdf::{PdfExtractor, PdfProcessor, PdfType};
pub use pipeline::{BatchExtractor, BatchOutcome, DocumentFailure};
pub use registry::{Enricher, RegistryProvider};
