//! Invoice field extraction.
//!
//! A document goes through an ordered chain of strategies (text layer,
//! content-stream layout, OCR). Each strategy turns what it can read into a
//! [`TextGrid`] and runs the shared rule table over it, producing
//! [`ExtractionCandidate`]s. Candidates are only merged later, by the
//! normalizer.

pub mod grid;
mod layout;
pub mod normalizer;
mod ocr;
pub mod rules;
mod text;

pub use grid::{Cell, Sections, TextGrid};
pub use layout::LayoutStrategy;
pub use normalizer::Normalizer;
pub use ocr::OcrStrategy;
pub use text::TextLayerStrategy;

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::PdfError;
use crate::models::config::{DanfeConfig, PdfConfig};
use crate::models::FieldName;
use crate::pdf::{PdfExtractor, PdfProcessor, PdfType};
use rules::FIELD_RULES;

/// Immutable document payload plus where it came from.
pub struct RawDocument {
    source: String,
    bytes: Vec<u8>,
    pdf_config: PdfConfig,
    pdf: OnceLock<Result<PdfExtractor, PdfError>>,
}

impl RawDocument {
    pub fn new(source: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source: source.into(),
            bytes,
            pdf_config: PdfConfig::default(),
            pdf: OnceLock::new(),
        }
    }

    pub fn with_pdf_config(mut self, config: PdfConfig) -> Self {
        self.pdf_config = config;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pdf_config(&self) -> &PdfConfig {
        &self.pdf_config
    }

    /// Parsed PDF, loaded once and shared by every strategy.
    pub fn pdf(&self) -> Result<&PdfExtractor, PdfError> {
        self.pdf
            .get_or_init(|| {
                PdfExtractor::from_bytes(&self.bytes)
                    .map(|p| p.with_min_text_length(self.pdf_config.min_text_length))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Pages strategies should look at, honoring `max_pages`.
    pub fn pages(&self) -> Result<std::ops::RangeInclusive<u32>, PdfError> {
        let count = self.pdf()?.page_count();
        let last = match self.pdf_config.max_pages {
            0 => count,
            max => count.min(max as u32),
        };
        Ok(1..=last)
    }

    /// Hex SHA-256 of the content.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

/// Hex SHA-256 of a byte payload.
pub fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Extraction strategies, in trust order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    TextLayer,
    Layout,
    Ocr,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::TextLayer => "text_layer",
            StrategyKind::Layout => "layout",
            StrategyKind::Ocr => "ocr",
        })
    }
}

/// One possible value for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub field: FieldName,
    /// Raw text as matched; typed conversion happens in the normalizer.
    pub value: String,
    pub strategy: StrategyKind,
    pub confidence: f32,
    /// Line the value was read from.
    pub source: String,
}

/// Tagged result of running one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Success(Vec<ExtractionCandidate>),
    Skipped(String),
}

/// A way of reading invoice fields out of a document.
///
/// Strategies are stateless with respect to the document: they read it and
/// return candidates, never touching shared state.
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn extract(&self, document: &RawDocument) -> StrategyOutcome;
}

/// Run the rule table over a grid and tag the hits with a strategy.
pub fn candidates_from_grid(grid: &TextGrid, strategy: StrategyKind, base_confidence: f32) -> Vec<ExtractionCandidate> {
    grid.apply_rules(&FIELD_RULES)
        .into_iter()
        .map(|(field, m)| ExtractionCandidate {
            field,
            value: m.value,
            strategy,
            confidence: (base_confidence * m.confidence).clamp(0.0, 1.0),
            source: m.source,
        })
        .collect()
}

/// What happened to one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy: StrategyKind,
    /// Candidates produced (0 when skipped).
    pub candidates: usize,
    /// Distinct fields among those candidates.
    pub fields: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub elapsed_ms: u64,
}

/// Per-document extraction diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDiagnostics {
    pub source: String,
    pub pdf_type: Option<PdfType>,
    pub reports: Vec<StrategyReport>,
}

impl ExtractionDiagnostics {
    /// Strategies that did not run to completion.
    pub fn skipped(&self) -> impl Iterator<Item = &StrategyReport> {
        self.reports.iter().filter(|r| r.skipped.is_some())
    }
}

/// Candidates from every strategy that ran, in chain order.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<ExtractionCandidate>,
    pub diagnostics: ExtractionDiagnostics,
}

impl Extraction {
    pub fn distinct_fields(&self) -> usize {
        distinct_fields(&self.candidates)
    }
}

fn distinct_fields(candidates: &[ExtractionCandidate]) -> usize {
    candidates.iter().map(|c| c.field).collect::<BTreeSet<_>>().len()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Ordered strategy chain with a field-count gate in front of OCR.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    min_fields_before_ocr: usize,
}

impl StrategyChain {
    /// Empty chain; add strategies in trust order.
    pub fn new(min_fields_before_ocr: usize) -> Self {
        Self {
            strategies: Vec::new(),
            min_fields_before_ocr,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Text layer, layout and (when built with the `ocr` feature and enabled) OCR.
    pub fn from_config(config: &DanfeConfig) -> Self {
        let chain = Self::new(config.extraction.min_fields_before_ocr)
            .with_strategy(Arc::new(TextLayerStrategy::new()))
            .with_strategy(Arc::new(LayoutStrategy::new()));

        if !config.ocr.enabled {
            return chain;
        }
        chain.with_strategy(Arc::new(OcrStrategy::from_config(&config.ocr)))
    }

    pub fn strategies(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.strategies.iter().map(|s| s.kind())
    }

    /// Run the chain over one document.
    pub fn extract(&self, document: &RawDocument) -> Extraction {
        let mut extraction = Extraction {
            candidates: Vec::new(),
            diagnostics: ExtractionDiagnostics {
                source: document.source().to_string(),
                pdf_type: None,
                reports: Vec::new(),
            },
        };

        extraction.diagnostics.pdf_type = panic::catch_unwind(AssertUnwindSafe(|| {
            document.pdf().ok().map(|pdf| pdf.analyze())
        }))
        .ok()
        .flatten();

        for strategy in &self.strategies {
            let kind = strategy.kind();

            if kind == StrategyKind::Ocr {
                let found = extraction.distinct_fields();
                if found >= self.min_fields_before_ocr {
                    debug!(
                        "{}: {} fields found before OCR, skipping it",
                        document.source(),
                        found
                    );
                    continue;
                }
            }

            let start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.extract(document)))
                .unwrap_or_else(|payload| {
                    StrategyOutcome::Skipped(format!("strategy panicked: {}", panic_message(payload.as_ref())))
                });
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let report = match outcome {
                StrategyOutcome::Success(candidates) => {
                    let report = StrategyReport {
                        strategy: kind,
                        candidates: candidates.len(),
                        fields: distinct_fields(&candidates),
                        skipped: None,
                        elapsed_ms,
                    };
                    debug!(
                        "{}: {} produced {} candidates for {} fields",
                        document.source(),
                        kind,
                        report.candidates,
                        report.fields
                    );
                    extraction.candidates.extend(candidates);
                    report
                }
                StrategyOutcome::Skipped(reason) => {
                    warn!("{}: {} skipped: {}", document.source(), kind, reason);
                    StrategyReport {
                        strategy: kind,
                        candidates: 0,
                        fields: 0,
                        skipped: Some(reason),
                        elapsed_ms,
                    }
                }
            };
            extraction.diagnostics.reports.push(report);
        }

        info!(
            "{}: {} candidates across {} fields",
            document.source(),
            extraction.candidates.len(),
            extraction.distinct_fields()
        );
        extraction
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn candidate(field: FieldName, value: &str, strategy: StrategyKind, confidence: f32) -> ExtractionCandidate {
        ExtractionCandidate {
            field,
            value: value.to_string(),
            strategy,
            confidence,
            source: value.to_string(),
        }
    }

    struct Fixed {
        kind: StrategyKind,
        fields: Vec<FieldName>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(kind: StrategyKind, fields: Vec<FieldName>) -> Self {
            Self { kind, fields, calls: AtomicUsize::new(0) }
        }
    }

    impl ExtractionStrategy for Fixed {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn extract(&self, _document: &RawDocument) -> StrategyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StrategyOutcome::Success(self.fields.iter().map(|f| candidate(*f, "x", self.kind, 0.9)).collect())
        }
    }

    struct Panicking;

    impl ExtractionStrategy for Panicking {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Layout
        }

        fn extract(&self, _document: &RawDocument) -> StrategyOutcome {
            panic!("bad content stream")
        }
    }

    fn doc() -> RawDocument {
        RawDocument::new("test.pdf", b"not a pdf".to_vec())
    }

    #[test]
    fn test_ocr_gated_by_field_count() {
        let text = Arc::new(Fixed::new(
            StrategyKind::TextLayer,
            vec![FieldName::DocumentNumber, FieldName::IssuerTaxId, FieldName::TotalValue],
        ));
        let ocr = Arc::new(Fixed::new(StrategyKind::Ocr, vec![FieldName::Cfop]));

        let chain = StrategyChain::new(3).with_strategy(text.clone()).with_strategy(ocr.clone());
        let extraction = chain.extract(&doc());
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(extraction.distinct_fields(), 3);

        let chain = StrategyChain::new(4).with_strategy(text).with_strategy(ocr.clone());
        let extraction = chain.extract(&doc());
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extraction.distinct_fields(), 4);
    }

    #[test]
    fn test_panicking_strategy_is_skipped() {
        let chain = StrategyChain::new(0)
            .with_strategy(Arc::new(Panicking))
            .with_strategy(Arc::new(Fixed::new(StrategyKind::TextLayer, vec![FieldName::Series])));
        let extraction = chain.extract(&doc());

        assert_eq!(extraction.candidates.len(), 1);
        let skipped: Vec<_> = extraction.diagnostics.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].skipped.as_ref().unwrap().contains("bad content stream"));
    }

    #[test]
    fn test_unreadable_pdf_skips_every_builtin_strategy() {
        let chain = StrategyChain::new(4)
            .with_strategy(Arc::new(TextLayerStrategy::new()))
            .with_strategy(Arc::new(LayoutStrategy::new()));
        let extraction = chain.extract(&doc());

        assert!(extraction.candidates.is_empty());
        assert_eq!(extraction.diagnostics.pdf_type, None);
        assert_eq!(extraction.diagnostics.skipped().count(), 2);
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(doc().fingerprint(), fingerprint(b"not a pdf"));
    }
}
