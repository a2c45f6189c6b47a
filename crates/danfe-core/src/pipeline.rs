//! Batch extraction over many documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::invoice::{ExtractionDiagnostics, Normalizer, RawDocument, StrategyChain};
use crate::models::config::{DanfeConfig, PdfConfig};
use crate::models::InvoiceRecord;

/// A document that produced no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub source: String,
    pub reason: String,
    /// Fields that were required but not resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl DocumentFailure {
    fn new(source: impl Into<String>, error: &ExtractionError) -> Self {
        let missing = match error {
            ExtractionError::NotViable { missing } => missing.clone(),
            _ => Vec::new(),
        };
        Self {
            source: source.into(),
            reason: error.to_string(),
            missing,
        }
    }
}

/// A document skipped because an identical one came first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateDocument {
    pub source: String,
    pub duplicate_of: String,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Ordered by issue date, then source; undated records last.
    pub records: Vec<InvoiceRecord>,
    pub failures: Vec<DocumentFailure>,
    pub duplicates: Vec<DuplicateDocument>,
    pub diagnostics: Vec<ExtractionDiagnostics>,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.records.len() + self.failures.len()
    }
}

/// Read documents from disk. Unreadable files become failures.
pub fn load_documents(paths: &[PathBuf], pdf_config: &PdfConfig) -> (Vec<RawDocument>, Vec<DocumentFailure>) {
    let mut documents = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in paths {
        match std::fs::read(path) {
            Ok(bytes) => documents.push(RawDocument::new(source_name(path), bytes).with_pdf_config(pdf_config.clone())),
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                failures.push(DocumentFailure {
                    source: source_name(path),
                    reason: format!("read failed: {}", e),
                    missing: Vec::new(),
                });
            }
        }
    }
    (documents, failures)
}

fn source_name(path: &Path) -> String {
    path.display().to_string()
}

/// Extracts and normalizes documents on a bounded pool of worker threads.
pub struct BatchExtractor {
    chain: StrategyChain,
    normalizer: Normalizer,
    workers: usize,
    skip_duplicates: bool,
}

/// Result of extracting and normalizing one document.
#[derive(Debug)]
pub struct DocumentExtraction {
    pub record: Result<InvoiceRecord, ExtractionError>,
    pub diagnostics: ExtractionDiagnostics,
}

impl BatchExtractor {
    pub fn new(chain: StrategyChain, normalizer: Normalizer) -> Self {
        Self {
            chain,
            normalizer,
            workers: 0,
            skip_duplicates: true,
        }
    }

    pub fn from_config(config: &DanfeConfig) -> Self {
        Self::new(
            StrategyChain::from_config(config),
            Normalizer::from_config(&config.extraction),
        )
        .with_workers(config.extraction.workers)
        .with_duplicate_skipping(config.extraction.skip_duplicates)
    }

    /// Worker count; 0 uses the available parallelism.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_duplicate_skipping(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }

    fn worker_count(&self, jobs: usize) -> usize {
        let workers = match self.workers {
            0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        workers.clamp(1, jobs.max(1))
    }

    /// Extract and normalize one document.
    pub fn extract_one(&self, document: &RawDocument) -> DocumentExtraction {
        let extraction = self.chain.extract(document);
        let record = self
            .normalizer
            .normalize(document.source(), &extraction.candidates);
        if let Err(e) = &record {
            info!("{}: rejected: {}", document.source(), e);
        }
        DocumentExtraction {
            record,
            diagnostics: extraction.diagnostics,
        }
    }

    pub fn run(&self, documents: Vec<RawDocument>) -> BatchOutcome {
        self.run_with_progress(documents, |_| {})
    }

    /// Run the batch, calling `on_done` with each document's source as it finishes.
    pub fn run_with_progress<F>(&self, documents: Vec<RawDocument>, on_done: F) -> BatchOutcome
    where
        F: Fn(&str) + Sync,
    {
        let mut outcome = BatchOutcome::default();

        let mut unique = Vec::with_capacity(documents.len());
        let mut seen: HashMap<String, String> = HashMap::new();
        for document in documents {
            if self.skip_duplicates {
                let fingerprint = document.fingerprint();
                if let Some(first) = seen.get(&fingerprint) {
                    debug!("{} duplicates {}", document.source(), first);
                    outcome.duplicates.push(DuplicateDocument {
                        source: document.source().to_string(),
                        duplicate_of: first.clone(),
                    });
                    on_done(document.source());
                    continue;
                }
                seen.insert(fingerprint, document.source().to_string());
            }
            unique.push(document);
        }

        let workers = self.worker_count(unique.len());
        info!("Extracting {} documents with {} workers", unique.len(), workers);

        let extract_all = || {
            unique
                .par_iter()
                .map(|document| {
                    let extraction = self.extract_one(document);
                    on_done(document.source());
                    extraction
                })
                .collect::<Vec<_>>()
        };
        let extractions = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(extract_all),
            Err(e) => {
                warn!("Cannot build a {}-thread pool, using the global one: {}", workers, e);
                extract_all()
            }
        };

        for (document, extraction) in unique.iter().zip(extractions) {
            match extraction.record {
                Ok(record) => outcome.records.push(record),
                Err(e) => outcome.failures.push(DocumentFailure::new(document.source(), &e)),
            }
            outcome.diagnostics.push(extraction.diagnostics);
        }

        outcome
            .records
            .sort_by(|a, b| match (a.issue_date.value(), b.issue_date.value()) {
                (Some(x), Some(y)) => x.cmp(y).then_with(|| a.source.cmp(&b.source)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.source.cmp(&b.source),
            });

        info!(
            "Batch done: {} records, {} failures, {} duplicates",
            outcome.records.len(),
            outcome.failures.len(),
            outcome.duplicates.len()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{ExtractionCandidate, ExtractionStrategy, StrategyKind, StrategyOutcome};
    use crate::invoice::tests::candidate;
    use crate::models::FieldName;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Reads `number;tax_id;date` straight out of the document bytes.
    struct Csvish;

    impl ExtractionStrategy for Csvish {
        fn kind(&self) -> StrategyKind {
            StrategyKind::TextLayer
        }

        fn extract(&self, document: &RawDocument) -> StrategyOutcome {
            let text = String::from_utf8_lossy(document.bytes()).to_string();
            let parts: Vec<&str> = text.split(';').collect();
            let mut out: Vec<ExtractionCandidate> = Vec::new();
            let fields = [FieldName::DocumentNumber, FieldName::IssuerTaxId, FieldName::IssueDate];
            for (field, value) in fields.iter().zip(&parts) {
                if !value.is_empty() {
                    out.push(candidate(*field, value, StrategyKind::TextLayer, 0.9));
                }
            }
            StrategyOutcome::Success(out)
        }
    }

    fn extractor(workers: usize) -> BatchExtractor {
        let chain = StrategyChain::new(0).with_strategy(Arc::new(Csvish));
        BatchExtractor::new(chain, Normalizer::default()).with_workers(workers)
    }

    fn doc(source: &str, body: &str) -> RawDocument {
        RawDocument::new(source, body.as_bytes().to_vec())
    }

    #[test]
    fn test_batch_orders_records_and_collects_failures() {
        let outcome = extractor(3).run(vec![
            doc("c.pdf", "3;11222333000181;15/03/2024"),
            doc("a.pdf", "1;06990590000123;"),
            doc("b.pdf", "2;12345678000195;02/01/2024"),
            doc("bad.pdf", ";;01/01/2024"),
        ]);

        let sources: Vec<&str> = outcome.records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["b.pdf", "c.pdf", "a.pdf"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, "bad.pdf");
        assert!(outcome.failures[0].missing.contains(&"document_number".to_string()));
        assert_eq!(outcome.diagnostics.len(), 4);
        assert_eq!(outcome.processed(), 4);
    }

    #[test]
    fn test_duplicates_skipped() {
        let outcome = extractor(2).run(vec![
            doc("a.pdf", "1;11222333000181;15/03/2024"),
            doc("copy-of-a.pdf", "1;11222333000181;15/03/2024"),
        ]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(
            outcome.duplicates,
            vec![DuplicateDocument {
                source: "copy-of-a.pdf".to_string(),
                duplicate_of: "a.pdf".to_string(),
            }]
        );

        let outcome = extractor(2)
            .with_duplicate_skipping(false)
            .run(vec![doc("a.pdf", "1;11222333000181;"), doc("b.pdf", "1;11222333000181;")]);
        assert_eq!(outcome.records.len(), 2);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let docs = || {
            (0..20)
                .map(|n| doc(&format!("{:02}.pdf", n), &format!("{};11222333000181;{:02}/01/2024", n + 1, n % 28 + 1)))
                .collect::<Vec<_>>()
        };
        let sequential = extractor(1).run(docs());
        let parallel = extractor(8).run(docs());
        assert_eq!(sequential.records, parallel.records);
    }

    #[test]
    fn test_progress_called_per_document() {
        let count = AtomicUsize::new(0);
        extractor(4).run_with_progress(
            vec![doc("a.pdf", "1;11222333000181;"), doc("b.pdf", "1;11222333000181;"), doc("c.pdf", "2;;")],
            |_| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_load_documents_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        std::fs::write(&good, b"1;11222333000181;").unwrap();
        let missing = dir.path().join("missing.pdf");

        let (docs, failures) = load_documents(&[good, missing], &PdfConfig::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.starts_with("read failed"));
    }

    #[test]
    fn test_extract_one_keeps_diagnostics_on_rejection() {
        let extraction = extractor(1).extract_one(&doc("x.pdf", ";;"));
        assert!(matches!(extraction.record, Err(ExtractionError::NotViable { .. })));
        assert_eq!(extraction.diagnostics.source, "x.pdf");
        assert_eq!(extraction.diagnostics.reports.len(), 1);
    }

    #[test]
    fn test_more_workers_than_documents() {
        let outcome = extractor(64).run(vec![doc("a.pdf", "1;11222333000181;15/03/2024")]);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.failures.is_empty());
    }
}
