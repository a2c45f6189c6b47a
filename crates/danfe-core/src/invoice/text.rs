//! Direct text-layer extraction.

use tracing::debug;

use super::{candidates_from_grid, ExtractionStrategy, RawDocument, StrategyKind, StrategyOutcome, TextGrid};
use crate::pdf::PdfProcessor;

/// Reads the embedded text layer with pdf-extract.
pub struct TextLayerStrategy {
    confidence: f32,
}

impl TextLayerStrategy {
    pub fn new() -> Self {
        Self { confidence: 0.9 }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for TextLayerStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for TextLayerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TextLayer
    }

    fn extract(&self, document: &RawDocument) -> StrategyOutcome {
        let pdf = match document.pdf() {
            Ok(pdf) => pdf,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };
        let text = match pdf.extract_text_pages(document.pdf_config().max_pages) {
            Ok(text) => text,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };

        let chars = text.trim().chars().count();
        let min = document.pdf_config().min_text_length;
        if chars < min {
            return StrategyOutcome::Skipped(format!("text layer has {} chars, need {}", chars, min));
        }

        let grid = TextGrid::from_text(&text);
        debug!("text layer: {} lines", grid.rows().len());
        StrategyOutcome::Success(candidates_from_grid(&grid, self.kind(), self.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::PdfConfig;
    use crate::models::FieldName;
    use crate::pdf::fixtures::build_pages;

    const FIRST_PAGE: &[(f32, f32, f32, &str)] = &[
        (40.0, 800.0, 8.0, "DANFE DOCUMENTO AUXILIAR DA NOTA FISCAL ELETRONICA"),
        (40.0, 780.0, 8.0, "NUMERO 000.004.321"),
    ];
    const SECOND_PAGE: &[(f32, f32, f32, &str)] = &[
        (40.0, 800.0, 8.0, "DADOS ADICIONAIS DA NOTA FISCAL ELETRONICA CONTINUACAO"),
        (40.0, 780.0, 8.0, "CNPJ 11.222.333/0001-81"),
    ];

    fn fields(max_pages: usize) -> Vec<FieldName> {
        let bytes = build_pages(&[(FIRST_PAGE, false), (SECOND_PAGE, false)]);
        let document = RawDocument::new("two.pdf", bytes).with_pdf_config(PdfConfig {
            max_pages,
            ..PdfConfig::default()
        });
        match TextLayerStrategy::new().extract(&document) {
            StrategyOutcome::Success(candidates) => candidates.into_iter().map(|c| c.field).collect(),
            StrategyOutcome::Skipped(reason) => panic!("text layer skipped: {}", reason),
        }
    }

    #[test]
    fn test_reads_every_page_without_limit() {
        let found = fields(0);
        assert!(found.contains(&FieldName::DocumentNumber));
        assert!(found.contains(&FieldName::IssuerTaxId));
    }

    #[test]
    fn test_honors_max_pages() {
        let found = fields(1);
        assert!(found.contains(&FieldName::DocumentNumber));
        assert!(!found.contains(&FieldName::IssuerTaxId));
    }

    #[test]
    fn test_short_text_layer_skips() {
        let bytes = build_pages(&[(&[(40.0, 800.0, 8.0, "DANFE")], false)]);
        let outcome = TextLayerStrategy::new().extract(&RawDocument::new("short.pdf", bytes));
        assert!(matches!(outcome, StrategyOutcome::Skipped(_)));
    }
}
