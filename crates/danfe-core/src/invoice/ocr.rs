//! OCR over the page images of scanned documents.

use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, warn};

use super::{candidates_from_grid, Cell, ExtractionStrategy, RawDocument, StrategyKind, StrategyOutcome, TextGrid};
use crate::models::config::OcrConfig;
use crate::ocr::{OcrBackend, TextBox};
use crate::pdf::PdfProcessor;

/// Recognition scores are scaled by this before rule weights apply.
const OCR_TRUST: f32 = 0.8;

pub struct OcrStrategy {
    backend: Result<Arc<dyn OcrBackend>, String>,
}

impl OcrStrategy {
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self { backend: Ok(backend) }
    }

    /// A strategy that always skips, e.g. because models failed to load.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: Err(reason.into()),
        }
    }

    /// Load the configured OCR backend.
    #[cfg(feature = "ocr")]
    pub fn from_config(config: &OcrConfig) -> Self {
        match crate::ocr::PureOcrEngine::from_config(config) {
            Ok(engine) => Self::new(Arc::new(engine)),
            Err(e) => {
                warn!("OCR disabled: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    #[cfg(not(feature = "ocr"))]
    pub fn from_config(_config: &OcrConfig) -> Self {
        Self::unavailable("built without the ocr feature")
    }
}

/// Rows of boxes, top of the image first.
pub fn group_boxes(mut boxes: Vec<TextBox>) -> Vec<Vec<Cell>> {
    boxes.sort_by(|a, b| a.center().1.partial_cmp(&b.center().1).unwrap_or(std::cmp::Ordering::Equal));

    let mut rows: Vec<Vec<TextBox>> = Vec::new();
    for b in boxes {
        match rows.last_mut() {
            Some(row) if (b.center().1 - row[0].center().1).abs() <= 0.6 * b.height().max(row[0].height()) => {
                row.push(b)
            }
            _ => rows.push(vec![b]),
        }
    }

    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|b| {
                    let (x0, _, x1, _) = b.rect();
                    Cell { text: b.text, x0, x1 }
                })
                .collect()
        })
        .collect()
}

fn largest(images: Vec<DynamicImage>) -> Option<DynamicImage> {
    images
        .into_iter()
        .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
}

impl ExtractionStrategy for OcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ocr
    }

    fn extract(&self, document: &RawDocument) -> StrategyOutcome {
        let backend = match &self.backend {
            Ok(backend) => backend,
            Err(reason) => return StrategyOutcome::Skipped(reason.clone()),
        };
        let pdf = match document.pdf() {
            Ok(pdf) => pdf,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };
        let pages = match document.pages() {
            Ok(pages) => pages,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };

        let mut rows = Vec::new();
        let mut scanned_pages = 0;
        // Weighted by box count so blank pages do not drag the score down
        let mut score_sum = 0.0f32;
        let mut box_count = 0usize;
        for page in pages {
            // A scanned page is its largest image
            let image = match pdf.extract_images(page).map(largest) {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(e) => return StrategyOutcome::Skipped(e.to_string()),
            };
            match backend.recognize(&image) {
                Ok(result) => {
                    debug!("page {}: {} OCR boxes", page, result.boxes.len());
                    scanned_pages += 1;
                    score_sum += result.boxes.iter().map(|b| b.score).sum::<f32>();
                    box_count += result.boxes.len();
                    rows.extend(group_boxes(result.boxes));
                }
                Err(e) => return StrategyOutcome::Skipped(e.to_string()),
            }
        }

        if scanned_pages == 0 {
            return StrategyOutcome::Skipped("no page images".to_string());
        }
        let grid = TextGrid::from_rows(rows);
        if grid.is_empty() {
            return StrategyOutcome::Skipped("no text recognized".to_string());
        }

        let mean = if box_count == 0 { 0.0 } else { score_sum / box_count as f32 };
        StrategyOutcome::Success(candidates_from_grid(&grid, self.kind(), OCR_TRUST * mean))
    }
}
