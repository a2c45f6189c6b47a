//! Layout-aware extraction from content-stream positions.
//!
//! Text runs are grouped into rows by baseline and into cells by horizontal
//! gaps, so values printed beneath their labels (the DANFE tax block) can be
//! paired with the right column.

use tracing::debug;

use super::{candidates_from_grid, Cell, ExtractionStrategy, RawDocument, StrategyKind, StrategyOutcome, TextGrid};
use crate::pdf::{PdfProcessor, TextRun};

/// Baselines closer than this fraction of the font size share a row.
const ROW_TOLERANCE: f32 = 0.5;
/// Gaps wider than this fraction of the font size start a new cell.
const CELL_GAP: f32 = 1.0;
/// Gaps wider than this fraction of the font size get a space.
const WORD_GAP: f32 = 0.15;

pub struct LayoutStrategy {
    confidence: f32,
}

impl LayoutStrategy {
    pub fn new() -> Self {
        Self { confidence: 0.85 }
    }
}

impl Default for LayoutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Rows of cells, top of the page first.
pub fn group_runs(mut runs: Vec<TextRun>) -> Vec<Vec<Cell>> {
    runs.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal));

    let mut rows: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        match rows.last_mut() {
            Some(row)
                if (row[0].y - run.y).abs() <= ROW_TOLERANCE * row[0].font_size.max(run.font_size).max(1.0) =>
            {
                row.push(run)
            }
            _ => rows.push(vec![run]),
        }
    }

    rows.into_iter().map(cells_of_row).collect()
}

fn cells_of_row(mut row: Vec<TextRun>) -> Vec<Cell> {
    row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

    let mut cells: Vec<Cell> = Vec::new();
    for run in row {
        let size = run.font_size.max(1.0);
        let text = run.text.trim();
        match cells.last_mut() {
            Some(cell) if run.x - cell.x1 <= CELL_GAP * size => {
                if run.x - cell.x1 > WORD_GAP * size && !cell.text.ends_with(' ') {
                    cell.text.push(' ');
                }
                cell.text.push_str(text);
                cell.x1 = cell.x1.max(run.x_end());
            }
            _ => cells.push(Cell {
                text: text.to_string(),
                x0: run.x,
                x1: run.x_end(),
            }),
        }
    }
    cells
}

impl ExtractionStrategy for LayoutStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Layout
    }

    fn extract(&self, document: &RawDocument) -> StrategyOutcome {
        let pdf = match document.pdf() {
            Ok(pdf) => pdf,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };
        let pages = match document.pages() {
            Ok(pages) => pages,
            Err(e) => return StrategyOutcome::Skipped(e.to_string()),
        };

        let mut rows = Vec::new();
        for page in pages {
            match pdf.text_runs(page) {
                Ok(runs) => rows.extend(group_runs(runs)),
                Err(e) => return StrategyOutcome::Skipped(e.to_string()),
            }
        }

        let grid = TextGrid::from_rows(rows);
        if grid.is_empty() {
            return StrategyOutcome::Skipped("no positioned text".to_string());
        }
        debug!("layout: {} rows", grid.rows().len());
        StrategyOutcome::Success(candidates_from_grid(&grid, self.kind(), self.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldName;
    use crate::pdf::fixtures::build_pdf;

    fn run(text: &str, x: f32, y: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            y,
            font_size: 8.0,
            width: text.chars().count() as f32 * 4.0,
        }
    }

    #[test]
    fn test_group_runs() {
        let rows = group_runs(vec![
            run("180,00", 130.0, 688.0),
            run("VALOR", 130.0, 700.0),
            run("DO ICMS", 152.0, 700.5),
            run("BASE", 10.0, 700.0),
        ]);
        assert_eq!(rows.len(), 2);
        let texts: Vec<&str> = rows[0].iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["BASE", "VALOR DO ICMS"]);
        assert_eq!(rows[1][0].text, "180,00");
    }

    #[test]
    fn test_layout_pairs_values_with_columns() {
        let bytes = build_pdf(
            &[
                (40.0, 800.0, 8.0, "NUMERO 000.004.321"),
                (40.0, 780.0, 8.0, "CNPJ"),
                (40.0, 770.0, 8.0, "11.222.333/0001-81"),
                (40.0, 700.0, 6.0, "VALOR DO ICMS"),
                (200.0, 700.0, 6.0, "VALOR TOTAL DA NOTA"),
                (40.0, 690.0, 8.0, "90,00"),
                (200.0, 690.0, 8.0, "500,00"),
            ],
            false,
        );
        let document = RawDocument::new("layout.pdf", bytes);
        let StrategyOutcome::Success(candidates) = LayoutStrategy::new().extract(&document) else {
            panic!("layout strategy skipped");
        };

        let value = |field: FieldName| {
            candidates
                .iter()
                .filter(|c| c.field == field)
                .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
                .map(|c| c.value.clone())
        };
        assert_eq!(value(FieldName::IcmsValue).as_deref(), Some("90,00"));
        assert_eq!(value(FieldName::TotalValue).as_deref(), Some("500,00"));
        assert_eq!(value(FieldName::IssuerTaxId).as_deref(), Some("11.222.333/0001-81"));
        assert!(candidates.iter().all(|c| c.strategy == StrategyKind::Layout));
    }
}
