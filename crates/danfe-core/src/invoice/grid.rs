//! Line/cell view of a document that the rule table runs against.

use std::ops::Range;

use tracing::trace;

use super::rules::patterns::{ISSUER_SECTION, RECIPIENT_SECTION, SECTION_END};
use super::rules::{money, ExtractionMatch, FieldRule, Locator, Pick, Scope};
use crate::models::FieldName;

/// A run of text with its horizontal extent.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub text: String,
    pub x0: f32,
    pub x1: f32,
}

impl Cell {
    /// A cell spanning the whole line.
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            x0: 0.0,
            x1: f32::INFINITY,
        }
    }

    pub fn overlaps(&self, other: &Cell) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1
    }
}

/// Rows of cells in reading order.
///
/// Text-layer output becomes one cell per line. Layout and OCR output keep
/// real x positions (`positional`), which lets a label find the value
/// printed beneath it.
#[derive(Debug, Clone, Default)]
pub struct TextGrid {
    rows: Vec<Vec<Cell>>,
    positional: bool,
}

impl TextGrid {
    /// One cell per non-empty line.
    pub fn from_text(text: &str) -> Self {
        let rows = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| vec![Cell::line(l)])
            .collect();
        Self { rows, positional: false }
    }

    /// Positioned cells; empty rows are dropped and cells sorted by x.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.retain(|c| !c.text.trim().is_empty());
                row.sort_by(|a, b| a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal));
                row
            })
            .filter(|row| !row.is_empty())
            .collect();
        Self { rows, positional: true }
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// A row's cells joined into one line.
    pub fn line(&self, row: usize) -> String {
        self.rows
            .get(row)
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| c.text.trim())
                    .collect::<Vec<_>>()
                    .join("  ")
            })
            .unwrap_or_default()
    }

    /// The whole grid as plain text, one row per line.
    pub fn text(&self) -> String {
        (0..self.rows.len())
            .map(|i| self.line(i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn cells_below(&self, row: usize, anchor: &Cell, depth: usize) -> Vec<(usize, &Cell)> {
        let mut out = Vec::new();
        for r in (row + 1)..self.rows.len().min(row + 1 + depth) {
            for cell in &self.rows[r] {
                if cell.overlaps(anchor) {
                    out.push((r, cell));
                }
            }
        }
        out
    }

    /// Run every rule and collect one hit per rule that found a value.
    pub fn apply_rules(&self, rules: &[FieldRule]) -> Vec<(FieldName, ExtractionMatch<String>)> {
        let sections = Sections::locate(self);
        rules
            .iter()
            .filter_map(|rule| {
                let range = sections.range(rule.scope, self.rows.len());
                let hit = match rule.locator {
                    Locator::Scan { nth } => self.scan(rule, range, nth),
                    Locator::Immediate(label) => self.anchored(rule, range, label, 0),
                    Locator::Following(label, depth) => self.anchored(rule, range, label, depth),
                };
                if let Some(ref m) = hit {
                    trace!("rule {:?} -> {:?} ({})", rule.field, m.value, m.source);
                }
                hit.map(|m| (rule.field, m))
            })
            .collect()
    }

    fn scan(&self, rule: &FieldRule, range: Range<usize>, nth: usize) -> Option<ExtractionMatch<String>> {
        let mut seen: Vec<String> = Vec::new();
        for r in range {
            for cell in &self.rows[r] {
                for caps in rule.value.captures_iter(&cell.text) {
                    let Some(value) = rule.value_text(&caps) else { continue };
                    if !(rule.validator)(value) || seen.iter().any(|s| s == value) {
                        continue;
                    }
                    if seen.len() == nth {
                        return Some(
                            ExtractionMatch::new(value.to_string(), rule.weight, self.line(r))
                                .with_position(r),
                        );
                    }
                    seen.push(value.to_string());
                }
            }
        }
        None
    }

    fn anchored(
        &self,
        rule: &FieldRule,
        range: Range<usize>,
        label: &regex::Regex,
        depth: usize,
    ) -> Option<ExtractionMatch<String>> {
        let immediate = matches!(rule.locator, Locator::Immediate(_));

        for r in range {
            for (ci, cell) in self.rows[r].iter().enumerate() {
                for m in label.find_iter(&cell.text) {
                    // Places to look, in order of proximity to the label
                    let mut places: Vec<(usize, &str)> = vec![(r, &cell.text[m.end()..])];

                    if immediate {
                        if self.positional {
                            if let Some((br, below)) = self.cells_below(r, cell, 2).into_iter().next() {
                                places.push((br, below.text.as_str()));
                            }
                        }
                    } else {
                        if self.positional {
                            if let Some(right) = self.rows[r].get(ci + 1) {
                                places.push((r, right.text.as_str()));
                            }
                        }
                        for (br, below) in self.cells_below(r, cell, depth) {
                            places.push((br, below.text.as_str()));
                        }
                    }

                    for (row, text) in places {
                        if let Some(value) = pick_value(rule, text) {
                            return Some(
                                ExtractionMatch::new(value, rule.weight, self.line(row))
                                    .with_position(row),
                            );
                        }
                    }
                }
            }
        }
        None
    }
}

fn pick_value(rule: &FieldRule, text: &str) -> Option<String> {
    let mut valid = rule
        .value
        .captures_iter(text)
        .filter_map(|caps| rule.value_text(&caps).map(str::to_string))
        .filter(|v| (rule.validator)(v.as_str()));

    match rule.pick {
        Pick::First => valid.next(),
        Pick::LastNonZero => valid
            .filter(|v| money::parse_brl_amount(v).is_some_and(|a| !a.is_zero()))
            .last(),
    }
}

/// Row ranges of the DANFE blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sections {
    pub issuer: Range<usize>,
    pub recipient: Option<Range<usize>>,
}

impl Sections {
    /// Issuer block runs from the top (or its own heading) to the recipient
    /// heading; the recipient block ends at the next DANFE section.
    pub fn locate(grid: &TextGrid) -> Self {
        let len = grid.rows.len();
        let lines: Vec<String> = (0..len).map(|i| grid.line(i)).collect();

        let recipient_start = lines.iter().position(|l| RECIPIENT_SECTION.is_match(l));
        let issuer_end = recipient_start.unwrap_or(len);
        let issuer_heading = lines[..issuer_end]
            .iter()
            .position(|l| ISSUER_SECTION.is_match(l));
        // Names sit above the heading on many layouts, so only skip the
        // canhoto strip when the heading is near the top.
        let issuer_start = match issuer_heading {
            Some(h) if h <= 3 => h,
            _ => 0,
        };

        let recipient = recipient_start.map(|start| {
            let end = lines[start + 1..]
                .iter()
                .position(|l| SECTION_END.is_match(l))
                .map(|p| start + 1 + p)
                .unwrap_or(len);
            start..end
        });

        Self {
            issuer: issuer_start..issuer_end,
            recipient,
        }
    }

    fn range(&self, scope: Scope, len: usize) -> Range<usize> {
        match scope {
            Scope::Document => 0..len,
            Scope::Issuer => self.issuer.clone(),
            Scope::Recipient => self.recipient.clone().unwrap_or(0..0),
            Scope::Top(n) => 0..n.min(len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::rules::FIELD_RULES;
    use pretty_assertions::assert_eq;

    const DANFE_TEXT: &str = "\
RECEBEMOS DE ACME DISTRIBUIDORA LTDA OS PRODUTOS CONSTANTES DA NOTA FISCAL
ACME DISTRIBUIDORA LTDA
DANFE
DOCUMENTO AUXILIAR DA NOTA FISCAL ELETRÔNICA
Nº 000.012.345
SÉRIE 1
CHAVE DE ACESSO 3524 0311 2223 3300 0181 5500 1000 0123 4510 0001 2345
NATUREZA DA OPERAÇÃO VENDA DE MERCADORIA
INSCRIÇÃO ESTADUAL CNPJ
123.456.789.110 11.222.333/0001-81
DESTINATÁRIO/REMETENTE
NOME/RAZÃO SOCIAL CNPJ/CPF DATA DA EMISSÃO
COMERCIAL BETA LTDA 98.765.432/0001-98 10/03/2024
RUA DAS FLORES, 100 CENTRO 01001-000 12/03/2024
CÁLCULO DO IMPOSTO
BASE DE CÁLCULO DO ICMS VALOR DO ICMS VALOR TOTAL DOS PRODUTOS VALOR TOTAL DA NOTA
1.000,00 180,00 1.000,00 0,00 1.000,00
DADOS DOS PRODUTOS
001 PRODUTO X 84713012 000 CFOP 5102 UN 1,00
";

    fn hits(grid: &TextGrid) -> Vec<(FieldName, String, f32)> {
        grid.apply_rules(&FIELD_RULES)
            .into_iter()
            .map(|(f, m)| (f, m.value, m.confidence))
            .collect()
    }

    fn first(hits: &[(FieldName, String, f32)], field: FieldName) -> Option<(String, f32)> {
        hits.iter()
            .filter(|h| h.0 == field)
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap())
            .map(|h| (h.1.clone(), h.2))
    }

    #[test]
    fn test_sections() {
        let grid = TextGrid::from_text(DANFE_TEXT);
        let sections = Sections::locate(&grid);
        assert_eq!(sections.issuer, 0..10);
        assert_eq!(sections.recipient, Some(10..14));
    }

    #[test]
    fn test_text_rules() {
        let grid = TextGrid::from_text(DANFE_TEXT);
        let hits = hits(&grid);

        assert_eq!(first(&hits, FieldName::DocumentNumber).unwrap().0, "000.012.345");
        assert_eq!(first(&hits, FieldName::Series).unwrap().0, "1");
        assert_eq!(
            first(&hits, FieldName::IssuerTaxId).unwrap(),
            ("11.222.333/0001-81".to_string(), 1.0)
        );
        assert_eq!(first(&hits, FieldName::IssuerName).unwrap().0, "ACME DISTRIBUIDORA LTDA");
        assert_eq!(
            first(&hits, FieldName::RecipientTaxId).unwrap(),
            ("98.765.432/0001-98".to_string(), 1.0)
        );
        assert_eq!(first(&hits, FieldName::RecipientName).unwrap().0, "COMERCIAL BETA LTDA");
        assert_eq!(first(&hits, FieldName::IssueDate).unwrap(), ("10/03/2024".to_string(), 1.0));
        assert_eq!(first(&hits, FieldName::TotalValue).unwrap(), ("1.000,00".to_string(), 1.0));
        assert_eq!(first(&hits, FieldName::Cfop).unwrap().0, "5102");
        // Column-aligned tax values cannot be attributed from plain text
        assert!(first(&hits, FieldName::IcmsValue).is_none());
    }

    #[test]
    fn test_scan_takes_nth_distinct_value() {
        let grid = TextGrid::from_text("A 11.222.333/0001-81\nB 11.222.333/0001-81\nC 98.765.432/0001-98");
        let hits = hits(&grid);
        let recipient: Vec<_> = hits.iter().filter(|h| h.0 == FieldName::RecipientTaxId).collect();
        assert_eq!(recipient.len(), 1);
        assert_eq!(recipient[0].1, "98.765.432/0001-98");
        assert_eq!(recipient[0].2, 0.7);
    }

    #[test]
    fn test_positional_value_beneath_label() {
        let cell = |text: &str, x0: f32, x1: f32| Cell { text: text.to_string(), x0, x1 };
        let grid = TextGrid::from_rows(vec![
            vec![
                cell("BASE DE CÁLCULO DO ICMS", 10.0, 120.0),
                cell("VALOR DO ICMS", 130.0, 200.0),
                cell("VALOR TOTAL DA NOTA", 400.0, 490.0),
            ],
            vec![
                cell("1.000,00", 10.0, 50.0),
                cell("180,00", 130.0, 160.0),
                cell("1.180,00", 400.0, 440.0),
            ],
        ]);
        let hits = hits(&grid);
        assert_eq!(first(&hits, FieldName::IcmsValue).unwrap().0, "180,00");
        assert_eq!(first(&hits, FieldName::TotalValue).unwrap().0, "1.180,00");
    }

    #[test]
    fn test_last_non_zero_looks_ahead() {
        let grid = TextGrid::from_text("VALOR TOTAL DA NOTA\n0,00 0,00\nTRANSPORTE\n2.500,00 0,00");
        let hits = hits(&grid);
        assert_eq!(first(&hits, FieldName::TotalValue).unwrap().0, "2.500,00");
    }
}
