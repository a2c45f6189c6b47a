//! Declarative field rules for DANFE documents.
//!
//! Every field is described by one or more [`FieldRule`]s: where to look
//! (scope), how the value relates to its label (locator), what the value
//! looks like (pattern) and how to check it (validator). Strategies feed
//! their text into the same table, so recognition logic lives here and
//! nowhere else.

pub mod cfop;
pub mod dates;
pub mod money;
pub mod patterns;
pub mod tax_id;

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::FieldName;
use patterns::*;

/// Extraction context with confidence scores.
#[derive(Debug, Clone)]
pub struct ExtractionMatch<T> {
    /// Extracted value.
    pub value: T,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f32,
    /// Row of the grid the value was read from.
    pub position: Option<usize>,
    /// Source text that was matched.
    pub source: String,
}

impl<T> ExtractionMatch<T> {
    pub fn new(value: T, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence,
            position: None,
            source: source.into(),
        }
    }

    pub fn with_position(mut self, row: usize) -> Self {
        self.position = Some(row);
        self
    }
}

/// Part of the document a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Document,
    /// From the top of the page to the recipient block.
    Issuer,
    /// The recipient block, up to the next DANFE section.
    Recipient,
    /// The first `n` lines.
    Top(usize),
}

/// How a value is found relative to its label.
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    /// Value starts right after the label. In positional grids, also the
    /// cell directly beneath the label.
    Immediate(&'static Regex),
    /// Value after the label on the same line, in the next cell to the
    /// right, or up to `n` lines below.
    Following(&'static Regex, usize),
    /// No label: every line in scope is scanned and the `nth` distinct
    /// valid value is taken.
    Scan { nth: usize },
}

/// Which value to take when a line holds several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    First,
    /// Last amount that is not `0,00` (DANFE totals close their row).
    LastNonZero,
}

/// One row of the rule table.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: FieldName,
    pub scope: Scope,
    pub locator: Locator,
    pub value: &'static Regex,
    pub validator: fn(&str) -> bool,
    pub pick: Pick,
    /// Multiplied into the strategy confidence.
    pub weight: f32,
}

impl FieldRule {
    fn new(field: FieldName, locator: Locator, value: &'static Regex, validator: fn(&str) -> bool) -> Self {
        Self {
            field,
            scope: Scope::Document,
            locator,
            value,
            validator,
            pick: Pick::First,
            weight: 1.0,
        }
    }

    fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }

    fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Text of the value inside a regex match (group 1 when present).
    pub fn value_text<'t>(&self, caps: &regex::Captures<'t>) -> Option<&'t str> {
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().trim())
    }
}

/// Document numbers run from 1 to 999.999.999.
pub fn valid_document_number(s: &str) -> bool {
    let digits = tax_id::only_digits(s);
    matches!(digits.parse::<u64>(), Ok(n) if (1..=999_999_999).contains(&n))
}

pub fn valid_series(s: &str) -> bool {
    !s.is_empty() && s.len() <= 3 && s.chars().all(|c| c.is_ascii_digit())
}

/// Length check only; check digits are the normalizer's concern.
pub fn valid_tax_id_format(s: &str) -> bool {
    matches!(tax_id::only_digits(s).len(), 11 | 14)
}

pub fn valid_money(s: &str) -> bool {
    money::parse_brl_amount(s).is_some()
}

pub fn valid_date(s: &str) -> bool {
    dates::parse_plausible_date(s).is_some()
}

pub fn valid_cfop(s: &str) -> bool {
    cfop::Cfop::parse(s).is_some()
}

fn build_rules() -> Vec<FieldRule> {
    use FieldName::*;
    use Locator::*;

    vec![
        FieldRule::new(DocumentNumber, Immediate(&NUMBER_LABEL), &NUMBER_VALUE, valid_document_number),
        FieldRule::new(Series, Immediate(&SERIES_LABEL), &SERIES_VALUE, valid_series),
        // Issuer: labeled ID in the top block, else the first masked ID anywhere
        FieldRule::new(IssuerTaxId, Following(&TAX_ID_LABEL, 1), &TAX_ID_ANY, valid_tax_id_format)
            .scope(Scope::Issuer),
        FieldRule::new(IssuerTaxId, Scan { nth: 0 }, &TAX_ID_MASKED, valid_tax_id_format).weight(0.7),
        FieldRule::new(IssuerName, Following(&ISSUER_SECTION, 3), &NAME_LINE, is_plausible_name)
            .scope(Scope::Issuer),
        FieldRule::new(IssuerName, Scan { nth: 0 }, &NAME_LINE, is_plausible_name)
            .scope(Scope::Top(12))
            .weight(0.75),
        // Recipient: labeled ID in the recipient block, else the second masked ID
        FieldRule::new(RecipientTaxId, Following(&TAX_ID_LABEL, 2), &TAX_ID_ANY, valid_tax_id_format)
            .scope(Scope::Recipient),
        FieldRule::new(RecipientTaxId, Scan { nth: 1 }, &TAX_ID_MASKED, valid_tax_id_format).weight(0.7),
        FieldRule::new(RecipientName, Following(&NAME_LABEL, 2), &NAME_VALUE, is_plausible_name)
            .scope(Scope::Recipient),
        FieldRule::new(RecipientName, Scan { nth: 0 }, &NAME_VALUE, is_plausible_name)
            .scope(Scope::Recipient)
            .weight(0.7),
        FieldRule::new(TotalValue, Following(&TOTAL_INVOICE, 6), &MONEY, valid_money)
            .pick(Pick::LastNonZero),
        FieldRule::new(TotalValue, Following(&TOTAL_PRODUCTS, 6), &MONEY, valid_money)
            .pick(Pick::LastNonZero)
            .weight(0.6),
        FieldRule::new(IcmsValue, Immediate(&ICMS_LABEL), &MONEY_LEADING, valid_money),
        FieldRule::new(PisValue, Immediate(&PIS_LABEL), &MONEY_LEADING, valid_money),
        FieldRule::new(CofinsValue, Immediate(&COFINS_LABEL), &MONEY_LEADING, valid_money),
        FieldRule::new(IssueDate, Following(&ISSUE_DATE_LABEL, 2), &DATE_ANY, valid_date),
        FieldRule::new(IssueDate, Scan { nth: 0 }, &DATE_ANY, valid_date).weight(0.6),
        FieldRule::new(Cfop, Following(&CFOP_LABEL, 3), &CFOP_VALUE, valid_cfop),
    ]
}

lazy_static! {
    /// The DANFE rule table shared by every strategy.
    pub static ref FIELD_RULES: Vec<FieldRule> = build_rules();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_has_a_rule() {
        for field in FieldName::ALL {
            assert!(
                FIELD_RULES.iter().any(|r| r.field == field),
                "no rule for {}",
                field
            );
        }
    }

    #[test]
    fn test_validators() {
        assert!(valid_document_number("000.001.234"));
        assert!(!valid_document_number("0"));
        assert!(valid_series("1"));
        assert!(!valid_series("1234"));
        assert!(valid_tax_id_format("11.222.333/0001-81"));
        assert!(!valid_tax_id_format("1122"));
        assert!(valid_cfop("5.102"));
        assert!(!valid_date("01/01/1990"));
    }

    #[test]
    fn test_weights_are_fractions() {
        assert!(FIELD_RULES.iter().all(|r| r.weight > 0.0 && r.weight <= 1.0));
    }
}
