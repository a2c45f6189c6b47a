//! Candidate merging and typed coercion.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::rules::cfop::Cfop;
use super::rules::{dates, money, tax_id};
use super::ExtractionCandidate;
use crate::error::ExtractionError;
use crate::models::config::ExtractionConfig;
use crate::models::{FieldName, FieldValue, InvoiceRecord, Provenance, TaxId};

/// Turns a document's candidates into one [`InvoiceRecord`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    min_confidence: f32,
    validate_checksum: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl Normalizer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            min_confidence: config.min_field_confidence,
            validate_checksum: config.validate_tax_id_checksum,
        }
    }

    pub fn with_min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = min;
        self
    }

    pub fn with_checksum_validation(mut self, enabled: bool) -> Self {
        self.validate_checksum = enabled;
        self
    }

    /// Highest-confidence candidate per field.
    ///
    /// Ties go to the earlier strategy in the chain, then to the candidate
    /// produced first. Candidates under the minimum confidence never win.
    pub fn select<'a>(&self, candidates: &'a [ExtractionCandidate]) -> BTreeMap<FieldName, &'a ExtractionCandidate> {
        let mut winners: BTreeMap<FieldName, &ExtractionCandidate> = BTreeMap::new();
        for candidate in candidates.iter().filter(|c| c.confidence >= self.min_confidence) {
            let replace = match winners.get(&candidate.field) {
                None => true,
                Some(current) => {
                    candidate.confidence > current.confidence
                        || (candidate.confidence == current.confidence && candidate.strategy < current.strategy)
                }
            };
            if replace {
                winners.insert(candidate.field, candidate);
            }
        }
        winners
    }

    /// Build a record, or reject it when it lacks a document number or any tax ID.
    pub fn normalize(&self, source: &str, candidates: &[ExtractionCandidate]) -> Result<InvoiceRecord, ExtractionError> {
        if candidates.is_empty() {
            return Err(ExtractionError::NoData(source.to_string()));
        }

        let winners = self.select(candidates);
        let mut record = InvoiceRecord::new(source);

        for (field, winner) in &winners {
            let raw = winner.value.as_str();
            match field {
                FieldName::DocumentNumber => record.document_number = coerce(raw, document_number),
                FieldName::Series => record.series = coerce(raw, series),
                FieldName::IssuerTaxId => record.issuer_tax_id = self.tax_id(raw),
                FieldName::IssuerName => record.issuer_name = coerce(raw, name),
                FieldName::RecipientTaxId => record.recipient_tax_id = self.tax_id(raw),
                FieldName::RecipientName => record.recipient_name = coerce(raw, name),
                FieldName::TotalValue => record.total_value = coerce(raw, amount),
                FieldName::IcmsValue => record.taxes.icms = coerce(raw, amount),
                FieldName::PisValue => record.taxes.pis = coerce(raw, amount),
                FieldName::CofinsValue => record.taxes.cofins = coerce(raw, amount),
                FieldName::IssueDate => record.issue_date = coerce(raw, dates::parse_plausible_date),
                FieldName::Cfop => record.cfop = coerce(raw, Cfop::parse),
            }
            record.provenance.insert(
                *field,
                Provenance {
                    strategy: winner.strategy,
                    confidence: winner.confidence,
                },
            );
        }

        for field in FieldName::ALL {
            if invalid(&record, field) {
                let error = ExtractionError::Validation {
                    field: field.to_string(),
                    reason: format!("could not read {:?}", winners[&field].value),
                };
                warn!("{}: {}", source, error);
            }
        }

        let mut missing = Vec::new();
        if !record.document_number.is_present() {
            missing.push(FieldName::DocumentNumber.to_string());
        }
        if !record.issuer_tax_id.is_present() && !record.recipient_tax_id.is_present() {
            missing.push("tax_id".to_string());
        }
        if !missing.is_empty() {
            debug!("{}: rejected, missing {:?}", source, missing);
            return Err(ExtractionError::NotViable { missing });
        }

        Ok(record)
    }

    fn tax_id(&self, raw: &str) -> FieldValue<TaxId> {
        match TaxId::parse(raw) {
            Some(id) if !self.validate_checksum || tax_id::validate_tax_id(id.digits()) => FieldValue::Present(id),
            _ => FieldValue::Invalid(raw.to_string()),
        }
    }
}

fn coerce<T>(raw: &str, parse: impl Fn(&str) -> Option<T>) -> FieldValue<T> {
    match parse(raw) {
        Some(value) => FieldValue::Present(value),
        None => FieldValue::Invalid(raw.to_string()),
    }
}

fn invalid(record: &InvoiceRecord, field: FieldName) -> bool {
    match field {
        FieldName::DocumentNumber => record.document_number.is_invalid(),
        FieldName::Series => record.series.is_invalid(),
        FieldName::IssuerTaxId => record.issuer_tax_id.is_invalid(),
        FieldName::IssuerName => record.issuer_name.is_invalid(),
        FieldName::RecipientTaxId => record.recipient_tax_id.is_invalid(),
        FieldName::RecipientName => record.recipient_name.is_invalid(),
        FieldName::TotalValue => record.total_value.is_invalid(),
        FieldName::IcmsValue => record.taxes.icms.is_invalid(),
        FieldName::PisValue => record.taxes.pis.is_invalid(),
        FieldName::CofinsValue => record.taxes.cofins.is_invalid(),
        FieldName::IssueDate => record.issue_date.is_invalid(),
        FieldName::Cfop => record.cfop.is_invalid(),
    }
}

/// Document number without grouping dots or leading zeros.
fn document_number(raw: &str) -> Option<String> {
    let n = u64::from_str(&tax_id::only_digits(raw)).ok()?;
    (1..=999_999_999).contains(&n).then(|| n.to_string())
}

fn series(raw: &str) -> Option<String> {
    let n = u16::from_str(raw.trim()).ok()?;
    (n <= 999).then(|| n.to_string())
}

fn name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c == ':' || c.is_whitespace());
    (trimmed.chars().filter(|c| c.is_alphabetic()).count() >= 3).then(|| trimmed.to_string())
}

/// Non-negative amount with exactly two decimal places.
fn amount(raw: &str) -> Option<Decimal> {
    let value = money::parse_brl_amount(raw)?;
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    let mut value = value.round_dp(2);
    value.rescale(2);
    Some(value)
}
