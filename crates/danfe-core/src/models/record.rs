//! Canonical invoice record produced by the normalizer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::profile::FiscalProfile;
use crate::invoice::rules::cfop::Cfop;
use crate::invoice::rules::tax_id::{format_cnpj, format_cpf};

/// Fields recognized on a DANFE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    DocumentNumber,
    Series,
    IssuerTaxId,
    IssuerName,
    RecipientTaxId,
    RecipientName,
    TotalValue,
    IcmsValue,
    PisValue,
    CofinsValue,
    IssueDate,
    Cfop,
}

impl FieldName {
    /// All fields, in record order.
    pub const ALL: [FieldName; 12] = [
        FieldName::DocumentNumber,
        FieldName::Series,
        FieldName::IssuerTaxId,
        FieldName::IssuerName,
        FieldName::RecipientTaxId,
        FieldName::RecipientName,
        FieldName::TotalValue,
        FieldName::IcmsValue,
        FieldName::PisValue,
        FieldName::CofinsValue,
        FieldName::IssueDate,
        FieldName::Cfop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::DocumentNumber => "document_number",
            FieldName::Series => "series",
            FieldName::IssuerTaxId => "issuer_tax_id",
            FieldName::IssuerName => "issuer_name",
            FieldName::RecipientTaxId => "recipient_tax_id",
            FieldName::RecipientName => "recipient_name",
            FieldName::TotalValue => "total_value",
            FieldName::IcmsValue => "icms_value",
            FieldName::PisValue => "pis_value",
            FieldName::CofinsValue => "cofins_value",
            FieldName::IssueDate => "issue_date",
            FieldName::Cfop => "cfop",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a normalized field.
///
/// `Absent` means no candidate reached the minimum confidence; it is never
/// conflated with zero or an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    Present(T),
    /// The winning candidate failed validation; holds the raw text.
    Invalid(String),
    Absent,
}

impl<T> Default for FieldValue<T> {
    fn default() -> Self {
        FieldValue::Absent
    }
}

impl<T> FieldValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldValue::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, FieldValue::Invalid(_))
    }
}

/// Kind of Brazilian tax ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxIdKind {
    /// Company (14 digits).
    Cnpj,
    /// Natural person (11 digits).
    Cpf,
}

/// A tax ID stored as bare digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    /// Strip formatting and check the length. Check digits are not verified here.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            11 | 14 => Some(Self(digits)),
            _ => None,
        }
    }

    pub fn kind(&self) -> TaxIdKind {
        if self.0.len() == 14 {
            TaxIdKind::Cnpj
        } else {
            TaxIdKind::Cpf
        }
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Masked form, e.g. `11.222.333/0001-81`.
    pub fn formatted(&self) -> String {
        match self.kind() {
            TaxIdKind::Cnpj => format_cnpj(&self.0),
            TaxIdKind::Cpf => format_cpf(&self.0),
        }
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl TryFrom<String> for TaxId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxId::parse(&value).ok_or_else(|| format!("not a CNPJ or CPF: {}", value))
    }
}

impl From<TaxId> for String {
    fn from(id: TaxId) -> Self {
        id.0
    }
}

/// Tax amounts printed in the DANFE tax block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAmounts {
    pub icms: FieldValue<Decimal>,
    pub pis: FieldValue<Decimal>,
    pub cofins: FieldValue<Decimal>,
}

/// Where a field value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: crate::invoice::StrategyKind,
    pub confidence: f32,
}

/// Canonical invoice record.
///
/// Monetary fields are non-negative with two decimal places. Profiles are
/// filled in by the registry enricher; the analyzer only reads the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Source identifier of the document (usually the file name).
    pub source: String,
    pub document_number: FieldValue<String>,
    pub series: FieldValue<String>,
    pub issuer_tax_id: FieldValue<TaxId>,
    pub issuer_name: FieldValue<String>,
    pub recipient_tax_id: FieldValue<TaxId>,
    pub recipient_name: FieldValue<String>,
    pub total_value: FieldValue<Decimal>,
    pub taxes: TaxAmounts,
    pub issue_date: FieldValue<NaiveDate>,
    pub cfop: FieldValue<Cfop>,
    /// Winning strategy and confidence per resolved field.
    #[serde(default)]
    pub provenance: BTreeMap<FieldName, Provenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_profile: Option<FiscalProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_profile: Option<FiscalProfile>,
}

impl InvoiceRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Issuer label for grouping and reports: official name, printed name, or tax ID.
    pub fn issuer_label(&self) -> String {
        if let Some(name) = self.issuer_profile.as_ref().and_then(|p| p.name.clone()) {
            return name;
        }
        if let Some(name) = self.issuer_name.value() {
            return name.clone();
        }
        if let Some(id) = self.issuer_tax_id.value() {
            return id.formatted();
        }
        "(unidentified issuer)".to_string()
    }

    /// Grouping key for per-issuer aggregation; None when the issuer has
    /// neither a tax ID nor a name.
    pub fn issuer_key(&self) -> Option<String> {
        match (self.issuer_tax_id.value(), self.issuer_name.value()) {
            (Some(id), _) => Some(id.digits().to_string()),
            (None, Some(name)) => Some(name.to_uppercase()),
            (None, None) => None,
        }
    }
}
