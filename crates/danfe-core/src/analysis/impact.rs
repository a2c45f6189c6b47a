//! Financial metrics and CFOP impact simulation over a batch of records.
//!
//! [`analyze`] is a pure function of its inputs: the same records, declared
//! regime/status and configuration always produce the same [`ImpactResult`].

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::rules::CodeClass;
use crate::error::ConfigError;
use crate::invoice::rules::cfop::Cfop;
use crate::invoice::rules::money::format_brl_amount;
use crate::models::config::{ImpactConfig, TaxRates};
use crate::models::{InvoiceRecord, Regime, RegistrationStatus};

/// Aggregate statistics of record total values.
///
/// Records without a total value are counted in `record_count` but excluded
/// from every other figure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub record_count: usize,
    pub valued_count: usize,
    pub total: Decimal,
    pub mean: Option<Decimal>,
    pub max: Option<Decimal>,
    pub min: Option<Decimal>,
    pub top_n: usize,
    /// Share of the grand total held by the top-N issuers, in [0, 1].
    pub top_issuers_share: Decimal,
}

/// Totals of one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSummary {
    pub key: String,
    pub label: String,
    pub total: Decimal,
    pub count: usize,
    pub mean: Decimal,
    pub regime: Regime,
    pub simples: bool,
    /// False for the single row gathering records with no issuer tax ID or name.
    pub identified: bool,
}

/// How a record's CFOP relates to the declared registration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeAssessment {
    /// The code class is the one the status calls for, or the status calls for none.
    Consistent,
    /// Taxed code while the status calls for an exempt one. Undue tax applies.
    AtRisk,
    /// Any other mismatch; reported, never costed.
    Unexpected,
    /// Missing or unknown code. Excluded from the risk computation.
    Unclassifiable,
}

/// Undue tax amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndueTax {
    pub icms: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
}

impl UndueTax {
    pub fn on(value: Decimal, rates: &TaxRates) -> Self {
        Self {
            icms: rates.icms * value,
            pis: rates.pis * value,
            cofins: rates.cofins * value,
        }
    }

    pub fn total(&self) -> Decimal {
        self.icms + self.pis + self.cofins
    }
}

/// Per-record result of the CFOP check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAssessment {
    pub source: String,
    pub document_number: Option<String>,
    pub issuer: String,
    pub cfop: Option<Cfop>,
    pub class: Option<CodeClass>,
    pub assessment: CodeAssessment,
    pub total_value: Option<Decimal>,
    /// Present for at-risk records.
    pub undue: Option<UndueTax>,
    /// The issuer's regime is not known (no profile, or lookup failed).
    pub unclassifiable_regime: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Medium,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Exempt recipient billed with a taxed code.
    TaxedCodeForExemptRecipient,
    /// Supplier's state registration is not active.
    InactiveRegistration,
    /// Supplier under Simples Nacional: no PIS/COFINS credit for the recipient.
    SimplesWithoutCredit,
    /// Supplier's regime could not be determined.
    UnknownRegime,
}

/// A fiscal alert about one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub source: String,
    pub document_number: Option<String>,
    pub issuer: String,
    pub value: Option<Decimal>,
    pub message: String,
}

/// Outcome of one analysis run.
///
/// `what_if_final_value` is the authoritative final value: the whole batch
/// total plus all undue tax. `at_risk_final_value` restricts the same sum to
/// the at-risk records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub declared_regime: Regime,
    pub declared_status: RegistrationStatus,
    pub rates: TaxRates,
    pub metrics: FinancialMetrics,
    pub issuers: Vec<IssuerSummary>,
    pub assessments: Vec<RecordAssessment>,
    pub at_risk_count: usize,
    pub at_risk_total: Decimal,
    pub undue: UndueTax,
    pub total_undue: Decimal,
    /// Batch total outside the at-risk records.
    pub unaffected_total: Decimal,
    pub what_if_final_value: Decimal,
    pub at_risk_final_value: Decimal,
    pub unclassifiable_count: usize,
    pub unclassifiable_regime_count: usize,
    pub alerts: Vec<FiscalAlert>,
}

impl ImpactResult {
    pub fn at_risk(&self) -> impl Iterator<Item = &RecordAssessment> {
        self.assessments
            .iter()
            .filter(|a| a.assessment == CodeAssessment::AtRisk)
    }
}

/// Compute metrics, CFOP assessments, undue tax and alerts for a batch.
///
/// Fails only when the configuration is unusable.
pub fn analyze(
    records: &[InvoiceRecord],
    declared_regime: Regime,
    declared_status: RegistrationStatus,
    config: &ImpactConfig,
) -> Result<ImpactResult, ConfigError> {
    let rates = config.validate()?;
    let expected = config.rules.expected(declared_status);

    let metrics = financial_metrics(records, config.top_n_issuers);
    let issuers = issuer_breakdown(records);

    let mut assessments = Vec::with_capacity(records.len());
    let mut alerts = Vec::new();
    let mut at_risk_total = Decimal::ZERO;

    for record in records {
        let cfop = record.cfop.value().copied();
        let class = cfop.as_ref().and_then(|c| config.rules.classify(c));
        let assessment = match (class, expected) {
            (None, _) => CodeAssessment::Unclassifiable,
            (Some(CodeClass::Taxed), Some(CodeClass::Exempt)) => CodeAssessment::AtRisk,
            (Some(actual), Some(wanted)) if actual != wanted => CodeAssessment::Unexpected,
            _ => CodeAssessment::Consistent,
        };

        let total_value = record.total_value.value().copied();
        let undue = if assessment == CodeAssessment::AtRisk {
            let value = total_value.unwrap_or(Decimal::ZERO);
            at_risk_total += value;
            Some(UndueTax::on(value, &rates))
        } else {
            None
        };

        let regime = record.issuer_profile.as_ref().map(|p| p.regime).unwrap_or_default();
        let assessed = RecordAssessment {
            source: record.source.clone(),
            document_number: record.document_number.value().cloned(),
            issuer: record.issuer_label(),
            cfop,
            class,
            assessment,
            total_value,
            undue,
            unclassifiable_regime: regime == Regime::Unknown,
        };
        alerts.extend(record_alerts(record, &assessed, declared_regime));
        assessments.push(assessed);
    }

    // Aggregate from the at-risk sum so undue = rate x sum holds exactly
    let undue = UndueTax::on(at_risk_total, &rates);
    let total_undue = undue.total();
    let at_risk_count = assessments
        .iter()
        .filter(|a| a.assessment == CodeAssessment::AtRisk)
        .count();
    let unclassifiable_count = assessments
        .iter()
        .filter(|a| a.assessment == CodeAssessment::Unclassifiable)
        .count();
    let unclassifiable_regime_count = assessments.iter().filter(|a| a.unclassifiable_regime).count();

    info!(
        "Analyzed {} records: {} at risk, {} unclassifiable, undue {}",
        records.len(),
        at_risk_count,
        unclassifiable_count,
        total_undue
    );

    Ok(ImpactResult {
        declared_regime,
        declared_status,
        rates,
        unaffected_total: metrics.total - at_risk_total,
        what_if_final_value: metrics.total + total_undue,
        at_risk_final_value: at_risk_total + total_undue,
        metrics,
        issuers,
        assessments,
        at_risk_count,
        at_risk_total,
        undue,
        total_undue,
        unclassifiable_count,
        unclassifiable_regime_count,
        alerts,
    })
}

/// Sum, mean, extremes and top-N issuer concentration of total values.
pub fn financial_metrics(records: &[InvoiceRecord], top_n: usize) -> FinancialMetrics {
    let values: Vec<Decimal> = records.iter().filter_map(|r| r.total_value.value().copied()).collect();
    let total: Decimal = values.iter().copied().sum();

    let mean = if values.is_empty() {
        None
    } else {
        Some((total / Decimal::from(values.len())).round_dp(2))
    };

    // Unidentified issuers are not one supplier and never rank
    let mut by_issuer: Vec<Decimal> = issuer_breakdown(records)
        .into_iter()
        .filter(|i| i.identified)
        .map(|i| i.total)
        .collect();
    by_issuer.sort_by(|a, b| b.cmp(a));
    let top: Decimal = by_issuer.iter().take(top_n).copied().sum();
    let top_issuers_share = if total.is_zero() {
        Decimal::ZERO
    } else {
        (top / total).round_dp(4)
    };

    FinancialMetrics {
        record_count: records.len(),
        valued_count: values.len(),
        total,
        mean,
        max: values.iter().max().copied(),
        min: values.iter().min().copied(),
        top_n,
        top_issuers_share,
    }
}

/// Totals per issuer, largest first, ties by key. Records without an
/// identifiable issuer share one trailing "unidentified" row.
pub fn issuer_breakdown(records: &[InvoiceRecord]) -> Vec<IssuerSummary> {
    let mut groups: BTreeMap<Option<String>, IssuerSummary> = BTreeMap::new();
    for record in records {
        let key = record.issuer_key();
        let identified = key.is_some();
        let value = record.total_value.value().copied().unwrap_or(Decimal::ZERO);
        let regime = record.issuer_profile.as_ref().map(|p| p.regime).unwrap_or_default();

        let entry = groups.entry(key.clone()).or_insert_with(|| IssuerSummary {
            key: key.unwrap_or_default(),
            label: record.issuer_label(),
            total: Decimal::ZERO,
            count: 0,
            mean: Decimal::ZERO,
            regime,
            simples: regime == Regime::SimplesNacional,
            identified,
        });
        entry.total += value;
        entry.count += 1;
        if entry.regime == Regime::Unknown && regime != Regime::Unknown {
            entry.regime = regime;
            entry.simples = regime == Regime::SimplesNacional;
        }
    }

    let mut issuers: Vec<IssuerSummary> = groups
        .into_values()
        .map(|mut s| {
            s.mean = (s.total / Decimal::from(s.count)).round_dp(2);
            s
        })
        .collect();
    issuers.sort_by(|a, b| {
        b.identified
            .cmp(&a.identified)
            .then_with(|| b.total.cmp(&a.total))
            .then_with(|| a.key.cmp(&b.key))
    });
    debug!("{} issuers", issuers.len());
    issuers
}

fn record_alerts(record: &InvoiceRecord, assessed: &RecordAssessment, declared_regime: Regime) -> Vec<FiscalAlert> {
    let alert = |kind, severity, message: String| FiscalAlert {
        kind,
        severity,
        source: assessed.source.clone(),
        document_number: assessed.document_number.clone(),
        issuer: assessed.issuer.clone(),
        value: assessed.total_value,
        message,
    };

    let mut alerts = Vec::new();
    if let (CodeAssessment::AtRisk, Some(cfop), Some(undue)) = (assessed.assessment, assessed.cfop, assessed.undue) {
        alerts.push(alert(
            AlertKind::TaxedCodeForExemptRecipient,
            Severity::Critical,
            format!(
                "Taxed CFOP {} billed to an exempt registration; expected an exempt code such as 5.949. Undue tax {}",
                cfop,
                format_brl_amount(undue.total())
            ),
        ));
    }

    let Some(profile) = record.issuer_profile.as_ref() else {
        return alerts;
    };
    if profile.is_resolved() && !profile.registration_active && !profile.registration_exempt {
        alerts.push(alert(
            AlertKind::InactiveRegistration,
            Severity::Medium,
            "Supplier state registration is not active".to_string(),
        ));
    }
    if profile.regime == Regime::SimplesNacional && declared_regime != Regime::SimplesNacional {
        alerts.push(alert(
            AlertKind::SimplesWithoutCredit,
            Severity::Info,
            "Supplier under Simples Nacional: no PIS/COFINS credit available".to_string(),
        ));
    }
    if profile.regime == Regime::Unknown {
        alerts.push(alert(
            AlertKind::UnknownRegime,
            Severity::Medium,
            "Supplier tax regime not identified; validate manually".to_string(),
        ));
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, FiscalProfile, TaxId};
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn record(n: usize, issuer: &str, cfop: Option<&str>, total: &str) -> InvoiceRecord {
        let mut record = InvoiceRecord::new(format!("nf-{:03}.pdf", n));
        record.document_number = FieldValue::Present(n.to_string());
        record.issuer_tax_id = FieldValue::Present(TaxId::parse(issuer).unwrap());
        record.total_value = FieldValue::Present(dec(total));
        record.cfop = match cfop {
            Some(code) => FieldValue::Present(Cfop::parse(code).unwrap()),
            None => FieldValue::Absent,
        };
        record
    }

    fn profile(tax_id: &str, regime: Regime, active: bool) -> FiscalProfile {
        FiscalProfile {
            tax_id: tax_id.to_string(),
            name: Some(format!("SUPPLIER {}", &tax_id[..4])),
            regime,
            registration_active: active,
            registration_exempt: false,
            source: Some("brasilapi".to_string()),
            lookup_failed: false,
        }
    }

    /// 50 records worth 1.5M, 30 of them taxed (1M) under an exempt registration.
    fn scenario() -> Vec<InvoiceRecord> {
        let mut records = Vec::new();
        for n in 0..10 {
            records.push(record(n, "11222333000181", Some("5102"), "40000.00"));
        }
        for n in 10..30 {
            records.push(record(n, "06990590000123", Some("6.102"), "30000.00"));
        }
        for n in 30..50 {
            records.push(record(n, "12345678000195", Some("5949"), "25000.00"));
        }
        records
    }

    #[test]
    fn test_end_to_end_scenario() {
        let result = analyze(
            &scenario(),
            Regime::LucroPresumido,
            RegistrationStatus::Exempt,
            &ImpactConfig::default(),
        )
        .unwrap();

        assert_eq!(result.metrics.total, dec("1500000"));
        assert_eq!(result.at_risk_count, 30);
        assert_eq!(result.at_risk_total, dec("1000000"));
        assert_eq!(result.undue.icms, dec("180000"));
        assert_eq!(result.undue.pis, dec("16500"));
        assert_eq!(result.undue.cofins, dec("76500"));
        assert_eq!(result.total_undue, dec("273000"));
        assert_eq!(result.what_if_final_value, dec("1773000"));
        assert_eq!(result.at_risk_final_value, dec("1273000"));
        assert_eq!(result.unaffected_total, dec("500000"));
        assert_eq!(result.unclassifiable_count, 0);
    }

    #[test]
    fn test_unclassifiable_codes_excluded() {
        let mut records = scenario();
        records.push(record(50, "45678901000175", None, "70000.00"));
        records.push(record(51, "45678901000175", Some("5905"), "10000.00"));

        let result = analyze(&records, Regime::LucroReal, RegistrationStatus::Exempt, &ImpactConfig::default()).unwrap();

        assert_eq!(result.unclassifiable_count, 2);
        assert_eq!(result.at_risk_total, dec("1000000"));
        assert_eq!(result.undue.icms, dec("0.18") * result.at_risk_total);
        assert_eq!(result.metrics.total, dec("1580000"));
    }

    #[test]
    fn test_active_status_has_no_undue_tax() {
        let result = analyze(&scenario(), Regime::LucroReal, RegistrationStatus::Active, &ImpactConfig::default()).unwrap();
        assert_eq!(result.at_risk_count, 0);
        assert_eq!(result.total_undue, Decimal::ZERO);
        assert_eq!(result.what_if_final_value, result.metrics.total);
        // 5949 under an active registration is a mismatch, but not costed
        let unexpected = result
            .assessments
            .iter()
            .filter(|a| a.assessment == CodeAssessment::Unexpected)
            .count();
        assert_eq!(unexpected, 20);
    }

    #[test]
    fn test_metrics_and_concentration() {
        let records = vec![
            record(1, "11222333000181", Some("5102"), "100.00"),
            record(2, "11222333000181", Some("5102"), "300.00"),
            record(3, "06990590000123", Some("5102"), "200.00"),
            record(4, "12345678000195", Some("5102"), "150.00"),
            record(5, "98765432000198", Some("5102"), "250.00"),
        ];
        let metrics = financial_metrics(&records, 2);
        assert_eq!(metrics.total, dec("1000.00"));
        assert_eq!(metrics.mean, Some(dec("200.00")));
        assert_eq!(metrics.max, Some(dec("300.00")));
        assert_eq!(metrics.min, Some(dec("100.00")));
        // 400 + 250 out of 1000
        assert_eq!(metrics.top_issuers_share, dec("0.65"));

        let issuers = issuer_breakdown(&records);
        assert_eq!(issuers[0].key, "11222333000181");
        assert_eq!(issuers[0].count, 2);
        assert_eq!(issuers[0].mean, dec("200.00"));
    }

    #[test]
    fn test_unidentified_issuers_do_not_rank() {
        let mut records: Vec<InvoiceRecord> = (0..10)
            .map(|n| {
                let mut record = InvoiceRecord::new(format!("anon-{}.pdf", n));
                record.document_number = FieldValue::Present(n.to_string());
                record.recipient_tax_id = FieldValue::Present(TaxId::parse("06990590000123").unwrap());
                record.total_value = FieldValue::Present(dec("100.00"));
                record
            })
            .collect();

        let metrics = financial_metrics(&records, 3);
        assert_eq!(metrics.total, dec("1000.00"));
        assert_eq!(metrics.top_issuers_share, Decimal::ZERO);

        records.push(record(10, "11222333000181", Some("5102"), "50.00"));
        let issuers = issuer_breakdown(&records);
        assert_eq!(issuers.len(), 2);
        assert!(issuers[0].identified);
        assert_eq!(issuers[0].key, "11222333000181");
        assert!(!issuers[1].identified);
        assert_eq!(issuers[1].label, "(unidentified issuer)");
        assert_eq!(issuers[1].count, 10);
        assert_eq!(issuers[1].total, dec("1000.00"));

        // 50 out of 1050
        assert_eq!(financial_metrics(&records, 3).top_issuers_share, dec("0.0476"));
    }

    #[test]
    fn test_empty_batch() {
        let result = analyze(&[], Regime::Unknown, RegistrationStatus::Active, &ImpactConfig::default()).unwrap();
        assert_eq!(result.metrics.mean, None);
        assert_eq!(result.metrics.top_issuers_share, Decimal::ZERO);
        assert!(result.issuers.is_empty());
    }

    #[test]
    fn test_missing_rate_aborts() {
        let config = ImpactConfig {
            pis_rate: None,
            ..Default::default()
        };
        let err = analyze(&scenario(), Regime::LucroReal, RegistrationStatus::Exempt, &config).unwrap_err();
        assert_eq!(err, ConfigError::MissingRate("pis_rate"));
    }

    #[test]
    fn test_failed_lookup_is_unclassifiable_regime_not_dropped() {
        let mut records = scenario();
        records[0].issuer_profile = Some(FiscalProfile::unknown("11222333000181", true));
        records[10].issuer_profile = Some(profile("06990590000123", Regime::SimplesNacional, true));

        let result = analyze(&records, Regime::LucroReal, RegistrationStatus::Exempt, &ImpactConfig::default()).unwrap();

        assert_eq!(result.assessments.len(), 50);
        assert!(result.assessments[0].unclassifiable_regime);
        assert!(!result.assessments[10].unclassifiable_regime);
        // records without any profile count as well
        assert_eq!(result.unclassifiable_regime_count, 49);
    }

    #[test]
    fn test_alerts() {
        let mut records = vec![
            record(1, "11222333000181", Some("5102"), "1000.00"),
            record(2, "06990590000123", Some("5949"), "500.00"),
        ];
        records[0].issuer_profile = Some(profile("11222333000181", Regime::SimplesNacional, false));
        records[1].issuer_profile = Some(FiscalProfile::unknown("06990590000123", true));

        let result = analyze(&records, Regime::LucroReal, RegistrationStatus::Exempt, &ImpactConfig::default()).unwrap();
        let kinds: Vec<AlertKind> = result.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::TaxedCodeForExemptRecipient,
                AlertKind::InactiveRegistration,
                AlertKind::SimplesWithoutCredit,
                AlertKind::UnknownRegime,
            ]
        );
        assert_eq!(result.alerts[0].severity, Severity::Critical);
        assert!(result.alerts[0].message.contains("5.102"));
        assert!(result.alerts[0].message.contains("R$ 273,00"));
    }

    #[test]
    fn test_deterministic() {
        let config = ImpactConfig::default();
        let a = analyze(&scenario(), Regime::LucroReal, RegistrationStatus::Exempt, &config).unwrap();
        let b = analyze(&scenario(), Regime::LucroReal, RegistrationStatus::Exempt, &config).unwrap();
        assert_eq!(a, b);
    }
}
