//! Batch analysis: financial metrics, CFOP impact simulation and narrative.

mod impact;
pub mod narrative;
pub mod rules;

pub use impact::{
    analyze, financial_metrics, issuer_breakdown, AlertKind, CodeAssessment, FinancialMetrics, FiscalAlert,
    ImpactResult, IssuerSummary, RecordAssessment, Severity, UndueTax,
};
pub use narrative::{analyzer_for, OfflineAnalyzer, TextAnalyzer};
pub use rules::{CfopRuleTable, CodeClass, CodePattern, StatusExpectation};
