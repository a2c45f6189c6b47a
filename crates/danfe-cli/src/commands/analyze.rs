//! Analyze command - financial metrics and CFOP impact for a batch.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::{info, warn};

use danfe_core::analysis::{analyze, analyzer_for, ImpactResult, Severity};
use danfe_core::invoice::rules::money::format_brl_amount;
use danfe_core::models::{InvoiceRecord, Regime, RegistrationStatus};
use danfe_core::pipeline::DocumentFailure;
use danfe_core::registry::{suggest_declaration, EnrichmentReport};

use super::batch::{enrich_outcome, extract_batch};
use super::{collect_pdfs, load_config};

/// Arguments for the analyze command.
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Input PDFs or glob patterns
    #[arg(required_unless_present = "records")]
    inputs: Vec<String>,

    /// Analyze records saved by `batch` instead of extracting PDFs
    #[arg(long, conflicts_with = "inputs")]
    records: Option<PathBuf>,

    /// Declared tax regime of the recipient (simples, presumido, real)
    #[arg(long)]
    regime: Option<Regime>,

    /// Declared state registration status (active, exempt, inactive)
    #[arg(long)]
    status: Option<RegistrationStatus>,

    /// Look up issuer (and recipient) profiles before analyzing
    #[arg(long)]
    enrich: bool,

    /// Append a narrative from the configured text analyzer
    #[arg(long)]
    narrative: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: ReportFormat,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ReportFormat {
    /// JSON output
    Json,
    /// Plain text report
    Text,
}

#[derive(Serialize)]
struct AnalysisReport {
    impact: ImpactResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<DocumentFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enrichment: Option<EnrichmentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    narrative: Option<String>,
}

pub async fn run(args: AnalyzeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    // Fail on a bad rate or rule table before doing any work
    config.analysis.validate()?;

    let (mut outcome, from_pdfs) = match &args.records {
        Some(path) => {
            let records: Vec<InvoiceRecord> = serde_json::from_str(&fs::read_to_string(path)?)?;
            info!("Loaded {} records from {}", records.len(), path.display());
            let outcome = danfe_core::pipeline::BatchOutcome {
                records,
                ..Default::default()
            };
            (outcome, false)
        }
        None => {
            let files = collect_pdfs(&args.inputs)?;
            (extract_batch(files, &config).await?, true)
        }
    };

    let enrichment = if args.enrich {
        config.registry.enrich_recipients = true;
        Some(enrich_outcome(&mut outcome, &config).await?)
    } else {
        None
    };

    let (regime, status) = declaration(&args, &outcome.records)?;
    let impact = analyze(&outcome.records, regime, status, &config.analysis)?;

    let narrative = if args.narrative {
        match analyzer_for(&config.narrative) {
            Ok(analyzer) => match analyzer.narrate(&impact).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("{} narrative failed: {}", analyzer.name(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Narrative skipped: {}", e);
                None
            }
        }
    } else {
        None
    };

    let report = AnalysisReport {
        impact,
        failures: outcome.failures,
        enrichment,
        narrative,
    };

    let output = match args.format {
        ReportFormat::Json => serde_json::to_string_pretty(&report)?,
        ReportFormat::Text => format_report(&report, from_pdfs),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Report written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }
    Ok(())
}

/// Declared regime and status from the flags, falling back to the registry
/// profile of the most frequent recipient.
fn declaration(args: &AnalyzeArgs, records: &[InvoiceRecord]) -> anyhow::Result<(Regime, RegistrationStatus)> {
    if let (Some(regime), Some(status)) = (args.regime, args.status) {
        return Ok((regime, status));
    }

    let mut counts: HashMap<&str, (usize, &danfe_core::FiscalProfile)> = HashMap::new();
    for profile in records.iter().filter_map(|r| r.recipient_profile.as_ref()) {
        counts.entry(profile.tax_id.as_str()).or_insert((0, profile)).0 += 1;
    }
    let Some((_, (_, profile))) = counts
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then_with(|| b.0.cmp(a.0)))
    else {
        anyhow::bail!("Declare --regime and --status, or use --enrich to suggest them from the recipient");
    };

    let (suggested_regime, suggested_status) = suggest_declaration(profile);
    let declared = (
        args.regime.unwrap_or(suggested_regime),
        args.status.unwrap_or(suggested_status),
    );
    eprintln!(
        "{} Using declaration from recipient {}: {} / {}",
        style("ℹ").blue(),
        profile.tax_id,
        declared.0,
        declared.1
    );
    Ok(declared)
}

fn format_report(report: &AnalysisReport, from_pdfs: bool) -> String {
    let impact = &report.impact;
    let m = &impact.metrics;
    let mut out = String::new();

    out.push_str(&format!(
        "Declared regime: {}\nRegistration status: {}\n\n",
        impact.declared_regime, impact.declared_status
    ));

    out.push_str("Financial summary\n");
    out.push_str(&format!("  Invoices:            {:>16}\n", m.record_count));
    out.push_str(&format!("  Total:               {:>16}\n", format_brl_amount(m.total)));
    if let (Some(mean), Some(max), Some(min)) = (m.mean, m.max, m.min) {
        out.push_str(&format!("  Mean:                {:>16}\n", format_brl_amount(mean)));
        out.push_str(&format!("  Largest:             {:>16}\n", format_brl_amount(max)));
        out.push_str(&format!("  Smallest:            {:>16}\n", format_brl_amount(min)));
    }
    out.push_str(&format!(
        "  Top {} concentration: {:>15.1}%\n\n",
        m.top_n,
        m.top_issuers_share * rust_decimal::Decimal::ONE_HUNDRED
    ));

    out.push_str("Suppliers\n");
    for (i, issuer) in impact.issuers.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {} - {} in {} invoices ({})\n",
            i + 1,
            issuer.label,
            format_brl_amount(issuer.total),
            issuer.count,
            issuer.regime
        ));
    }
    out.push('\n');

    out.push_str("CFOP impact\n");
    out.push_str(&format!(
        "  At-risk invoices:    {:>16}\n  At-risk total:       {:>16}\n",
        impact.at_risk_count,
        format_brl_amount(impact.at_risk_total)
    ));
    out.push_str(&format!("  Undue ICMS:          {:>16}\n", format_brl_amount(impact.undue.icms)));
    out.push_str(&format!("  Undue PIS:           {:>16}\n", format_brl_amount(impact.undue.pis)));
    out.push_str(&format!("  Undue COFINS:        {:>16}\n", format_brl_amount(impact.undue.cofins)));
    out.push_str(&format!("  Total undue:         {:>16}\n", format_brl_amount(impact.total_undue)));
    out.push_str(&format!(
        "  What-if final value: {:>16}\n",
        format_brl_amount(impact.what_if_final_value)
    ));
    out.push_str(&format!(
        "  At-risk final value: {:>16}\n",
        format_brl_amount(impact.at_risk_final_value)
    ));
    out.push_str(&format!(
        "  Unclassifiable CFOP: {:>16}\n  Unknown regime:      {:>16}\n\n",
        impact.unclassifiable_count, impact.unclassifiable_regime_count
    ));

    out.push_str(&format!("Alerts ({})\n", impact.alerts.len()));
    for alert in &impact.alerts {
        let tag = match alert.severity {
            Severity::Critical => style("CRITICAL").red().to_string(),
            Severity::Medium => style("MEDIUM").yellow().to_string(),
            Severity::Info => style("INFO").blue().to_string(),
        };
        out.push_str(&format!(
            "  [{}] {} {}: {}\n",
            tag,
            alert.document_number.as_deref().unwrap_or(&alert.source),
            alert.issuer,
            alert.message
        ));
    }

    if let Some(enrichment) = &report.enrichment {
        out.push_str(&format!(
            "\nRegistry: {} tax IDs, {} cached, {} calls, {} failed\n",
            enrichment.distinct_ids,
            enrichment.cache_hits,
            enrichment.external_calls,
            enrichment.failures.len()
        ));
    }

    if from_pdfs && !report.failures.is_empty() {
        out.push_str(&format!("\nFailed files ({})\n", report.failures.len()));
        for failure in &report.failures {
            out.push_str(&format!("  - {}: {}\n", failure.source, failure.reason));
        }
    }

    if let Some(narrative) = &report.narrative {
        out.push_str("\nNarrative\n");
        out.push_str(narrative);
        if !narrative.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
