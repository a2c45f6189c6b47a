//! Subcommands and the helpers they share.

pub mod analyze;
pub mod batch;
pub mod config;
pub mod extract;

use std::path::PathBuf;

use glob::glob;

use danfe_core::models::config::DanfeConfig;
use danfe_core::models::InvoiceRecord;

/// Output format for records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

/// User config location, `<config dir>/danfe/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("danfe")
        .join("config.json")
}

/// The file `--config` points at, or the default location.
pub fn config_file(config_path: Option<&str>) -> PathBuf {
    config_path.map(PathBuf::from).unwrap_or_else(default_config_path)
}

/// Config from `--config`, the default file if present, or defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<DanfeConfig> {
    let path = config_file(config_path);
    if config_path.is_some() || path.exists() {
        DanfeConfig::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))
    } else {
        Ok(DanfeConfig::default())
    }
}

/// Expand file names and glob patterns into PDF paths, sorted and deduplicated.
pub fn collect_pdfs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        for path in glob(input)?.filter_map(|r| r.ok()) {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext.eq_ignore_ascii_case("pdf") && path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        anyhow::bail!("No matching files found for: {}", inputs.join(" "));
    }
    Ok(files)
}

fn field<T: ToString>(value: Option<&T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Records as CSV, one row per record.
pub fn format_records_csv(records: &[InvoiceRecord]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "source",
        "document_number",
        "series",
        "issue_date",
        "issuer_tax_id",
        "issuer_name",
        "recipient_tax_id",
        "recipient_name",
        "cfop",
        "total_value",
        "icms",
        "pis",
        "cofins",
        "issuer_regime",
        "issuer_lookup_failed",
    ])?;

    for record in records {
        let profile = record.issuer_profile.as_ref();
        wtr.write_record([
            record.source.clone(),
            field(record.document_number.value()),
            field(record.series.value()),
            field(record.issue_date.value()),
            record.issuer_tax_id.value().map(|id| id.formatted()).unwrap_or_default(),
            field(record.issuer_name.value()),
            record.recipient_tax_id.value().map(|id| id.formatted()).unwrap_or_default(),
            field(record.recipient_name.value()),
            field(record.cfop.value()),
            field(record.total_value.value()),
            field(record.taxes.icms.value()),
            field(record.taxes.pis.value()),
            field(record.taxes.cofins.value()),
            profile.map(|p| p.regime.label().to_string()).unwrap_or_default(),
            profile.map(|p| p.lookup_failed.to_string()).unwrap_or_default(),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

/// Human-readable record summary.
pub fn format_record_text(record: &InvoiceRecord) -> String {
    use danfe_core::invoice::rules::money::format_brl_amount;

    let show = |label: &str, value: Option<String>, output: &mut String| {
        output.push_str(&format!("  {:<14}{}\n", label, value.unwrap_or_else(|| "-".to_string())));
    };

    let mut output = String::new();
    output.push_str(&format!("Invoice: {}\n", record.source));
    show("Number:", record.document_number.value().cloned(), &mut output);
    show("Series:", record.series.value().cloned(), &mut output);
    show("Issued:", record.issue_date.value().map(|d| d.format("%d/%m/%Y").to_string()), &mut output);
    show("CFOP:", record.cfop.value().map(|c| c.to_string()), &mut output);
    output.push('\n');

    output.push_str("Issuer:\n");
    show("Name:", record.issuer_name.value().cloned(), &mut output);
    show("Tax ID:", record.issuer_tax_id.value().map(|id| id.formatted()), &mut output);
    if let Some(profile) = &record.issuer_profile {
        show("Regime:", Some(profile.regime.label().to_string()), &mut output);
    }
    output.push('\n');

    output.push_str("Recipient:\n");
    show("Name:", record.recipient_name.value().cloned(), &mut output);
    show("Tax ID:", record.recipient_tax_id.value().map(|id| id.formatted()), &mut output);
    output.push('\n');

    output.push_str("Values:\n");
    show("Total:", record.total_value.value().map(|v| format_brl_amount(*v)), &mut output);
    show("ICMS:", record.taxes.icms.value().map(|v| format_brl_amount(*v)), &mut output);
    show("PIS:", record.taxes.pis.value().map(|v| format_brl_amount(*v)), &mut output);
    show("COFINS:", record.taxes.cofins.value().map(|v| format_brl_amount(*v)), &mut output);

    output
}
