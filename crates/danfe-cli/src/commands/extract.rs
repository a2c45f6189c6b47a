//! Extract command - read one invoice file into a record.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info};

use danfe_core::invoice::RawDocument;
use danfe_core::pipeline::BatchExtractor;

use super::{format_record_text, format_records_csv, load_config, OutputFormat};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input PDF
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Skip OCR and use only the text layer and layout strategies
    #[arg(long)]
    text_only: bool,

    /// Show which strategies ran and what they found
    #[arg(long)]
    diagnostics: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;
    if args.text_only {
        config.ocr.enabled = false;
    }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    info!("Processing file: {}", args.input.display());

    let bytes = fs::read(&args.input)?;
    let document = RawDocument::new(args.input.display().to_string(), bytes).with_pdf_config(config.pdf.clone());
    let extractor = BatchExtractor::from_config(&config);
    let extraction = tokio::task::spawn_blocking(move || extractor.extract_one(&document)).await?;
    let diagnostics = extraction.diagnostics;

    if args.diagnostics {
        eprintln!(
            "{} PDF type: {}",
            style("ℹ").blue(),
            diagnostics
                .pdf_type
                .map(|t| format!("{:?}", t).to_lowercase())
                .unwrap_or_else(|| "unreadable".to_string())
        );
        for report in &diagnostics.reports {
            match &report.skipped {
                Some(reason) => eprintln!("  {} {}: skipped ({})", style("-").yellow(), report.strategy, reason),
                None => eprintln!(
                    "  {} {}: {} candidates, {} fields, {}ms",
                    style("✓").green(),
                    report.strategy,
                    report.candidates,
                    report.fields,
                    report.elapsed_ms
                ),
            }
        }
    }

    let record = extraction.record.map_err(|e| anyhow::anyhow!("{}: {}", args.input.display(), e))?;

    if args.diagnostics {
        for (field, provenance) in &record.provenance {
            eprintln!(
                "  {:<18} {} ({:.0}%)",
                field.to_string(),
                provenance.strategy,
                provenance.confidence * 100.0
            );
        }
    }

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&record)?,
        OutputFormat::Csv => format_records_csv(std::slice::from_ref(&record))?,
        OutputFormat::Text => format_record_text(&record),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total processing time: {:?}", start.elapsed());
    Ok(())
}
