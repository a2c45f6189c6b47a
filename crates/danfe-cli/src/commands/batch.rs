//! Batch processing command for multiple invoice files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use danfe_core::models::config::DanfeConfig;
use danfe_core::pipeline::{load_documents, BatchExtractor, BatchOutcome};
use danfe_core::registry::{EnrichmentReport, Enricher};

use super::{collect_pdfs, format_records_csv, load_config, OutputFormat};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Format of the records file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a per-file summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of parallel workers (0 = available CPUs)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Skip OCR
    #[arg(long)]
    text_only: bool,

    /// Look up issuer profiles in the taxpayer registry
    #[arg(long)]
    enrich: bool,

    /// Exit with an error if any file fails
    #[arg(long)]
    strict: bool,
}

/// Extract all documents on worker threads, with a progress bar.
pub async fn extract_batch(paths: Vec<PathBuf>, config: &DanfeConfig) -> anyhow::Result<BatchOutcome> {
    let (documents, read_failures) = load_documents(&paths, &config.pdf);

    let multi_progress = MultiProgress::new();
    let overall_pb = multi_progress.add(ProgressBar::new(paths.len() as u64));
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );
    overall_pb.inc(read_failures.len() as u64);

    let extractor = BatchExtractor::from_config(config);
    let pb = overall_pb.clone();
    let mut outcome = tokio::task::spawn_blocking(move || {
        extractor.run_with_progress(documents, |source| {
            debug!("finished {}", source);
            pb.inc(1);
        })
    })
    .await?;
    overall_pb.finish_with_message("Complete");

    outcome.failures.extend(read_failures);
    Ok(outcome)
}

/// Attach registry profiles to the records of a batch.
pub async fn enrich_outcome(outcome: &mut BatchOutcome, config: &DanfeConfig) -> anyhow::Result<EnrichmentReport> {
    let enricher = Enricher::from_config(&config.registry)?;
    let records = std::mem::take(&mut outcome.records);
    let (records, report) = enricher.enrich_batch(records).await;
    outcome.records = records;

    for failure in &report.failures {
        warn!("Registry lookup failed for {}: {}", failure.tax_id, failure.attempts.join("; "));
    }
    Ok(report)
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.extraction.workers = jobs;
    }
    if args.text_only {
        config.ocr.enabled = false;
    }

    let files = collect_pdfs(&args.inputs)?;
    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let mut outcome = extract_batch(files, &config).await?;

    let enrichment = if args.enrich {
        Some(enrich_outcome(&mut outcome, &config).await?)
    } else {
        None
    };

    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let records_path = match args.format {
        OutputFormat::Csv => {
            let path = output_dir.join("records.csv");
            fs::write(&path, format_records_csv(&outcome.records)?)?;
            path
        }
        OutputFormat::Json | OutputFormat::Text => {
            let path = output_dir.join("records.json");
            fs::write(&path, serde_json::to_string_pretty(&outcome.records)?)?;
            path
        }
    };
    println!(
        "{} Records written to {}",
        style("✓").green(),
        records_path.display()
    );

    if args.summary {
        let summary_path = output_dir.join("summary.csv");
        write_summary(&summary_path, &outcome)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        outcome.processed() + outcome.duplicates.len(),
        start.elapsed()
    );
    println!(
        "   {} records, {} failed, {} duplicates",
        style(outcome.records.len()).green(),
        style(outcome.failures.len()).red(),
        style(outcome.duplicates.len()).yellow()
    );
    if let Some(report) = &enrichment {
        println!(
            "   {} tax IDs: {} from cache, {} registry calls, {} lookups failed",
            report.distinct_ids,
            report.cache_hits,
            report.external_calls,
            report.failures.len()
        );
    }

    if !outcome.failures.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for failure in &outcome.failures {
            println!("  - {}: {}", failure.source, failure.reason);
        }
    }
    if !outcome.duplicates.is_empty() {
        println!();
        println!("{}", style("Duplicates skipped:").yellow());
        for duplicate in &outcome.duplicates {
            println!("  - {} (same as {})", duplicate.source, duplicate.duplicate_of);
        }
    }

    if args.strict && !outcome.failures.is_empty() {
        anyhow::bail!("{} files failed", outcome.failures.len());
    }
    Ok(())
}

fn write_summary(path: &Path, outcome: &BatchOutcome) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "source",
        "status",
        "document_number",
        "issue_date",
        "issuer_tax_id",
        "total_value",
        "strategies",
        "error",
    ])?;

    for record in &outcome.records {
        let strategies = outcome
            .diagnostics
            .iter()
            .find(|d| d.source == record.source)
            .map(|d| {
                d.reports
                    .iter()
                    .filter(|r| r.skipped.is_none())
                    .map(|r| r.strategy.to_string())
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .unwrap_or_default();

        wtr.write_record([
            record.source.as_str(),
            "success",
            record.document_number.value().map(String::as_str).unwrap_or(""),
            &record.issue_date.value().map(|d| d.to_string()).unwrap_or_default(),
            &record.issuer_tax_id.value().map(|id| id.formatted()).unwrap_or_default(),
            &record.total_value.value().map(|v| v.to_string()).unwrap_or_default(),
            &strategies,
            "",
        ])?;
    }

    for failure in &outcome.failures {
        wtr.write_record([failure.source.as_str(), "error", "", "", "", "", "", failure.reason.as_str()])?;
    }
    for duplicate in &outcome.duplicates {
        wtr.write_record([
            duplicate.source.as_str(),
            "duplicate",
            "",
            "",
            "",
            "",
            "",
            duplicate.duplicate_of.as_str(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
