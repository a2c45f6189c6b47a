use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use danfe_core::invoice::rules::cfop::Cfop;
use danfe_core::models::{FieldValue, FiscalProfile, InvoiceRecord, Regime, TaxId};

fn danfe() -> Command {
    Command::cargo_bin("danfe").unwrap()
}

fn record(n: usize, cfop: &str, total: &str) -> InvoiceRecord {
    let mut record = InvoiceRecord::new(format!("nf-{}.pdf", n));
    record.document_number = FieldValue::Present(n.to_string());
    record.issuer_tax_id = FieldValue::Present(TaxId::parse("11.222.333/0001-81").unwrap());
    record.issuer_name = FieldValue::Present("ACME LTDA".to_string());
    record.cfop = FieldValue::Present(Cfop::parse(cfop).unwrap());
    record.total_value = FieldValue::Present(total.parse().unwrap());
    record
}

/// One taxed invoice of R$ 1.000,00 and one exempt-operation invoice.
fn write_records(dir: &Path) -> String {
    let records = vec![record(1, "5102", "1000.00"), record(2, "5949", "500.00")];
    let path = dir.join("records.json");
    fs::write(&path, serde_json::to_string_pretty(&records).unwrap()).unwrap();
    path.display().to_string()
}

#[test]
fn test_help() {
    danfe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("analyze"));
}

#[test]
fn test_config_init_get_set() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");
    let config_arg = config.display().to_string();

    danfe()
        .args(["--config", &config_arg, "config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    danfe()
        .args(["--config", &config_arg, "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    danfe()
        .args(["--config", &config_arg, "config", "set", "analysis.top_n_issuers", "5"])
        .assert()
        .success();

    danfe()
        .args(["--config", &config_arg, "config", "get", "analysis.top_n_issuers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));

    danfe()
        .args(["--config", &config_arg, "config", "set", "analysis.no_such_key", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_rejects_out_of_range_rate() {
    let dir = TempDir::new().unwrap();
    let config_arg = dir.path().join("config.json").display().to_string();

    danfe()
        .args(["--config", &config_arg, "config", "set", "analysis.icms_rate", "1.5"])
        .assert()
        .failure();
}

#[test]
fn test_config_rejects_negative_freshness() {
    let dir = TempDir::new().unwrap();
    let config_arg = dir.path().join("config.json").display().to_string();

    danfe()
        .args(["--config", &config_arg, "config", "set", "registry.freshness_hours", "-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("registry.freshness_hours"));
}

#[test]
fn test_analyze_records_json() {
    let dir = TempDir::new().unwrap();
    let records = write_records(dir.path());

    let output = danfe()
        .args(["analyze", "--records", &records, "--regime", "presumido", "--status", "exempt", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["impact"]["at_risk_count"], 1);
    assert!(report["impact"]["what_if_final_value"].is_string());
}

#[test]
fn test_analyze_records_text() {
    let dir = TempDir::new().unwrap();
    let records = write_records(dir.path());

    danfe()
        .args(["analyze", "--records", &records, "--regime", "real", "--status", "exempt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("R$ 273,00"))
        .stdout(predicate::str::contains("R$ 1.773,00"))
        .stdout(predicate::str::contains("R$ 1.273,00"));
}

#[test]
fn test_analyze_suggested_declaration_keeps_json_stdout() {
    let dir = TempDir::new().unwrap();
    let recipient = FiscalProfile {
        tax_id: "06990590000123".to_string(),
        name: Some("BUYER SA".to_string()),
        regime: Regime::LucroReal,
        registration_active: true,
        registration_exempt: true,
        source: Some("brasilapi".to_string()),
        lookup_failed: false,
    };
    let records: Vec<InvoiceRecord> = [record(1, "5102", "1000.00"), record(2, "5949", "500.00")]
        .into_iter()
        .map(|mut r| {
            r.recipient_tax_id = FieldValue::Present(TaxId::parse("06990590000123").unwrap());
            r.recipient_profile = Some(recipient.clone());
            r
        })
        .collect();
    let path = dir.path().join("records.json");
    fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let output = danfe()
        .args(["analyze", "--records", &path.display().to_string(), "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Using declaration"));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["impact"]["declared_regime"], "lucro_real");
    assert_eq!(report["impact"]["declared_status"], "exempt");
}

#[test]
fn test_analyze_requires_declaration() {
    let dir = TempDir::new().unwrap();
    let records = write_records(dir.path());

    danfe()
        .args(["analyze", "--records", &records])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--regime"));
}

#[test]
fn test_analyze_missing_rate() {
    let dir = TempDir::new().unwrap();
    let records = write_records(dir.path());
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{ "analysis": { "icms_rate": null } }"#).unwrap();

    danfe()
        .args(["--config", &config.display().to_string()])
        .args(["analyze", "--records", &records, "--regime", "real", "--status", "exempt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required rate"));
}

#[test]
fn test_extract_rejects_non_pdf() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("notes.pdf");
    fs::write(&input, "this is not a pdf").unwrap();

    danfe()
        .args(["extract", "--text-only", &input.display().to_string()])
        .assert()
        .failure();
}

#[test]
fn test_extract_missing_file() {
    danfe()
        .args(["extract", "/nonexistent/invoice.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_batch_no_matches() {
    let dir = TempDir::new().unwrap();
    let pattern = dir.path().join("*.pdf").display().to_string();

    danfe()
        .args(["batch", &pattern])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No matching files"));
}
