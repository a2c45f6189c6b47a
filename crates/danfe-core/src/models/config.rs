//! Configuration structures for the extraction, enrichment and analysis pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analysis::rules::CfopRuleTable;
use crate::error::ConfigError;

/// Main configuration for the danfe pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DanfeConfig {
    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// Field extraction configuration.
    pub extraction: ExtractionConfig,

    /// OCR configuration.
    pub ocr: OcrConfig,

    /// Registry lookup configuration.
    pub registry: RegistryConfig,

    /// Impact analysis configuration.
    pub analysis: ImpactConfig,

    /// Narrative (text analyzer) configuration.
    pub narrative: NarrativeConfig,
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Minimum text length to consider PDF as text-based.
    pub min_text_length: usize,

    /// Maximum pages to process (0 = unlimited).
    pub max_pages: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            max_pages: 10,
        }
    }
}

/// Field extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// OCR runs only when earlier strategies found fewer distinct fields than this.
    pub min_fields_before_ocr: usize,

    /// Minimum confidence to accept an extracted field.
    pub min_field_confidence: f32,

    /// Enable CNPJ/CPF check digit validation.
    pub validate_tax_id_checksum: bool,

    /// Number of parallel extraction workers (0 = available parallelism).
    pub workers: usize,

    /// Skip documents whose content fingerprint was already seen in the batch.
    pub skip_duplicates: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_fields_before_ocr: 4,
            min_field_confidence: 0.5,
            validate_tax_id_checksum: true,
            workers: 0,
            skip_duplicates: true,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Enable the OCR strategy at all.
    pub enabled: bool,

    /// Directory containing model files.
    pub model_dir: PathBuf,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,

    /// Keep `[UNK]` tokens in recognized text.
    pub keep_unk: bool,

    /// Boxes recognized below this score are dropped.
    pub min_recognition_score: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: PathBuf::from("models"),
            detection_model: "det.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
            keep_unk: false,
            min_recognition_score: 0.3,
        }
    }
}

impl OcrConfig {
    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.model_dir.join(model_name)
    }
}

/// Which registry service answers a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// BrasilAPI CNPJ endpoint.
    BrasilApi,
    /// ReceitaWS CNPJ endpoint.
    ReceitaWs,
}

/// Registry lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Provider queried first.
    pub primary: ProviderKind,

    /// Provider queried once when the primary fails (None disables fallback).
    pub fallback: Option<ProviderKind>,

    /// Base URL of the BrasilAPI service.
    pub brasilapi_url: String,

    /// Base URL of the ReceitaWS service.
    pub receitaws_url: String,

    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum lookups in flight at once.
    pub max_concurrent_lookups: usize,

    /// Cached profiles older than this are refreshed.
    pub freshness_hours: i64,

    /// Profile cache file (None keeps the cache in memory).
    pub cache_path: Option<PathBuf>,

    /// Also look up recipient tax IDs.
    pub enrich_recipients: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::BrasilApi,
            fallback: Some(ProviderKind::ReceitaWs),
            brasilapi_url: "https://brasilapi.com.br".to_string(),
            receitaws_url: "https://www.receitaws.com.br".to_string(),
            timeout_secs: 10,
            max_concurrent_lookups: 4,
            freshness_hours: 24 * 7,
            cache_path: None,
            enrich_recipients: false,
        }
    }
}

impl RegistryConfig {
    /// Cache freshness window; rejects negative or unrepresentable hours.
    pub fn freshness(&self) -> Result<chrono::Duration, ConfigError> {
        if self.freshness_hours < 0 {
            return Err(invalid_freshness("must not be negative"));
        }
        chrono::Duration::try_hours(self.freshness_hours).ok_or_else(|| invalid_freshness("too large"))
    }
}

fn invalid_freshness(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: "registry.freshness_hours".to_string(),
        reason: reason.to_string(),
    }
}

/// Impact analysis configuration.
///
/// Rates are optional in the file format so that an explicitly cleared rate
/// surfaces as a configuration error instead of silently becoming zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// ICMS rate applied to at-risk totals.
    pub icms_rate: Option<Decimal>,

    /// PIS rate applied to at-risk totals.
    pub pis_rate: Option<Decimal>,

    /// COFINS rate applied to at-risk totals.
    pub cofins_rate: Option<Decimal>,

    /// Number of issuers in the concentration ratio.
    pub top_n_issuers: usize,

    /// CFOP rule table.
    pub rules: CfopRuleTable,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            icms_rate: Some(Decimal::new(18, 2)),
            pis_rate: Some(Decimal::new(165, 4)),
            cofins_rate: Some(Decimal::new(765, 4)),
            top_n_issuers: 3,
            rules: CfopRuleTable::default(),
        }
    }
}

/// Validated tax rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRates {
    pub icms: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
}

impl ImpactConfig {
    /// Check rates and rule table, returning the rates ready for use.
    pub fn validate(&self) -> Result<TaxRates, ConfigError> {
        let icms = check_rate("icms_rate", self.icms_rate)?;
        let pis = check_rate("pis_rate", self.pis_rate)?;
        let cofins = check_rate("cofins_rate", self.cofins_rate)?;

        if self.top_n_issuers == 0 {
            return Err(ConfigError::Invalid {
                key: "analysis.top_n_issuers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        self.rules.validate()?;

        Ok(TaxRates { icms, pis, cofins })
    }
}

fn check_rate(name: &'static str, rate: Option<Decimal>) -> Result<Decimal, ConfigError> {
    let rate = rate.ok_or(ConfigError::MissingRate(name))?;
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ConfigError::RateOutOfRange {
            name,
            value: rate.to_string(),
        });
    }
    Ok(rate)
}

/// Provider behind the narrative text analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeProvider {
    /// Local template, no network.
    Offline,
    /// OpenAI-compatible chat completions endpoint.
    OpenAi,
    /// Google Gemini generateContent endpoint.
    Gemini,
}

/// Narrative configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub provider: NarrativeProvider,
    pub model: String,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            provider: NarrativeProvider::Offline,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "DANFE_LLM_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl DanfeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_default_rates_validate() {
        let rates = ImpactConfig::default().validate().unwrap();
        assert_eq!(rates.icms, dec("0.18"));
        assert_eq!(rates.pis, dec("0.0165"));
        assert_eq!(rates.cofins, dec("0.0765"));
    }

    #[test]
    fn test_missing_rate_is_config_error() {
        let config = ImpactConfig {
            pis_rate: None,
            ..ImpactConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingRate("pis_rate")));
    }

    #[test]
    fn test_rate_out_of_range() {
        let config = ImpactConfig {
            icms_rate: Some(dec("18")),
            ..ImpactConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RateOutOfRange { name: "icms_rate", .. })
        ));
    }

    #[test]
    fn test_null_rate_in_file_is_rejected() {
        let json = r#"{"analysis": {"icms_rate": null}}"#;
        let config: DanfeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.analysis.validate(),
            Err(ConfigError::MissingRate("icms_rate"))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{"registry": {"timeout_secs": 3}}"#;
        let config: DanfeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.registry.timeout_secs, 3);
        assert_eq!(config.registry.primary, ProviderKind::BrasilApi);
        assert_eq!(config.extraction.min_fields_before_ocr, 4);
    }

    #[test]
    fn test_freshness_bounds() {
        let mut registry = RegistryConfig::default();
        assert_eq!(registry.freshness().unwrap(), chrono::Duration::hours(168));

        registry.freshness_hours = i64::MAX;
        assert!(matches!(registry.freshness(), Err(ConfigError::Invalid { .. })));

        registry.freshness_hours = -1;
        assert!(matches!(registry.freshness(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = DanfeConfig::default();
        config.analysis.top_n_issuers = 5;
        config.save(&path).unwrap();

        let loaded = DanfeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.analysis.top_n_issuers, 5);
        assert_eq!(loaded.analysis.icms_rate, Some(dec("0.18")));
    }
}
