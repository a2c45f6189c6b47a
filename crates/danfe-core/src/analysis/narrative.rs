//! Advisory prose about an impact result.
//!
//! A [`TextAnalyzer`] only reads a finished [`ImpactResult`]; nothing it
//! returns feeds back into the computation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::impact::{CodeAssessment, ImpactResult};
use crate::error::NarrativeError;
use crate::invoice::rules::money::format_brl_amount;
use crate::models::config::{NarrativeConfig, NarrativeProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn narrate(&self, result: &ImpactResult) -> Result<String, NarrativeError>;
}

/// Build the analyzer selected by the configuration.
///
/// Remote providers read their API key from the configured environment
/// variable and are unavailable without it.
pub fn analyzer_for(config: &NarrativeConfig) -> Result<Arc<dyn TextAnalyzer>, NarrativeError> {
    if config.provider == NarrativeProvider::Offline {
        return Ok(Arc::new(OfflineAnalyzer));
    }

    let api_key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| NarrativeError::Unavailable(format!("{} is not set", config.api_key_env)))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| NarrativeError::Unavailable(e.to_string()))?;

    Ok(match config.provider {
        NarrativeProvider::OpenAi => Arc::new(OpenAiAnalyzer {
            client,
            base_url: config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: config.model.clone(),
            api_key,
        }),
        NarrativeProvider::Gemini => Arc::new(GeminiAnalyzer {
            client,
            base_url: config.base_url.clone().unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            api_key,
        }),
        NarrativeProvider::Offline => Arc::new(OfflineAnalyzer),
    })
}

/// Plain-text digest of a result, used both as the offline narrative and
/// as the context handed to remote models.
pub fn summarize(result: &ImpactResult) -> String {
    let m = &result.metrics;
    let mut out = String::new();

    out.push_str(&format!(
        "Declared regime: {}; registration status: {}.\n",
        result.declared_regime, result.declared_status
    ));
    out.push_str(&format!(
        "{} invoices ({} with a total), aggregate {}",
        m.record_count,
        m.valued_count,
        format_brl_amount(m.total)
    ));
    if let (Some(mean), Some(max), Some(min)) = (m.mean, m.max, m.min) {
        out.push_str(&format!(
            ", mean {}, largest {}, smallest {}",
            format_brl_amount(mean),
            format_brl_amount(max),
            format_brl_amount(min)
        ));
    }
    out.push_str(".\n");

    let share = (m.top_issuers_share * rust_decimal::Decimal::ONE_HUNDRED).round_dp(1);
    out.push_str(&format!(
        "Top {} suppliers hold {:.1}% of the total{}.\n",
        m.top_n,
        share,
        if share > rust_decimal::Decimal::from(70) {
            " (concentrated)"
        } else {
            ""
        }
    ));

    if result.at_risk_count == 0 {
        out.push_str("No invoice carries a taxed CFOP against the declared registration status.\n");
    } else {
        out.push_str(&format!(
            "{} invoices worth {} carry a taxed CFOP while an exempt code was expected. \
             Undue ICMS {}, PIS {}, COFINS {}; total undue {}.\n",
            result.at_risk_count,
            format_brl_amount(result.at_risk_total),
            format_brl_amount(result.undue.icms),
            format_brl_amount(result.undue.pis),
            format_brl_amount(result.undue.cofins),
            format_brl_amount(result.total_undue)
        ));
        out.push_str(&format!(
            "What-if final value (batch total + undue): {}.\n",
            format_brl_amount(result.what_if_final_value)
        ));
    }

    let unclassifiable = result
        .assessments
        .iter()
        .filter(|a| a.assessment == CodeAssessment::Unclassifiable)
        .count();
    if unclassifiable > 0 {
        out.push_str(&format!(
            "{} invoices have a missing or unknown CFOP and were left out.\n",
            unclassifiable
        ));
    }
    if result.unclassifiable_regime_count > 0 {
        out.push_str(&format!(
            "{} invoices come from suppliers whose regime is unknown.\n",
            result.unclassifiable_regime_count
        ));
    }
    if !result.alerts.is_empty() {
        out.push_str(&format!("{} fiscal alerts raised.\n", result.alerts.len()));
    }
    out
}

fn prompt(result: &ImpactResult) -> String {
    format!(
        "You are a Brazilian tax analyst. Using only the figures below, write a short \
         executive assessment of this batch of purchase invoices: financial profile, \
         CFOP compliance risk, and recommended next steps. The figures are estimates, \
         not a tax filing.\n\n{}",
        summarize(result)
    )
}

/// Template narrative, no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAnalyzer;

#[async_trait]
impl TextAnalyzer for OfflineAnalyzer {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn narrate(&self, result: &ImpactResult) -> Result<String, NarrativeError> {
        Ok(summarize(result))
    }
}

/// OpenAI-compatible `POST {base}/chat/completions`.
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[async_trait]
impl TextAnalyzer for OpenAiAnalyzer {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn narrate(&self, result: &ImpactResult) -> Result<String, NarrativeError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt(result)}],
        });
        debug!("POST {}", url);
        let payload = post_json(self.client.post(&url).bearer_auth(&self.api_key).json(&body)).await?;
        chat_completion_text(&payload)
    }
}

/// Gemini `POST {base}/models/{model}:generateContent`.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[async_trait]
impl TextAnalyzer for GeminiAnalyzer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn narrate(&self, result: &ImpactResult) -> Result<String, NarrativeError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = json!({ "contents": [{"parts": [{"text": prompt(result)}]}] });
        debug!("POST {}", url);
        let payload = post_json(
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body),
        )
        .await?;
        gemini_text(&payload)
    }
}

async fn post_json(request: reqwest::RequestBuilder) -> Result<Value, NarrativeError> {
    let response = request
        .send()
        .await
        .map_err(|e| NarrativeError::Request(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(NarrativeError::Request(format!("HTTP {}", status)));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| NarrativeError::Response(e.to_string()))
}

fn non_empty_text(text: Option<&str>) -> Result<String, NarrativeError> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NarrativeError::Response("no text in response".to_string()))
}

fn chat_completion_text(payload: &Value) -> Result<String, NarrativeError> {
    non_empty_text(payload.pointer("/choices/0/message/content").and_then(Value::as_str))
}

fn gemini_text(payload: &Value) -> Result<String, NarrativeError> {
    non_empty_text(
        payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    )
}
