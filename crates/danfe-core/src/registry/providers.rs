//! HTTP registry providers and their payload mapping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{LookupError, RegistryProvider};
use crate::error::RegistryError;
use crate::models::config::{ProviderKind, RegistryConfig};
use crate::models::{FiscalProfile, Regime, TaxId, TaxIdKind};

const USER_AGENT: &str = concat!("danfe/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, RegistryError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RegistryError::Client(e.to_string()))
}

/// Build the configured provider of the given kind.
pub fn provider_for(kind: ProviderKind, config: &RegistryConfig) -> Result<Arc<dyn RegistryProvider>, RegistryError> {
    Ok(match kind {
        ProviderKind::BrasilApi => Arc::new(BrasilApiProvider::new(&config.brasilapi_url, config.timeout_secs)?),
        ProviderKind::ReceitaWs => Arc::new(ReceitaWsProvider::new(&config.receitaws_url, config.timeout_secs)?),
    })
}

/// GET a JSON document, mapping transport problems to lookup errors.
async fn get_json(client: &reqwest::Client, url: &str, timeout_secs: u64) -> Result<Value, LookupError> {
    debug!("GET {}", url);
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            LookupError::Timeout(timeout_secs)
        } else {
            LookupError::Service(e.to_string())
        }
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(LookupError::NotFound);
    }
    if !status.is_success() {
        return Err(LookupError::Service(format!("HTTP {}", status)));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| LookupError::Malformed(e.to_string()))
}

fn require_cnpj(tax_id: &TaxId) -> Result<(), LookupError> {
    match tax_id.kind() {
        TaxIdKind::Cnpj => Ok(()),
        // Neither service exposes natural persons
        TaxIdKind::Cpf => Err(LookupError::NotFound),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `true`, `"S"`, `"Sim"`, `"true"` all read as yes.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            s == "s" || s == "true" || s.contains("sim")
        }
        _ => false,
    }
}

/// BrasilAPI `GET /api/cnpj/v1/{cnpj}`.
pub struct BrasilApiProvider {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct BrasilApiCompany {
    cnpj: Option<String>,
    razao_social: Option<String>,
    nome_fantasia: Option<String>,
    descricao_situacao_cadastral: Option<String>,
    opcao_pelo_simples: Option<bool>,
    opcao_pelo_mei: Option<bool>,
    inscricao_estadual_ativa: Option<bool>,
    #[serde(default)]
    regime_tributario: Vec<BrasilApiRegime>,
}

#[derive(Debug, Deserialize)]
struct BrasilApiRegime {
    ano: Option<i32>,
    forma_de_tributacao: Option<String>,
}

impl BrasilApiProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    /// Map a BrasilAPI company payload to a profile.
    pub fn map_payload(tax_id: &TaxId, payload: Value) -> Result<FiscalProfile, LookupError> {
        let company: BrasilApiCompany =
            serde_json::from_value(payload).map_err(|e| LookupError::Malformed(e.to_string()))?;
        if company.cnpj.is_none() && company.razao_social.is_none() {
            return Err(LookupError::Malformed("missing cnpj and razao_social".to_string()));
        }

        let regime = if company.opcao_pelo_simples == Some(true) || company.opcao_pelo_mei == Some(true) {
            Regime::SimplesNacional
        } else {
            company
                .regime_tributario
                .iter()
                .max_by_key(|r| r.ano.unwrap_or(0))
                .and_then(|r| r.forma_de_tributacao.as_deref())
                .map(|forma| {
                    let forma = forma.to_uppercase();
                    if forma.contains("REAL") {
                        Regime::LucroReal
                    } else if forma.contains("PRESUMIDO") {
                        Regime::LucroPresumido
                    } else if forma.contains("SIMPLES") {
                        Regime::SimplesNacional
                    } else {
                        Regime::Unknown
                    }
                })
                .unwrap_or(Regime::Unknown)
        };

        let registration_active = company.inscricao_estadual_ativa.unwrap_or_else(|| {
            company
                .descricao_situacao_cadastral
                .as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("ATIVA"))
        });

        Ok(FiscalProfile {
            tax_id: tax_id.digits().to_string(),
            name: non_empty(company.razao_social).or_else(|| non_empty(company.nome_fantasia)),
            regime,
            registration_active,
            registration_exempt: false,
            source: Some("brasilapi".to_string()),
            lookup_failed: false,
        })
    }
}

#[async_trait]
impl RegistryProvider for BrasilApiProvider {
    fn name(&self) -> &'static str {
        "brasilapi"
    }

    async fn lookup(&self, tax_id: &TaxId) -> Result<FiscalProfile, LookupError> {
        require_cnpj(tax_id)?;
        let url = format!("{}/api/cnpj/v1/{}", self.base_url, tax_id.digits());
        let payload = get_json(&self.client, &url, self.timeout_secs).await?;
        Self::map_payload(tax_id, payload)
    }
}

/// ReceitaWS `GET /v1/cnpj/{cnpj}`.
pub struct ReceitaWsProvider {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ReceitaWsCompany {
    status: Option<String>,
    message: Option<String>,
    nome: Option<String>,
    fantasia: Option<String>,
    situacao: Option<String>,
    #[serde(default)]
    opcao_pelo_simples: Value,
    simples: Option<ReceitaWsSimples>,
    situacao_especial: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceitaWsSimples {
    #[serde(default)]
    optante: Value,
}

impl ReceitaWsProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    /// Map a ReceitaWS payload to a profile.
    ///
    /// ReceitaWS reports Simples Nacional membership but not which
    /// non-Simples regime applies, so those companies map to `Unknown`.
    pub fn map_payload(tax_id: &TaxId, payload: Value) -> Result<FiscalProfile, LookupError> {
        let company: ReceitaWsCompany =
            serde_json::from_value(payload).map_err(|e| LookupError::Malformed(e.to_string()))?;

        match company.status.as_deref() {
            Some("OK") => {}
            Some("ERROR") => {
                debug!("receitaws: {}", company.message.as_deref().unwrap_or("error"));
                return Err(LookupError::NotFound);
            }
            other => return Err(LookupError::Malformed(format!("unexpected status {:?}", other))),
        }

        let situacao = company.situacao.as_deref().unwrap_or("").trim().to_lowercase();
        let especial = company.situacao_especial.as_deref().unwrap_or("").to_uppercase();

        let simples = truthy(&company.opcao_pelo_simples)
            || company.simples.as_ref().is_some_and(|s| truthy(&s.optante))
            || especial.contains("SIMPLES");

        Ok(FiscalProfile {
            tax_id: tax_id.digits().to_string(),
            name: non_empty(company.nome).or_else(|| non_empty(company.fantasia)),
            regime: if simples { Regime::SimplesNacional } else { Regime::Unknown },
            registration_active: situacao == "ativa",
            registration_exempt: situacao.contains("isent"),
            source: Some("receitaws".to_string()),
            lookup_failed: false,
        })
    }
}

#[async_trait]
impl RegistryProvider for ReceitaWsProvider {
    fn name(&self) -> &'static str {
        "receitaws"
    }

    async fn lookup(&self, tax_id: &TaxId) -> Result<FiscalProfile, LookupError> {
        require_cnpj(tax_id)?;
        let url = format!("{}/v1/cnpj/{}", self.base_url, tax_id.digits());
        let payload = get_json(&self.client, &url, self.timeout_secs).await?;
        Self::map_payload(tax_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn id() -> TaxId {
        TaxId::parse("11222333000181").unwrap()
    }

    #[test]
    fn test_brasilapi_simples() {
        let payload = json!({
            "cnpj": "11222333000181",
            "razao_social": "ACME DISTRIBUIDORA LTDA",
            "nome_fantasia": "ACME",
            "descricao_situacao_cadastral": "ATIVA",
            "opcao_pelo_simples": true,
            "opcao_pelo_mei": false,
            "regime_tributario": []
        });
        let profile = BrasilApiProvider::map_payload(&id(), payload).unwrap();
        assert_eq!(profile.name.as_deref(), Some("ACME DISTRIBUIDORA LTDA"));
        assert_eq!(profile.regime, Regime::SimplesNacional);
        assert!(profile.registration_active);
        assert_eq!(profile.source.as_deref(), Some("brasilapi"));
    }

    #[test]
    fn test_brasilapi_latest_regime_wins() {
        let payload = json!({
            "cnpj": "11222333000181",
            "razao_social": "BETA SA",
            "descricao_situacao_cadastral": "BAIXADA",
            "opcao_pelo_simples": false,
            "opcao_pelo_mei": null,
            "regime_tributario": [
                {"ano": 2021, "forma_de_tributacao": "LUCRO PRESUMIDO"},
                {"ano": 2023, "forma_de_tributacao": "LUCRO REAL"}
            ]
        });
        let profile = BrasilApiProvider::map_payload(&id(), payload).unwrap();
        assert_eq!(profile.regime, Regime::LucroReal);
        assert!(!profile.registration_active);
    }

    #[test]
    fn test_brasilapi_state_registration_flag() {
        let payload = json!({
            "razao_social": "GAMA LTDA",
            "descricao_situacao_cadastral": "ATIVA",
            "inscricao_estadual_ativa": false
        });
        let profile = BrasilApiProvider::map_payload(&id(), payload).unwrap();
        assert!(!profile.registration_active);
        assert_eq!(profile.regime, Regime::Unknown);
    }

    #[test]
    fn test_brasilapi_malformed() {
        let err = BrasilApiProvider::map_payload(&id(), json!({"message": "oops"})).unwrap_err();
        assert!(matches!(err, LookupError::Malformed(_)));
        let err = BrasilApiProvider::map_payload(&id(), json!([1, 2])).unwrap_err();
        assert!(matches!(err, LookupError::Malformed(_)));
    }

    #[test]
    fn test_receitaws_mapping() {
        let payload = json!({
            "status": "OK",
            "nome": "DELTA COMERCIO LTDA",
            "situacao": "ATIVA",
            "simples": {"optante": true},
            "situacao_especial": ""
        });
        let profile = ReceitaWsProvider::map_payload(&id(), payload).unwrap();
        assert_eq!(profile.regime, Regime::SimplesNacional);
        assert!(profile.registration_active);
        assert!(!profile.registration_exempt);

        let payload = json!({
            "status": "OK",
            "nome": "EPSILON SA",
            "situacao": "INATIVA",
            "opcao_pelo_simples": "Não"
        });
        let profile = ReceitaWsProvider::map_payload(&id(), payload).unwrap();
        assert_eq!(profile.regime, Regime::Unknown);
        assert!(!profile.registration_active);
    }

    #[test]
    fn test_receitaws_special_situation_and_exempt() {
        let payload = json!({
            "status": "OK",
            "nome": "ZETA ME",
            "situacao": "ISENTA",
            "situacao_especial": "OPTANTE PELO SIMPLES NACIONAL"
        });
        let profile = ReceitaWsProvider::map_payload(&id(), payload).unwrap();
        assert_eq!(profile.regime, Regime::SimplesNacional);
        assert!(profile.registration_exempt);
    }

    #[test]
    fn test_receitaws_error_status() {
        let payload = json!({"status": "ERROR", "message": "CNPJ inválido"});
        assert_eq!(ReceitaWsProvider::map_payload(&id(), payload), Err(LookupError::NotFound));
    }

    #[tokio::test]
    async fn test_cpf_is_not_looked_up() {
        let provider = BrasilApiProvider::new("http://127.0.0.1:9", 1).unwrap();
        let cpf = TaxId::parse("52998224725").unwrap();
        assert_eq!(provider.lookup(&cpf).await, Err(LookupError::NotFound));
    }
}
