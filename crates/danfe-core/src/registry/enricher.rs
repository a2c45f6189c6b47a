//! Batch enrichment: dedupe, cache, primary/fallback lookups and fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{JsonFileStore, MemoryStore, ProfileStore};
use super::providers::provider_for;
use super::{LookupError, RegistryProvider};
use crate::error::RegistryError;
use crate::invoice::rules::tax_id::cnpj_head_office;
use crate::models::config::RegistryConfig;
use crate::models::{CachedProfile, FiscalProfile, InvoiceRecord, Regime, RegistrationStatus, TaxId, TaxIdKind};

/// Both providers failed for one tax ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupFailure {
    pub tax_id: String,
    /// One `provider: error` line per attempt, in order.
    pub attempts: Vec<String>,
}

/// Counters for one `enrich_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    /// Distinct lookup keys in the batch.
    pub distinct_ids: usize,
    pub cache_hits: usize,
    /// External calls made, fallback attempts included.
    pub external_calls: usize,
    /// CPFs, which are never looked up.
    pub natural_persons: usize,
    pub failures: Vec<LookupFailure>,
    /// Set when the cache could not be flushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_error: Option<String>,
}

struct Resolution {
    profile: FiscalProfile,
    failure: Option<LookupFailure>,
    cache_hit: bool,
    calls: usize,
}

/// Resolves fiscal profiles for tax IDs.
pub struct Enricher {
    primary: Arc<dyn RegistryProvider>,
    fallback: Option<Arc<dyn RegistryProvider>>,
    store: Arc<dyn ProfileStore>,
    freshness: chrono::Duration,
    timeout: Duration,
    max_concurrent: usize,
    enrich_recipients: bool,
}

impl Enricher {
    pub fn new(primary: Arc<dyn RegistryProvider>, store: Arc<dyn ProfileStore>) -> Self {
        let defaults = RegistryConfig::default();
        Self {
            primary,
            fallback: None,
            store,
            freshness: chrono::Duration::hours(defaults.freshness_hours),
            timeout: Duration::from_secs(defaults.timeout_secs),
            max_concurrent: defaults.max_concurrent_lookups,
            enrich_recipients: defaults.enrich_recipients,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn RegistryProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_freshness(mut self, freshness: chrono::Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_recipients(mut self, enrich_recipients: bool) -> Self {
        self.enrich_recipients = enrich_recipients;
        self
    }

    /// Build providers and open the cache store named by the configuration.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let freshness = config.freshness()?;
        let primary = provider_for(config.primary, config)?;
        let store: Arc<dyn ProfileStore> = match &config.cache_path {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };

        let mut enricher = Self::new(primary, store)
            .with_freshness(freshness)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_max_concurrent(config.max_concurrent_lookups)
            .with_recipients(config.enrich_recipients);
        if let Some(kind) = config.fallback.filter(|k| *k != config.primary) {
            enricher = enricher.with_fallback(provider_for(kind, config)?);
        }
        Ok(enricher)
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Profile for one tax ID, plus the failure details when both providers failed.
    pub async fn enrich(&self, tax_id: &TaxId) -> (FiscalProfile, Option<LookupFailure>) {
        let resolution = self.resolve(&lookup_key(tax_id)).await;
        (resolution.profile, resolution.failure)
    }

    /// Annotate every record with the profiles of its parties.
    ///
    /// Each distinct key is resolved once and the profile copied to every
    /// record that references it. Failures never abort the batch.
    pub async fn enrich_batch(&self, mut records: Vec<InvoiceRecord>) -> (Vec<InvoiceRecord>, EnrichmentReport) {
        let mut keys: BTreeMap<String, TaxId> = BTreeMap::new();
        for record in &records {
            for id in self.parties(record) {
                let key = lookup_key(id);
                keys.entry(key.digits().to_string()).or_insert(key);
            }
        }

        let mut report = EnrichmentReport {
            distinct_ids: keys.len(),
            ..Default::default()
        };
        info!("Enriching {} records ({} distinct tax IDs)", records.len(), keys.len());

        let resolved: Vec<(String, Resolution)> = stream::iter(keys)
            .map(|(key, id)| async move { (key, self.resolve(&id).await) })
            .buffer_unordered(self.max_concurrent.max(1))
            .collect()
            .await;

        let mut profiles: BTreeMap<String, FiscalProfile> = BTreeMap::new();
        for (key, resolution) in resolved {
            if resolution.cache_hit {
                report.cache_hits += 1;
            }
            report.external_calls += resolution.calls;
            if !resolution.cache_hit && resolution.calls == 0 {
                report.natural_persons += 1;
            }
            if let Some(failure) = resolution.failure {
                report.failures.push(failure);
            }
            profiles.insert(key, resolution.profile);
        }
        report.failures.sort_by(|a, b| a.tax_id.cmp(&b.tax_id));

        let lookup = |id: Option<&TaxId>| {
            id.and_then(|id| profiles.get(lookup_key(id).digits()))
                .cloned()
        };
        for record in &mut records {
            record.issuer_profile = lookup(record.issuer_tax_id.value());
            if self.enrich_recipients {
                record.recipient_profile = lookup(record.recipient_tax_id.value());
            }
        }

        if let Err(e) = self.store.flush() {
            warn!("Profile cache not saved: {}", e);
            report.cache_error = Some(e.to_string());
        }
        (records, report)
    }

    fn parties<'a>(&self, record: &'a InvoiceRecord) -> impl Iterator<Item = &'a TaxId> {
        let recipient = if self.enrich_recipients {
            record.recipient_tax_id.value()
        } else {
            None
        };
        record.issuer_tax_id.value().into_iter().chain(recipient)
    }

    async fn resolve(&self, key: &TaxId) -> Resolution {
        if key.kind() == TaxIdKind::Cpf {
            return Resolution {
                profile: FiscalProfile::unknown(key.digits(), false),
                failure: None,
                cache_hit: false,
                calls: 0,
            };
        }

        if let Some(entry) = self.store.get(key.digits()) {
            if entry.is_fresh(Utc::now(), self.freshness) {
                debug!("cache hit for {}", key);
                return Resolution {
                    profile: entry.profile,
                    failure: None,
                    cache_hit: true,
                    calls: 0,
                };
            }
            debug!("cache entry for {} is stale", key);
        }

        let mut attempts = Vec::new();
        let mut calls = 0;
        let providers = std::iter::once(&self.primary).chain(self.fallback.as_ref());
        for provider in providers {
            calls += 1;
            match self.call(provider.as_ref(), key).await {
                Ok(mut profile) => {
                    profile.tax_id = key.digits().to_string();
                    self.store.put(CachedProfile::new(profile.clone()));
                    return Resolution {
                        profile,
                        failure: None,
                        cache_hit: false,
                        calls,
                    };
                }
                Err(e) => {
                    warn!("{} lookup failed for {}: {}", provider.name(), key, e);
                    attempts.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        Resolution {
            profile: FiscalProfile::unknown(key.digits(), true),
            failure: Some(LookupFailure {
                tax_id: key.digits().to_string(),
                attempts,
            }),
            cache_hit: false,
            calls,
        }
    }

    async fn call(&self, provider: &dyn RegistryProvider, key: &TaxId) -> Result<FiscalProfile, LookupError> {
        match tokio::time::timeout(self.timeout, provider.lookup(key)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Registries answer per company, so CNPJ branches resolve through the head office.
fn lookup_key(tax_id: &TaxId) -> TaxId {
    match tax_id.kind() {
        TaxIdKind::Cnpj => TaxId::parse(&cnpj_head_office(tax_id.digits())).unwrap_or_else(|| tax_id.clone()),
        TaxIdKind::Cpf => tax_id.clone(),
    }
}

/// Default (regime, registration status) declaration for a recipient.
///
/// Unresolved profiles suggest an unknown regime with an active registration,
/// the common case, rather than reading the empty flags as inactive.
pub fn suggest_declaration(profile: &FiscalProfile) -> (Regime, RegistrationStatus) {
    if !profile.is_resolved() {
        return (Regime::Unknown, RegistrationStatus::Active);
    }
    (profile.regime, profile.registration_status())
}
