//! Taxpayer registry enrichment.
//!
//! Lookups go through a [`RegistryProvider`] (primary, then at most one
//! fallback), results are kept in a [`ProfileStore`] keyed by tax ID, and
//! the [`Enricher`] fans profiles out to every record of a batch.

mod cache;
mod enricher;
mod providers;

pub use cache::{JsonFileStore, MemoryStore, ProfileStore};
pub use enricher::{suggest_declaration, EnrichmentReport, Enricher, LookupFailure};
pub use providers::{provider_for, BrasilApiProvider, ReceitaWsProvider};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FiscalProfile, TaxId};

/// Why a single lookup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The registry does not know this tax ID.
    #[error("tax ID not found")]
    NotFound,

    /// Transport failure or non-success status.
    #[error("service error: {0}")]
    Service(String),

    /// No answer within the configured timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The response could not be mapped to a profile.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A taxpayer registry service.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Provider identifier recorded on profiles (e.g. "brasilapi").
    fn name(&self) -> &'static str;

    async fn lookup(&self, tax_id: &TaxId) -> Result<FiscalProfile, LookupError>;
}
