//! Data models: configuration, invoice records and fiscal profiles.

pub mod config;
pub mod profile;
pub mod record;

pub use config::DanfeConfig;
pub use profile::{CachedProfile, FiscalProfile, Regime, RegistrationStatus};
pub use record::{FieldName, FieldValue, InvoiceRecord, Provenance, TaxAmounts, TaxId, TaxIdKind};
