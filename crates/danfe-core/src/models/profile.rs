//! Taxpayer fiscal profile as returned by the registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Federal tax regime of a taxpayer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    SimplesNacional,
    LucroPresumido,
    LucroReal,
    #[default]
    Unknown,
}

impl Regime {
    pub fn label(&self) -> &'static str {
        match self {
            Regime::SimplesNacional => "Simples Nacional",
            Regime::LucroPresumido => "Lucro Presumido",
            Regime::LucroReal => "Lucro Real",
            Regime::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "simples" | "simplesnacional" | "sn" => Ok(Regime::SimplesNacional),
            "presumido" | "lucropresumido" => Ok(Regime::LucroPresumido),
            "real" | "lucroreal" => Ok(Regime::LucroReal),
            "unknown" | "desconhecido" => Ok(Regime::Unknown),
            _ => Err(format!("unknown regime: {}", s)),
        }
    }
}

/// State registration (IE) status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Active,
    Exempt,
    Inactive,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationStatus::Active => "active",
            RegistrationStatus::Exempt => "exempt",
            RegistrationStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "ativa" => Ok(RegistrationStatus::Active),
            "exempt" | "isenta" | "isento" => Ok(RegistrationStatus::Exempt),
            "inactive" | "inativa" => Ok(RegistrationStatus::Inactive),
            _ => Err(format!("unknown registration status: {}", s)),
        }
    }
}

/// Fiscal attributes of one taxpayer, shared by every record that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalProfile {
    /// Digits of the ID that was looked up.
    pub tax_id: String,
    /// Official company name, when the registry reports one.
    #[serde(default)]
    pub name: Option<String>,
    pub regime: Regime,
    pub registration_active: bool,
    pub registration_exempt: bool,
    /// Provider that answered; None for unresolved profiles.
    #[serde(default)]
    pub source: Option<String>,
    /// Both providers failed for this ID.
    #[serde(default)]
    pub lookup_failed: bool,
}

impl FiscalProfile {
    /// Profile for an ID that could not be resolved.
    pub fn unknown(tax_id: impl Into<String>, lookup_failed: bool) -> Self {
        Self {
            tax_id: tax_id.into(),
            name: None,
            regime: Regime::Unknown,
            registration_active: false,
            registration_exempt: false,
            source: None,
            lookup_failed,
        }
    }

    /// Whether a registry actually answered for this profile.
    pub fn is_resolved(&self) -> bool {
        self.source.is_some() && !self.lookup_failed
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        if self.registration_exempt {
            RegistrationStatus::Exempt
        } else if self.registration_active {
            RegistrationStatus::Active
        } else {
            RegistrationStatus::Inactive
        }
    }
}

/// A profile together with the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub profile: FiscalProfile,
    pub fetched_at: DateTime<Utc>,
}

impl CachedProfile {
    pub fn new(profile: FiscalProfile) -> Self {
        Self {
            profile,
            fetched_at: Utc::now(),
        }
    }

    /// True when the entry is younger than `window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.fetched_at) < window
    }
}
