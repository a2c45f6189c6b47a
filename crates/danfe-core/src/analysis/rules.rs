//! CFOP rule table: which codes are taxed, which are exempt, and which
//! class each registration status calls for.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::invoice::rules::cfop::Cfop;
use crate::models::RegistrationStatus;

/// Tax treatment implied by a CFOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeClass {
    Taxed,
    Exempt,
}

/// A four-character code pattern; `x` matches any digit (`510x`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodePattern(String);

impl TryFrom<String> for CodePattern {
    type Error = ConfigError;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        Self::new(&pattern)
    }
}

impl From<CodePattern> for String {
    fn from(pattern: CodePattern) -> Self {
        pattern.0
    }
}

impl CodePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Self(pattern.trim().replace('.', "").to_lowercase());
        pattern.check()?;
        Ok(pattern)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let ok = self.0.len() == 4 && self.0.chars().all(|c| c.is_ascii_digit() || c == 'x');
        if ok {
            Ok(())
        } else {
            Err(ConfigError::RuleTable(format!(
                "bad code pattern {:?} (want four digits or 'x')",
                self.0
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, cfop: &Cfop) -> bool {
        let digits = cfop.digits();
        self.0.len() == 4
            && self
                .0
                .chars()
                .zip(digits.chars())
                .all(|(p, d)| p == 'x' || p == d)
    }

    /// Whether some code matches both patterns.
    fn overlaps(&self, other: &CodePattern) -> bool {
        self.0
            .chars()
            .zip(other.0.chars())
            .all(|(a, b)| a == b || a == 'x' || b == 'x')
    }
}

/// The code class a registration status calls for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusExpectation {
    pub status: RegistrationStatus,
    pub expects: CodeClass,
}

/// Declarative CFOP rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfopRuleTable {
    pub taxed: Vec<CodePattern>,
    pub exempt: Vec<CodePattern>,
    pub expectations: Vec<StatusExpectation>,
}

fn patterns(codes: &[&str]) -> Vec<CodePattern> {
    codes.iter().map(|c| CodePattern(c.to_string())).collect()
}

impl Default for CfopRuleTable {
    fn default() -> Self {
        Self {
            // Sales and resales, with and without ST, plus transport services
            taxed: patterns(&[
                "5101", "5102", "5401", "5403", "5405", "6101", "6102", "6401", "6403", "6404", "5351", "5352",
                "5353", "5354", "5355", "5356", "6351", "6352", "6353", "6354", "6355", "6356",
            ]),
            // Other exits and transport for non-contributors
            exempt: patterns(&["5949", "6949", "5357", "6357"]),
            expectations: vec![
                StatusExpectation {
                    status: RegistrationStatus::Exempt,
                    expects: CodeClass::Exempt,
                },
                StatusExpectation {
                    status: RegistrationStatus::Active,
                    expects: CodeClass::Taxed,
                },
            ],
        }
    }
}

impl CfopRuleTable {
    /// Reject malformed patterns, taxed/exempt overlaps and conflicting expectations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.taxed.is_empty() || self.exempt.is_empty() {
            return Err(ConfigError::RuleTable(
                "taxed and exempt code lists must both be non-empty".to_string(),
            ));
        }
        for pattern in self.taxed.iter().chain(&self.exempt) {
            pattern.check()?;
        }
        for taxed in &self.taxed {
            if let Some(exempt) = self.exempt.iter().find(|e| taxed.overlaps(e)) {
                return Err(ConfigError::RuleTable(format!(
                    "pattern {} is both taxed and exempt (overlaps {})",
                    taxed.as_str(),
                    exempt.as_str()
                )));
            }
        }
        for (i, a) in self.expectations.iter().enumerate() {
            if self.expectations[..i].iter().any(|b| b.status == a.status) {
                return Err(ConfigError::RuleTable(format!(
                    "duplicate expectation for status {}",
                    a.status
                )));
            }
        }
        Ok(())
    }

    /// Class of a code, or None when no pattern knows it.
    pub fn classify(&self, cfop: &Cfop) -> Option<CodeClass> {
        if self.taxed.iter().any(|p| p.matches(cfop)) {
            Some(CodeClass::Taxed)
        } else if self.exempt.iter().any(|p| p.matches(cfop)) {
            Some(CodeClass::Exempt)
        } else {
            None
        }
    }

    pub fn expected(&self, status: RegistrationStatus) -> Option<CodeClass> {
        self.expectations
            .iter()
            .find(|e| e.status == status)
            .map(|e| e.expects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfop(code: &str) -> Cfop {
        Cfop::parse(code).unwrap()
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = CfopRuleTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table.classify(&cfop("5102")), Some(CodeClass::Taxed));
        assert_eq!(table.classify(&cfop("6.949")), Some(CodeClass::Exempt));
        assert_eq!(table.classify(&cfop("5905")), None);
        assert_eq!(table.expected(RegistrationStatus::Exempt), Some(CodeClass::Exempt));
        assert_eq!(table.expected(RegistrationStatus::Inactive), None);
    }

    #[test]
    fn test_wildcards() {
        let pattern = CodePattern::new("5.10x").unwrap();
        assert!(pattern.matches(&cfop("5101")));
        assert!(pattern.matches(&cfop("5109")));
        assert!(!pattern.matches(&cfop("5110")));
        assert!(CodePattern::new("51").is_err());
        assert!(CodePattern::new("5a02").is_err());
    }

    #[test]
    fn test_overlap_is_rejected() {
        let mut table = CfopRuleTable::default();
        table.exempt.push(CodePattern::new("510x").unwrap());
        assert!(matches!(table.validate(), Err(ConfigError::RuleTable(_))));
    }

    #[test]
    fn test_malformed_pattern_from_file() {
        let err = serde_json::from_str::<CfopRuleTable>(r#"{"taxed": ["5102", "51.0"], "exempt": ["5949"]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("bad code pattern"));
    }

    #[test]
    fn test_patterns_from_file_are_normalized() {
        let table: CfopRuleTable =
            serde_json::from_str(r#"{"taxed": ["5.10X", " 6102 "], "exempt": ["510X"]}"#).unwrap();
        assert_eq!(table.taxed[0].as_str(), "510x");
        assert_eq!(table.taxed[1].as_str(), "6102");
        assert!(table.taxed[0].matches(&cfop("5104")));
        assert!(table.exempt[0].matches(&cfop("5109")));
        // Both spell the same pattern once normalized
        assert!(matches!(table.validate(), Err(ConfigError::RuleTable(_))));

        let saved = serde_json::to_string(&table.exempt).unwrap();
        assert_eq!(saved, r#"["510x"]"#);
    }

    #[test]
    fn test_empty_lists_rejected() {
        let table = CfopRuleTable {
            taxed: Vec::new(),
            ..Default::default()
        };
        assert!(table.validate().is_err());
    }
}
