//! CFOP (fiscal operation code) parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A four-digit CFOP code, e.g. `5102`.
///
/// The first digit gives the operation direction and scope (1-3 entries,
/// 5-7 exits); 4 and 8+ are not assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cfop(u16);

impl Cfop {
    /// Parse `5102`, `5.102` or ` 5102 `.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 4 || raw.chars().any(|c| !(c.is_ascii_digit() || c == '.' || c.is_whitespace())) {
            return None;
        }
        let code: u16 = digits.parse().ok()?;
        match code / 1000 {
            1 | 2 | 3 | 5 | 6 | 7 => Some(Self(code)),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    /// The code as four ASCII digits.
    pub fn digits(&self) -> String {
        format!("{:04}", self.0)
    }
}

impl fmt::Display for Cfop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

impl TryFrom<String> for Cfop {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Cfop::parse(&value).ok_or_else(|| format!("not a CFOP: {}", value))
    }
}

impl From<Cfop> for String {
    fn from(cfop: Cfop) -> Self {
        cfop.digits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Cfop::parse("5102").map(|c| c.code()), Some(5102));
        assert_eq!(Cfop::parse("5.949").map(|c| c.code()), Some(5949));
        assert_eq!(Cfop::parse("4102"), None);
        assert_eq!(Cfop::parse("510"), None);
        assert_eq!(Cfop::parse("51O2"), None);
    }

    #[test]
    fn test_display_and_digits() {
        let cfop = Cfop::parse("6102").unwrap();
        assert_eq!(cfop.to_string(), "6.102");
        assert_eq!(cfop.digits(), "6102");
        assert_eq!(serde_json::to_string(&cfop).unwrap(), "\"6102\"");
    }
}
