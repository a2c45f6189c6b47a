//! Common regex patterns for DANFE field extraction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Tax IDs (CNPJ / CPF)
    pub static ref CNPJ_MASKED: Regex = Regex::new(
        r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b"
    ).unwrap();

    pub static ref CPF_MASKED: Regex = Regex::new(
        r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b"
    ).unwrap();

    pub static ref TAX_ID_MASKED: Regex = Regex::new(
        r"\b(?:\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2})\b"
    ).unwrap();

    pub static ref TAX_ID_ANY: Regex = Regex::new(
        r"\b(?:\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2}|\d{14}|\d{11})\b"
    ).unwrap();

    pub static ref TAX_ID_LABEL: Regex = Regex::new(
        r"(?i)\b(?:CNPJ|CPF)(?:\s*/\s*(?:CNPJ|CPF))?\b"
    ).unwrap();

    // Money (Brazilian format: 1.234,56)
    pub static ref MONEY: Regex = Regex::new(
        r"(?:R\$\s*)?\b(\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2})\b"
    ).unwrap();

    pub static ref MONEY_LEADING: Regex = Regex::new(
        r"^[\s:\-]*(?:R\$\s*)?(\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2})\b"
    ).unwrap();

    pub static ref TOTAL_INVOICE: Regex = Regex::new(
        r"(?i)(?:VALOR\s+TOTAL\s+DA\s+NOTA|TOTAL\s+DA\s+NOTA|VALOR\s+TOTAL\s+DA\s+NF|TOTAL\s+DA\s+NF)"
    ).unwrap();

    pub static ref TOTAL_PRODUCTS: Regex = Regex::new(
        r"(?i)(?:VALOR\s+TOTAL\s+DOS\s+PRODUTOS|TOTAL\s+DOS\s+PRODUTOS)"
    ).unwrap();

    pub static ref ICMS_LABEL: Regex = Regex::new(
        r"(?i)\bVALOR\s+DO\s+ICMS\b"
    ).unwrap();

    pub static ref PIS_LABEL: Regex = Regex::new(
        r"(?i)\bVALOR\s+(?:DO\s+)?PIS\b"
    ).unwrap();

    pub static ref COFINS_LABEL: Regex = Regex::new(
        r"(?i)\bVALOR\s+(?:DA\s+|DO\s+)?COFINS\b"
    ).unwrap();

    // Dates
    pub static ref DATE_ANY: Regex = Regex::new(
        r"\b(?:\d{2}[/.\-]\d{2}[/.\-]\d{4}|\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{2})\b"
    ).unwrap();

    pub static ref ISSUE_DATE_LABEL: Regex = Regex::new(
        r"(?i)DATA\s+(?:DA\s+|DE\s+)?EMISS[ÃA]O"
    ).unwrap();

    // Document number and series
    pub static ref NUMBER_LABEL: Regex = Regex::new(
        r"(?i)(?:\bNF-?E\b|\bN[º°]|\bN[ÚU]MERO\b|\bNUM\b|\bNRO\b|\bNO\.)"
    ).unwrap();

    pub static ref NUMBER_VALUE: Regex = Regex::new(
        r"^[\s:\-.]*(\d{1,3}(?:\.\d{3}){1,2}|\d{1,9})\b"
    ).unwrap();

    pub static ref SERIES_LABEL: Regex = Regex::new(
        r"(?i)\bS[ÉE]RIE\b"
    ).unwrap();

    pub static ref SERIES_VALUE: Regex = Regex::new(
        r"^[\s:\-]*(\d{1,3})\b"
    ).unwrap();

    // CFOP
    pub static ref CFOP_LABEL: Regex = Regex::new(
        r"(?i)\bCFOP\b"
    ).unwrap();

    pub static ref CFOP_VALUE: Regex = Regex::new(
        r"\b([1-7]\.?\d{3})\b"
    ).unwrap();

    // Party names and DANFE sections
    pub static ref ISSUER_SECTION: Regex = Regex::new(
        r"(?i)IDENTIFICA[ÇC][ÃA]O\s+DO\s+EMITENTE|^\s*EMITENTE\s*$"
    ).unwrap();

    pub static ref RECIPIENT_SECTION: Regex = Regex::new(
        r"(?i)^\s*DESTINAT[ÁA]RIO"
    ).unwrap();

    pub static ref SECTION_END: Regex = Regex::new(
        r"(?i)FATURA|DUPLICATA|C[ÁA]LCULO\s+DO\s+IMPOSTO|TRANSPORTADOR|DADOS\s+DOS\s+PRODUTOS"
    ).unwrap();

    pub static ref NAME_LABEL: Regex = Regex::new(
        r"(?i)NOME\s*/\s*RAZ[ÃA]O\s+SOCIAL"
    ).unwrap();

    /// Text before an optional tax ID at the start of a line.
    pub static ref NAME_VALUE: Regex = Regex::new(
        r"^[\s:\-]*([^\d\s][^\d]{2,}?)\s*[-–]?\s*(?:\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2}|\d{14}|\d{11}|$)"
    ).unwrap();

    /// A line made only of name-like text.
    pub static ref NAME_LINE: Regex = Regex::new(
        r"^\s*([^\d\s][^\d]{2,}?)\s*$"
    ).unwrap();
}

/// Words that mark DANFE form labels rather than party names.
pub const HEADER_KEYWORDS: &[&str] = &[
    "NOME", "RAZÃO", "RAZAO", "CNPJ", "CPF", "DATA", "ENDEREÇO", "ENDERECO",
    "INSCRIÇÃO", "INSCRICAO", "CEP", "MUNICÍPIO", "MUNICIPIO", "BAIRRO",
    "DISTRITO", "FONE", "FAX", "HORA", "UF", "NATUREZA DA OPERAÇÃO", "PROTOCOLO",
    "CHAVE DE ACESSO", "SEFAZ", "SITE", "DANFE", "RECEBEMOS", "EMITENTE",
    "DESTINAT", "IDENTIFICA",
];

/// Whole words that never form an issuer name on their own.
pub const IGNORED_NAME_WORDS: &[&str] = &[
    "DANFE", "DOCUMENTO", "AUXILIAR", "NOTA", "FISCAL", "ELETRÔNICA", "ELETRONICA",
    "ENTRADA", "SAÍDA", "SAIDA",
];

/// Whether a line looks like a form label.
pub fn is_headerish(s: &str) -> bool {
    let upper = s.to_uppercase();
    upper.split(|c: char| !c.is_alphanumeric()).any(|w| w == "UF")
        || HEADER_KEYWORDS
            .iter()
            .filter(|k| **k != "UF")
            .any(|k| upper.contains(k))
}

/// Whether a text fragment is plausible as a party name.
pub fn is_plausible_name(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.chars().filter(|c| c.is_alphabetic()).count() < 3 {
        return false;
    }
    if is_headerish(trimmed) {
        return false;
    }
    let upper = trimmed.to_uppercase();
    !upper
        .split_whitespace()
        .any(|w| IGNORED_NAME_WORDS.contains(&w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_pattern() {
        let caps: Vec<&str> = MONEY
            .captures_iter("BASE 0,00 ICMS R$ 1.234,56 TOTAL 15.000,00")
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(caps, vec!["0,00", "1.234,56", "15.000,00"]);
    }

    #[test]
    fn test_money_without_thousands_separator() {
        let caps = MONEY.captures("TOTAL 1234,56").unwrap();
        assert_eq!(&caps[1], "1234,56");
    }

    #[test]
    fn test_tax_id_patterns() {
        assert!(TAX_ID_ANY.is_match("CNPJ 11.222.333/0001-81"));
        assert!(TAX_ID_ANY.is_match("CPF 52998224725"));
        assert!(!TAX_ID_MASKED.is_match("52998224725"));
        // Access keys are 44 digits and never match a tax ID
        assert!(!TAX_ID_ANY.is_match("35240611222333000181550010000012341000012345"));
    }

    #[test]
    fn test_name_value_stops_at_tax_id() {
        let caps = NAME_VALUE
            .captures("COMERCIAL BETA LTDA 98.765.432/0001-98 10/03/2024")
            .unwrap();
        assert_eq!(caps[1].trim(), "COMERCIAL BETA LTDA");
    }

    #[test]
    fn test_is_headerish() {
        assert!(is_headerish("NOME/RAZÃO SOCIAL"));
        assert!(is_headerish("UF SP"));
        assert!(!is_headerish("FUNDO AZUL COMERCIO LTDA"));
    }

    #[test]
    fn test_is_plausible_name() {
        assert!(is_plausible_name("ACME DISTRIBUIDORA LTDA"));
        assert!(!is_plausible_name("DOCUMENTO AUXILIAR DA NOTA FISCAL"));
        assert!(!is_plausible_name("--"));
    }
}
