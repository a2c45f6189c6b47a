//! Monetary amounts in Brazilian format (`R$ 1.234,56`).

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a Brazilian-formatted amount (e.g., "R$ 1.234,56" or "1234,56").
///
/// Dots are thousands separators and the comma is the decimal mark. A string
/// with dots and no comma is read as a plain decimal ("1234.56") only when the
/// last dot is followed by exactly two digits. Signs are kept so callers can
/// reject negative values.
pub fn parse_brl_amount(s: &str) -> Option<Decimal> {
    let trimmed = s.trim().trim_start_matches("R$").trim_start_matches("r$").trim();
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if cleaned.contains(',') {
        if cleaned.matches(',').count() > 1 {
            return None;
        }
        let (int_part, frac) = cleaned.split_once(',')?;
        if !valid_grouping(int_part) {
            return None;
        }
        format!("{}.{}", int_part.replace('.', ""), frac)
    } else if let Some(pos) = cleaned.rfind('.') {
        let frac = &cleaned[pos + 1..];
        if cleaned.matches('.').count() == 1 && frac.len() == 2 {
            cleaned
        } else if valid_grouping(&cleaned) {
            cleaned.replace('.', "")
        } else {
            return None;
        }
    } else {
        cleaned
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Dotted integer parts must group digits in threes after the first group.
fn valid_grouping(int_part: &str) -> bool {
    if !int_part.contains('.') {
        return true;
    }
    let mut groups = int_part.split('.');
    let first_ok = groups
        .next()
        .map(|g| (1..=3).contains(&g.len()))
        .unwrap_or(false);
    first_ok && groups.all(|g| g.len() == 3)
}

/// Format an amount as `R$ 1.234,56`.
pub fn format_brl_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let s = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = s.split_once('.').unwrap_or((s.as_str(), "00"));

    let chars: Vec<char> = integer_part.chars().collect();
    let mut formatted = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            formatted.push('.');
        }
        formatted.push(*c);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{}R$ {},{}", sign, formatted, decimal_part)
}
