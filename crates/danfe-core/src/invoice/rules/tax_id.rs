//! CNPJ and CPF validation and formatting.

/// Keep only ASCII digits.
pub fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Validate a CNPJ or CPF, dispatching on length.
pub fn validate_tax_id(raw: &str) -> bool {
    let digits = only_digits(raw);
    match digits.len() {
        14 => validate_cnpj(&digits),
        11 => validate_cpf(&digits),
        _ => false,
    }
}

fn to_digits(s: &str) -> Vec<u32> {
    s.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

/// Compute the two CNPJ check digits for a 12-digit base.
///
/// Weights 5,4,3,2,9,8,7,6,5,4,3,2 for the first digit and
/// 6,5,4,3,2,9,8,7,6,5,4,3,2 for the second; a remainder below 2 yields 0.
pub fn cnpj_check_digits(base: &[u32]) -> (u32, u32) {
    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let dv = |sum: u32| {
        let r = sum % 11;
        if r < 2 { 0 } else { 11 - r }
    };

    let s1: u32 = base.iter().zip(W1.iter()).map(|(d, w)| d * w).sum();
    let dv1 = dv(s1);
    let s2: u32 = base
        .iter()
        .chain(std::iter::once(&dv1))
        .zip(W2.iter())
        .map(|(d, w)| d * w)
        .sum();
    (dv1, dv(s2))
}

/// Validate a 14-digit CNPJ.
pub fn validate_cnpj(cnpj: &str) -> bool {
    let digits = to_digits(cnpj);
    if digits.len() != 14 || all_same(&digits) {
        return false;
    }
    let (dv1, dv2) = cnpj_check_digits(&digits[..12]);
    dv1 == digits[12] && dv2 == digits[13]
}

/// Validate an 11-digit CPF.
pub fn validate_cpf(cpf: &str) -> bool {
    let digits = to_digits(cpf);
    if digits.len() != 11 || all_same(&digits) {
        return false;
    }

    let dv = |len: usize| {
        let sum: u32 = digits
            .iter()
            .take(len)
            .enumerate()
            .map(|(i, d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let r = (sum * 10) % 11;
        if r == 10 { 0 } else { r }
    };

    dv(9) == digits[9] && dv(10) == digits[10]
}

/// Head-office form of a CNPJ: same 8-digit root, branch `0001`, recomputed check digits.
///
/// Registries answer per company, so branches share the head-office lookup.
/// Inputs that are not 14 digits are returned as bare digits unchanged.
pub fn cnpj_head_office(cnpj: &str) -> String {
    let digits = only_digits(cnpj);
    if digits.len() != 14 {
        return digits;
    }
    let base12 = format!("{}0001", &digits[..8]);
    let (dv1, dv2) = cnpj_check_digits(&to_digits(&base12));
    format!("{}{}{}", base12, dv1, dv2)
}

/// Format a CNPJ as `00.000.000/0000-00`.
pub fn format_cnpj(cnpj: &str) -> String {
    let d = only_digits(cnpj);
    if d.len() != 14 {
        return cnpj.to_string();
    }
    format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
}

/// Format a CPF as `000.000.000-00`.
pub fn format_cpf(cpf: &str) -> String {
    let d = only_digits(cpf);
    if d.len() != 11 {
        return cpf.to_string();
    }
    format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
}
