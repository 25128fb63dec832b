//! Phone normalization to E.164
//!
//! US-centric: ten digits get a `+1` country code, eleven digits with a
//! leading 1 get a `+`. Anything that cannot be interpreted as a NANP
//! number is passed through untouched so the DQ evaluator can flag it
//! instead of the data silently disappearing.

/// Normalize a phone number to E.164 (`+1XXXXXXXXXX`) where possible.
/// Empty input reduces to `None`; unrecognizable input passes through.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 => Some(format!("+1{}", digits)),
        11 if digits.starts_with('1') => Some(format!("+{}", digits)),
        n if n > 11 => Some(format!("+{}", digits)),
        _ => Some(trimmed.to_string()),
    }
}

/// True when a (normalized) phone is a plausible NANP number:
/// `+1` followed by exactly ten digits, the first of which is 2-9.
pub fn is_valid_nanp(phone: &str) -> bool {
    let Some(rest) = phone.strip_prefix("+1") else {
        return false;
    };
    rest.len() == 10
        && rest.chars().all(|c| c.is_ascii_digit())
        && rest.chars().next().is_some_and(|c| ('2'..='9').contains(&c))
}
