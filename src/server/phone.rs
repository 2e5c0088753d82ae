//! Phone number normalization
//!
//! Every number the service stores or matches on is in the form
//! `+<country code> <national number>`, e.g. `+91 5551234567`.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PhoneError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number too short: {0}")]
    TooShort(String),

    #[error("Invalid default country code: {0}")]
    InvalidCountryCode(String),
}

const NATIONAL_DIGITS: usize = 10;
const MIN_DIGITS: usize = 7;

/// Normalize a raw number, applying `default_country_code` when none is given.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let default_cc: String = default_country_code
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if default_cc.is_empty() {
        return Err(PhoneError::InvalidCountryCode(default_country_code.to_string()));
    }

    let trimmed = raw.trim();
    let (international, body) = if let Some(rest) = trimmed.strip_prefix('+') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        (true, rest)
    } else {
        (false, trimmed)
    };

    let groups: Vec<&str> = body
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .collect();
    let digits: String = groups.concat();

    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }
    if digits.len() < MIN_DIGITS {
        return Err(PhoneError::TooShort(raw.to_string()));
    }

    if international {
        // A separator after a short leading group marks the country code.
        if groups.len() > 1 && groups[0].len() <= 3 {
            return Ok(format!("+{} {}", groups[0], groups[1..].concat()));
        }
        if digits.len() > NATIONAL_DIGITS {
            let split = digits.len() - NATIONAL_DIGITS;
            return Ok(format!("+{} {}", &digits[..split], &digits[split..]));
        }
        return Ok(format!("+{}", digits));
    }

    let national = if digits.len() == NATIONAL_DIGITS + 1 && digits.starts_with('0') {
        &digits[1..]
    } else if digits.len() == default_cc.len() + NATIONAL_DIGITS && digits.starts_with(&default_cc) {
        &digits[default_cc.len()..]
    } else {
        digits.as_str()
    };

    Ok(format!("+{} {}", default_cc, national))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_country_code_applied() {
        assert_eq!(normalize_phone("5551234567", "+91").unwrap(), "+91 5551234567");
    }

    #[test]
    fn test_formatted_number_round_trips() {
        assert_eq!(normalize_phone("+91 5551234567", "+91").unwrap(), "+91 5551234567");
        let once = normalize_phone("+1 (555) 123-4567", "+91").unwrap();
        assert_eq!(once, "+1 5551234567");
        assert_eq!(normalize_phone(&once, "+91").unwrap(), once);
    }

    #[test]
    fn test_compact_international_number_is_split() {
        assert_eq!(normalize_phone("+915551234567", "+91").unwrap(), "+91 5551234567");
        assert_eq!(normalize_phone("00915551234567", "+91").unwrap(), "+91 5551234567");
    }

    #[test]
    fn test_national_variants() {
        assert_eq!(normalize_phone("05551234567", "+91").unwrap(), "+91 5551234567");
        assert_eq!(normalize_phone("915551234567", "+91").unwrap(), "+91 5551234567");
        assert_eq!(normalize_phone(" 555-123-4567 ", "91").unwrap(), "+91 5551234567");
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(normalize_phone("", "+91"), Err(PhoneError::Empty));
        assert_eq!(normalize_phone("call me", "+91"), Err(PhoneError::Empty));
        assert!(matches!(normalize_phone("12345", "+91"), Err(PhoneError::TooShort(_))));
        assert!(matches!(normalize_phone("5551234567", ""), Err(PhoneError::InvalidCountryCode(_))));
    }
}
