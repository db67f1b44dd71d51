//! Input validation for API requests.
//!
//! Each function returns `Err(message)` suitable for a field entry in a
//! validation error. Collect several with `ValidationErrorBuilder` from the
//! `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::to_minor_units;

lazy_static! {
    /// Pragmatic email shape check: local@domain.tld
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$"
    ).unwrap();

    /// Indian Financial System Code: 4 letters, a zero, 6 alphanumerics
    static ref IFSC_REGEX: Regex = Regex::new(r"^[A-Za-z]{4}0[A-Za-z0-9]{6}$").unwrap();

    /// UPI virtual payment address, e.g. name@bank
    static ref UPI_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._-]{2,256}@[A-Za-z][A-Za-z0-9]{1,63}$").unwrap();

    static ref ACCOUNT_NUMBER_REGEX: Regex = Regex::new(r"^[0-9]{9,18}$").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 50;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// At least 8 characters with a letter and a digit
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password is too long (max {} characters)",
            MAX_PASSWORD_LEN
        ));
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str, label: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{} is required", label));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("{} is too long (max {} characters)", label, MAX_NAME_LEN));
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Decimal amount from a request body, converted to minor units
pub fn validate_amount(amount: f64) -> Result<i64, String> {
    to_minor_units(amount)
}

pub fn validate_ifsc(ifsc: &str) -> Result<(), String> {
    if ifsc.trim().is_empty() {
        return Err("IFSC code is required".to_string());
    }
    if !IFSC_REGEX.is_match(ifsc.trim()) {
        return Err("Invalid IFSC code format".to_string());
    }
    Ok(())
}

pub fn validate_upi_id(upi_id: &str) -> Result<(), String> {
    if upi_id.trim().is_empty() {
        return Err("UPI ID is required".to_string());
    }
    if !UPI_REGEX.is_match(upi_id.trim()) {
        return Err("Invalid UPI ID format".to_string());
    }
    Ok(())
}

pub fn validate_account_number(number: &str) -> Result<(), String> {
    if number.trim().is_empty() {
        return Err("Account number is required".to_string());
    }
    if !ACCOUNT_NUMBER_REGEX.is_match(number.trim()) {
        return Err("Account number must be 9 to 18 digits".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("first.last+tag@mail.example.co").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("user@@example.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("hunter22").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("1234567890").is_err());
        assert!(validate_password(&"a1".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Asha", "First name").is_ok());
        assert_eq!(
            validate_name("  ", "First name").unwrap_err(),
            "First name is required"
        );
        assert!(validate_name(&"x".repeat(51), "Last name").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "receiver_id").is_ok());
        assert!(validate_uuid("", "receiver_id").is_err());
        assert!(validate_uuid("not-a-uuid", "receiver_id").is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert_eq!(validate_amount(12.34), Ok(1234));
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(0.001).is_err());
    }

    #[test]
    fn test_validate_bank_details() {
        assert!(validate_ifsc("HDFC0001234").is_ok());
        assert!(validate_ifsc("hdfc0001234").is_ok());
        assert!(validate_ifsc("HDFC1001234").is_err());
        assert!(validate_ifsc("").is_err());

        assert!(validate_account_number("123456789012").is_ok());
        assert!(validate_account_number("12345").is_err());
        assert!(validate_account_number("12345abc9012").is_err());
    }

    #[test]
    fn test_validate_upi_id() {
        assert!(validate_upi_id("asha.rao@okhdfc").is_ok());
        assert!(validate_upi_id("9876543210@ybl").is_ok());
        assert!(validate_upi_id("missing-handle").is_err());
        assert!(validate_upi_id("a@1bank").is_err());
    }
}
