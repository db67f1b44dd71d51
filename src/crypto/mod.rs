//! Hashing and random secret generation for credentials.
//!
//! Passwords and transaction PINs are stored as Argon2 PHC strings. One-time
//! codes and email verification tokens are random; verification tokens are only
//! ever stored as their SHA-256 digest.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of digits in a one-time code
pub const OTP_DIGITS: usize = 6;

/// Hashing parameters. Verification reads them back from the stored hash.
#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

#[cfg(test)]
fn hasher() -> Argon2<'static> {
    let params = argon2::Params::new(1024, 1, 1, None).unwrap_or_default();
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
}

/// Hash a password or PIN using Argon2
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = hasher();
    let hash = argon2.hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password or PIN against a stored hash.
///
/// Malformed hashes verify as false.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    hasher()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a zero-padded numeric one-time code
pub fn generate_otp() -> String {
    let mut rng = rand::rng();
    let code: u32 = rng.random_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_DIGITS)
}

/// Generate a random URL-safe token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_secret("1234").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_secret("1234", &hash));
        assert!(!verify_secret("4321", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_secret("1234").unwrap(), hash_secret("1234").unwrap());
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        assert!(!verify_secret("1234", "not-a-hash"));
        assert!(!verify_secret("1234", ""));
    }

    #[test]
    fn test_otp_format() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), OTP_DIGITS);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_token_and_digest() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());

        let digest = hash_token(&token);
        assert_eq!(digest, hash_token(&token));
        assert_ne!(digest, token);
    }
}
