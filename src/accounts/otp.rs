//! One-time codes for password and PIN resets.
//!
//! Codes live in the cache under `otp:{purpose}:{email}` with a ten minute
//! TTL, stored as a SHA-256 digest. Checking a code consumes it whether or
//! not it matches, so each issued code allows a single guess.

use crate::cache::{Cache, CacheKey, OtpPurpose};
use crate::crypto::{generate_otp, hash_token};

fn key(purpose: OtpPurpose, email: &str) -> CacheKey {
    CacheKey::Otp {
        purpose,
        email: email.trim().to_lowercase(),
    }
}

/// Issue a fresh code, replacing any outstanding one
pub async fn issue(cache: &Cache, purpose: OtpPurpose, email: &str) -> String {
    let code = generate_otp();
    cache.set_raw(&key(purpose, email), &hash_token(&code)).await;
    code
}

/// Check and consume a code
pub async fn consume(cache: &Cache, purpose: OtpPurpose, email: &str, code: &str) -> bool {
    match cache.take_raw(&key(purpose, email)).await {
        Some(digest) => digest == hash_token(code.trim()),
        None => false,
    }
}
