//! Signed bearer tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub admin: bool,
}

/// HS256 signer and verifier for session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            admin: user.is_admin,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Decode and check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(admin: bool) -> User {
        User {
            id: "u-1".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            email: "a@x.io".to_string(),
            password_hash: None,
            auth_provider: "local".to_string(),
            google_id: None,
            pin_hash: None,
            balance: 0,
            is_verified: true,
            is_admin: admin,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_issue_then_verify() {
        let issuer = TokenIssuer::new("secret", 24);
        let token = issuer.issue(&user(true)).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert!(claims.admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = TokenIssuer::new("secret", 24).issue(&user(false)).unwrap();
        assert!(TokenIssuer::new("other", 24).verify(&token).is_err());
        assert!(TokenIssuer::new("secret", 24).verify("not-a-token").is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = TokenIssuer::new("secret", 24);
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: "u-1".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            admin: false,
        };
        let token = encode(&Header::default(), &stale, &issuer.encoding).unwrap();
        assert!(issuer.verify(&token).is_err());
    }
}
