//! Google ID token verification through the tokeninfo endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

/// The identity asserted by a verified Google ID token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    /// Google's stable account id (`sub`)
    pub subject: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("Google sign-in is not configured")]
    NotConfigured,

    #[error("invalid Google token: {0}")]
    Invalid(String),

    #[error("could not reach Google: {0}")]
    Transport(String),
}

#[async_trait]
pub trait GoogleVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError>;
}

/// Fields of the tokeninfo response we rely on. Google returns booleans as strings.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    email_verified: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    name: Option<String>,
}

impl TokenInfo {
    fn into_identity(self, client_id: &str) -> Result<GoogleIdentity, GoogleError> {
        if self.aud != client_id {
            return Err(GoogleError::Invalid("token was issued for another client".to_string()));
        }
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GoogleError::Invalid("token carries no email".to_string()))?;
        if self.email_verified.as_deref() != Some("true") {
            return Err(GoogleError::Invalid("email is not verified with Google".to_string()));
        }

        let (first_name, last_name) = match (self.given_name, self.family_name) {
            (Some(given), family) => (given, family.unwrap_or_default()),
            (None, _) => {
                let full = self.name.unwrap_or_else(|| email.clone());
                let mut parts = full.splitn(2, ' ');
                let first = parts.next().unwrap_or_default().to_string();
                (first, parts.next().unwrap_or_default().to_string())
            }
        };

        Ok(GoogleIdentity {
            subject: self.sub,
            email,
            first_name,
            last_name,
        })
    }
}

pub struct TokenInfoVerifier {
    client_id: Option<String>,
    tokeninfo_url: String,
    client: reqwest::Client,
}

impl TokenInfoVerifier {
    pub fn new(client_id: Option<String>, tokeninfo_url: String) -> Self {
        Self {
            client_id: client_id.filter(|id| !id.is_empty()),
            tokeninfo_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GoogleVerifier for TokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
        let client_id = self.client_id.as_deref().ok_or(GoogleError::NotConfigured)?;

        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| GoogleError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Google rejected ID token");
            return Err(GoogleError::Invalid("token was rejected".to_string()));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| GoogleError::Transport(e.to_string()))?;
        info.into_identity(client_id)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Accepts `valid:{sub}:{email}` tokens and rejects everything else
    pub struct FakeGoogle;

    #[async_trait]
    impl GoogleVerifier for FakeGoogle {
        async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
            let mut parts = id_token.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("valid"), Some(sub), Some(email)) => Ok(GoogleIdentity {
                    subject: sub.to_string(),
                    email: email.to_string(),
                    first_name: "Google".to_string(),
                    last_name: "User".to_string(),
                }),
                _ => Err(GoogleError::Invalid("bad token".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: &str) -> TokenInfo {
        TokenInfo {
            aud: aud.to_string(),
            sub: "1234".to_string(),
            email: Some("g@x.io".to_string()),
            email_verified: Some("true".to_string()),
            given_name: None,
            family_name: None,
            name: Some("Grace Hopper".to_string()),
        }
    }

    #[test]
    fn test_audience_must_match() {
        assert!(matches!(
            info("someone-else").into_identity("ours"),
            Err(GoogleError::Invalid(_))
        ));
        let identity = info("ours").into_identity("ours").unwrap();
        assert_eq!(identity.subject, "1234");
        assert_eq!(identity.first_name, "Grace");
        assert_eq!(identity.last_name, "Hopper");
    }

    #[test]
    fn test_unverified_email_is_rejected() {
        let mut unverified = info("ours");
        unverified.email_verified = Some("false".to_string());
        assert!(unverified.into_identity("ours").is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_verifier_refuses() {
        let verifier = TokenInfoVerifier::new(None, "http://127.0.0.1:1/tokeninfo".to_string());
        assert!(matches!(
            verifier.verify("anything").await,
            Err(GoogleError::NotConfigured)
        ));
    }
}
