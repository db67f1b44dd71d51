//! Card payment capture.
//!
//! The wallet only needs one thing from a card processor: charge an amount
//! against a client-supplied payment method token and report a capture id.

mod stripe;

pub use stripe::StripeGateway;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::PaymentsConfig;

/// A single capture attempt
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Minor units
    pub amount: i64,
    pub currency: String,
    /// Processor-side payment method token from the client
    pub payment_method: String,
    /// Forwarded to the processor so a retried call returns the original capture
    pub idempotency_key: Option<String>,
    pub user_id: String,
}

/// A successful capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Processor reference, stored as the ledger row's payment reference
    pub id: String,
    pub amount: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The processor refused or could not complete the charge
    #[error("{0}")]
    Declined(String),

    #[error("payment processor unreachable: {0}")]
    Transport(String),

    #[error("card payments are not configured")]
    NotConfigured,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> Result<Capture, PaymentError>;
}

/// Gateway used when no processor key is configured
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn capture(&self, _request: &CaptureRequest) -> Result<Capture, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
}

/// Build the gateway for the configured processor
pub fn from_config(config: &PaymentsConfig) -> Arc<dyn PaymentGateway> {
    match &config.stripe_secret_key {
        Some(key) if !key.is_empty() => {
            Arc::new(StripeGateway::new(key.clone(), config.stripe_api_base.clone()))
        }
        _ => {
            tracing::warn!("No Stripe key configured, card deposits are disabled");
            Arc::new(DisabledGateway)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGateway;
    use super::*;

    fn request() -> CaptureRequest {
        CaptureRequest {
            amount: 5000,
            currency: "inr".to_string(),
            payment_method: "pm_card_visa".to_string(),
            idempotency_key: None,
            user_id: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disabled_gateway_refuses() {
        let gateway = from_config(&PaymentsConfig::default());
        assert!(matches!(
            gateway.capture(&request()).await,
            Err(PaymentError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let gateway = ScriptedGateway::scripted(vec![
            Err("Your card was declined.".to_string()),
            Ok("pi_abc".to_string()),
        ]);

        let err = gateway.capture(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "Your card was declined.");

        let capture = gateway.capture(&request()).await.unwrap();
        assert_eq!(capture.id, "pi_abc");
        assert_eq!(capture.amount, 5000);
        assert_eq!(gateway.call_count(), 2);
    }
}
