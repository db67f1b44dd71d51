//! Stripe PaymentIntents client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Capture, CaptureRequest, PaymentError, PaymentGateway};

pub struct StripeGateway {
    secret_key: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    amount: i64,
    last_payment_error: Option<StripeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl StripeErrorBody {
    fn describe(self) -> String {
        self.message
            .or(self.code)
            .unwrap_or_else(|| "Payment failed".to_string())
    }
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String) -> Self {
        Self {
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn form(request: &CaptureRequest) -> Vec<(&'static str, String)> {
        vec![
            ("amount", request.amount.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("payment_method", request.payment_method.clone()),
            ("confirm", "true".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("automatic_payment_methods[allow_redirects]", "never".to_string()),
            ("metadata[user_id]", request.user_id.clone()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn capture(&self, request: &CaptureRequest) -> Result<Capture, PaymentError> {
        let url = format!("{}/v1/payment_intents", self.api_base);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&Self::form(request));
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", format!("{}:{}", request.user_id, key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<StripeErrorEnvelope>().await {
                Ok(envelope) => envelope.error.describe(),
                Err(_) => format!("Payment processor returned {}", status),
            };
            warn!(user_id = %request.user_id, status = %status, "Card capture rejected");
            return Err(PaymentError::Declined(message));
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| PaymentError::Transport(format!("invalid response: {}", e)))?;

        if intent.status != "succeeded" {
            let message = intent
                .last_payment_error
                .map(StripeErrorBody::describe)
                .unwrap_or_else(|| format!("Payment not completed (status: {})", intent.status));
            return Err(PaymentError::Declined(message));
        }

        debug!(payment_intent = %intent.id, amount = intent.amount, "Card capture succeeded");
        Ok(Capture {
            id: intent.id,
            amount: intent.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields() {
        let request = CaptureRequest {
            amount: 125050,
            currency: "INR".to_string(),
            payment_method: "pm_123".to_string(),
            idempotency_key: None,
            user_id: "u1".to_string(),
        };
        let form = StripeGateway::form(&request);
        assert!(form.contains(&("amount", "125050".to_string())));
        assert!(form.contains(&("currency", "inr".to_string())));
        assert!(form.contains(&("confirm", "true".to_string())));
        assert!(form.contains(&("metadata[user_id]", "u1".to_string())));
    }

    #[test]
    fn test_error_description_prefers_message() {
        let body: StripeErrorEnvelope = serde_json::from_str(
            r#"{"error":{"message":"Your card was declined.","code":"card_declined"}}"#,
        )
        .unwrap();
        assert_eq!(body.error.describe(), "Your card was declined.");

        let body: StripeErrorEnvelope =
            serde_json::from_str(r#"{"error":{"code":"card_declined"}}"#).unwrap();
        assert_eq!(body.error.describe(), "card_declined");
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let gateway = StripeGateway::new("sk_test".into(), "https://api.stripe.com/".into());
        assert_eq!(gateway.api_base, "https://api.stripe.com");
    }
}
