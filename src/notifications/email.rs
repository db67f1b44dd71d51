//! SMTP delivery for account and wallet emails.
//!
//! Uses the SMTP settings from the main config file. When SMTP is not
//! configured, messages are logged and dropped.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{Mailer, OutgoingEmail};
use crate::config::EmailConfig;

/// Sends email through the configured SMTP relay
pub struct SystemEmailService {
    config: EmailConfig,
}

impl SystemEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = email.to.parse()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )?;
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SystemEmailService {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(to = %email.to, subject = %email.subject, "Email not configured, skipping");
            return Ok(());
        }

        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;

        let message = self.build_message(email)?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(message).await?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> EmailConfig {
        EmailConfig {
            smtp_host: Some("smtp.example.com".to_string()),
            from_address: Some("no-reply@transacto.app".to_string()),
            ..EmailConfig::default()
        }
    }

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            subject: "Hello".to_string(),
            text_body: "text".to_string(),
            html_body: "<p>html</p>".to_string(),
        }
    }

    #[test]
    fn test_enabled_only_when_configured() {
        assert!(!SystemEmailService::new(EmailConfig::default()).is_enabled());
        assert!(SystemEmailService::new(configured()).is_enabled());
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let service = SystemEmailService::new(configured());
        assert!(service.build_message(&email("asha@example.com")).is_ok());
        assert!(service.build_message(&email("not an address")).is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_delivery_is_a_noop() {
        let service = SystemEmailService::new(EmailConfig::default());
        service.deliver(&email("asha@example.com")).await.unwrap();
    }
}
