//! Outbound user notifications.
//!
//! Wallet operations describe what happened as a [`WalletEvent`]; the
//! [`Notifier`] renders it and hands it to a [`Mailer`] on a background task.
//! Delivery failures are logged and never reach the caller.

pub mod email;

pub use email::SystemEmailService;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::db::to_major_units;

/// A rendered email ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum WalletEvent {
    VerifyEmail {
        email: String,
        name: String,
        link: String,
    },
    PasswordResetCode {
        email: String,
        code: String,
    },
    PinResetCode {
        email: String,
        code: String,
    },
    TransferReceived {
        email: String,
        sender_name: String,
        amount: i64,
        reference: String,
    },
    RequestReceived {
        email: String,
        requester_name: String,
        amount: i64,
        reference: String,
    },
    RequestSettled {
        email: String,
        payer_name: String,
        amount: i64,
        accepted: bool,
    },
    DepositCredited {
        email: String,
        amount: i64,
    },
}

fn money(amount: i64) -> String {
    format!("{:.2}", to_major_units(amount))
}

impl WalletEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WalletEvent::VerifyEmail { .. } => "verify_email",
            WalletEvent::PasswordResetCode { .. } => "password_reset",
            WalletEvent::PinResetCode { .. } => "pin_reset",
            WalletEvent::TransferReceived { .. } => "transfer_received",
            WalletEvent::RequestReceived { .. } => "request_received",
            WalletEvent::RequestSettled { .. } => "request_settled",
            WalletEvent::DepositCredited { .. } => "deposit_credited",
        }
    }

    fn recipient(&self) -> &str {
        match self {
            WalletEvent::VerifyEmail { email, .. }
            | WalletEvent::PasswordResetCode { email, .. }
            | WalletEvent::PinResetCode { email, .. }
            | WalletEvent::TransferReceived { email, .. }
            | WalletEvent::RequestReceived { email, .. }
            | WalletEvent::RequestSettled { email, .. }
            | WalletEvent::DepositCredited { email, .. } => email,
        }
    }

    /// Subject line and plain-text body
    fn content(&self) -> (String, String) {
        match self {
            WalletEvent::VerifyEmail { name, link, .. } => (
                "Verify your Transacto account".to_string(),
                format!(
                    "Hi {},\n\nConfirm your email address to activate your wallet:\n{}\n\nThe link expires in 24 hours.",
                    name, link
                ),
            ),
            WalletEvent::PasswordResetCode { code, .. } => (
                "Your password reset code".to_string(),
                format!(
                    "Use this code to reset your Transacto password: {}\n\nIt expires in 10 minutes. If you did not ask for this, ignore this email.",
                    code
                ),
            ),
            WalletEvent::PinResetCode { code, .. } => (
                "Your PIN reset code".to_string(),
                format!(
                    "Use this code to reset your transaction PIN: {}\n\nIt expires in 10 minutes. If you did not ask for this, secure your account.",
                    code
                ),
            ),
            WalletEvent::TransferReceived {
                sender_name,
                amount,
                reference,
                ..
            } => (
                format!("You received {}", money(*amount)),
                format!(
                    "{} sent you {}.\nReference: {}",
                    sender_name,
                    money(*amount),
                    reference
                ),
            ),
            WalletEvent::RequestReceived {
                requester_name,
                amount,
                reference,
                ..
            } => (
                format!("{} requested {}", requester_name, money(*amount)),
                format!(
                    "{} is requesting {} from you.\nReference: {}\n\nOpen Transacto to accept or reject it.",
                    requester_name,
                    money(*amount),
                    reference
                ),
            ),
            WalletEvent::RequestSettled {
                payer_name,
                amount,
                accepted,
                ..
            } => {
                let verb = if *accepted { "accepted" } else { "rejected" };
                (
                    format!("Your request was {}", verb),
                    format!(
                        "{} {} your request for {}.",
                        payer_name,
                        verb,
                        money(*amount)
                    ),
                )
            }
            WalletEvent::DepositCredited { amount, .. } => (
                "Deposit credited".to_string(),
                format!("{} has been added to your wallet.", money(*amount)),
            ),
        }
    }

    pub fn render(&self) -> OutgoingEmail {
        let (subject, text_body) = self.content();
        let html_body = format!(
            "<!DOCTYPE html><html><body style=\"font-family: sans-serif\"><h2>{}</h2>{}</body></html>",
            escape_html(&subject),
            text_body
                .split("\n\n")
                .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
                .collect::<String>()
        );
        OutgoingEmail {
            to: self.recipient().to_string(),
            subject,
            text_body,
            html_body,
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Fire-and-forget dispatcher
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Render and deliver on a background task
    pub fn notify(&self, event: WalletEvent) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            let email = event.render();
            if let Err(e) = mailer.deliver(&email).await {
                tracing::warn!(
                    kind = event.kind(),
                    to = %email.to,
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        });
    }
}

/// Mailer that records instead of sending, for tests
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }

        /// Wait for a background delivery to `to` whose subject contains `subject`
        pub async fn wait_for(&self, to: &str, subject: &str) -> OutgoingEmail {
            for _ in 0..200 {
                if let Some(email) = self
                    .sent()
                    .into_iter()
                    .rev()
                    .find(|e| e.to == to && e.subject.contains(subject))
                {
                    return email;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no email to {} matching {:?}", to, subject);
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    /// First run of six digits in a rendered body
    pub fn extract_code(email: &OutgoingEmail) -> String {
        email
            .text_body
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 6)
            .map(str::to_string)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{extract_code, RecordingMailer};
    use super::*;

    #[test]
    fn test_render_transfer_received() {
        let email = WalletEvent::TransferReceived {
            email: "b@x.io".to_string(),
            sender_name: "Asha Rao".to_string(),
            amount: 30000,
            reference: "lunch <3".to_string(),
        }
        .render();

        assert_eq!(email.to, "b@x.io");
        assert_eq!(email.subject, "You received 300.00");
        assert!(email.text_body.contains("Asha Rao sent you 300.00"));
        assert!(email.html_body.contains("lunch &lt;3"));
    }

    #[tokio::test]
    async fn test_notify_delivers_in_background() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone());

        notifier.notify(WalletEvent::PinResetCode {
            email: "a@x.io".to_string(),
            code: "042137".to_string(),
        });

        let email = mailer.wait_for("a@x.io", "PIN reset").await;
        assert_eq!(extract_code(&email), "042137");
    }
}
