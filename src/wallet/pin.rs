//! Transaction PIN checks and management.

use tracing::info;

use super::{Wallet, WalletError};
use crate::accounts::otp;
use crate::cache::{Mutation, OtpPurpose};
use crate::crypto::{hash_secret, verify_secret};
use crate::db::User;
use crate::notifications::WalletEvent;

pub const PIN_MIN_LEN: usize = 4;
pub const PIN_MAX_LEN: usize = 6;

/// A PIN is 4 to 6 ASCII digits
pub fn validate_pin_format(pin: &str) -> Result<(), WalletError> {
    let valid = (PIN_MIN_LEN..=PIN_MAX_LEN).contains(&pin.len())
        && pin.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(WalletError::validation(
            "pin",
            format!("PIN must be {} to {} digits", PIN_MIN_LEN, PIN_MAX_LEN),
        ));
    }
    Ok(())
}

impl Wallet {
    /// Check a PIN against the stored hash. Read-only.
    pub async fn verify_pin(&self, user_id: &str, pin: &str) -> Result<(), WalletError> {
        let user = self.load_user(user_id).await?;
        let hash = user.pin_hash.as_deref().ok_or(WalletError::PinNotSet)?;
        if !verify_secret(pin, hash) {
            return Err(WalletError::InvalidPin);
        }
        Ok(())
    }

    /// Set the first PIN for an account that has none
    pub async fn set_pin(&self, user_id: &str, pin: &str) -> Result<(), WalletError> {
        validate_pin_format(pin)?;
        let hash = hash_secret(pin)?;
        if !User::set_initial_pin_hash(&self.db, user_id, &hash).await? {
            self.load_user(user_id).await?;
            return Err(WalletError::Conflict(
                "A PIN is already set. Use change PIN instead".to_string(),
            ));
        }
        info!(user_id = %user_id, "Transaction PIN set");
        self.invalidate(Mutation::ProfileUpdated { user_id: user_id.to_string() }).await;
        Ok(())
    }

    pub async fn change_pin(
        &self,
        user_id: &str,
        current_pin: &str,
        new_pin: &str,
    ) -> Result<(), WalletError> {
        validate_pin_format(new_pin)?;
        self.verify_pin(user_id, current_pin).await?;
        let hash = hash_secret(new_pin)?;
        User::set_pin_hash(&self.db, user_id, &hash).await?;
        info!(user_id = %user_id, "Transaction PIN changed");
        Ok(())
    }

    /// Email a PIN reset code. Unknown addresses succeed silently.
    pub async fn forgot_pin(&self, email: &str) -> Result<(), WalletError> {
        let Some(user) = User::find_by_email(&self.db, email).await? else {
            return Ok(());
        };
        let code = otp::issue(&self.cache, OtpPurpose::PinReset, &user.email).await;
        self.notifier.notify(WalletEvent::PinResetCode {
            email: user.email,
            code,
        });
        Ok(())
    }

    pub async fn reset_pin(&self, email: &str, code: &str, new_pin: &str) -> Result<(), WalletError> {
        validate_pin_format(new_pin)?;
        let invalid = || WalletError::validation("otp", "Invalid or expired code");
        if !otp::consume(&self.cache, OtpPurpose::PinReset, email, code).await {
            return Err(invalid());
        }
        let user = User::find_by_email(&self.db, email).await?.ok_or_else(invalid)?;
        let hash = hash_secret(new_pin)?;
        User::set_pin_hash(&self.db, &user.id, &hash).await?;
        info!(user_id = %user.id, "Transaction PIN reset");
        self.invalidate(Mutation::ProfileUpdated { user_id: user.id }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::testing::extract_code;
    use crate::wallet::testing::Harness;

    #[test]
    fn test_pin_format() {
        assert!(validate_pin_format("1234").is_ok());
        assert!(validate_pin_format("123456").is_ok());
        assert!(validate_pin_format("123").is_err());
        assert!(validate_pin_format("1234567").is_err());
        assert!(validate_pin_format("12a4").is_err());
        assert!(validate_pin_format("١٢٣٤").is_err());
    }

    #[tokio::test]
    async fn test_verify_pin_outcomes() {
        let h = Harness::new().await;
        let with_pin = h.user("a@x.io", 0, Some("1234")).await;
        let without_pin = h.user("b@x.io", 0, None).await;

        assert!(h.wallet.verify_pin(&with_pin.id, "1234").await.is_ok());
        assert!(matches!(
            h.wallet.verify_pin(&with_pin.id, "9999").await,
            Err(WalletError::InvalidPin)
        ));
        assert!(matches!(
            h.wallet.verify_pin(&without_pin.id, "1234").await,
            Err(WalletError::PinNotSet)
        ));
        assert!(matches!(
            h.wallet.verify_pin("missing", "1234").await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_pin_only_once() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, None).await;

        h.wallet.set_pin(&user.id, "4321").await.unwrap();
        assert!(h.wallet.verify_pin(&user.id, "4321").await.is_ok());
        assert!(matches!(
            h.wallet.set_pin(&user.id, "1111").await,
            Err(WalletError::Conflict(_))
        ));
        assert!(matches!(
            h.wallet.set_pin("missing", "1111").await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_change_pin_requires_current() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        assert!(matches!(
            h.wallet.change_pin(&user.id, "0000", "5678").await,
            Err(WalletError::InvalidPin)
        ));
        h.wallet.change_pin(&user.id, "1234", "5678").await.unwrap();
        assert!(h.wallet.verify_pin(&user.id, "5678").await.is_ok());
    }

    #[tokio::test]
    async fn test_pin_reset_via_emailed_code() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        h.wallet.forgot_pin("A@x.io").await.unwrap();
        let email = h.mailer.wait_for("a@x.io", "PIN reset").await;
        let code = extract_code(&email);

        h.wallet.reset_pin("a@x.io", &code, "8888").await.unwrap();
        assert!(h.wallet.verify_pin(&user.id, "8888").await.is_ok());

        // Codes are single use
        assert!(matches!(
            h.wallet.reset_pin("a@x.io", &code, "9999").await,
            Err(WalletError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_forgot_pin_unknown_email_is_silent() {
        let h = Harness::new().await;
        h.wallet.forgot_pin("nobody@x.io").await.unwrap();
        assert!(h.mailer.sent().is_empty());
    }
}
