//! Money movement: PINs, transfers, deposits and payment requests.
//!
//! Every operation that changes more than one balance or ledger row runs in a
//! single SQLite transaction whose first statement is a write, so concurrent
//! writers are serialized by the database. Balance sufficiency is the
//! predicate of the debit itself (see [`User::debit`]). Caches are
//! invalidated only after commit, through [`Mutation`].

mod deposit;
mod error;
mod ledger;
mod pin;
mod profile;
mod requests;
mod transfer;

pub use deposit::{DepositInput, DepositMethod};
pub use error::WalletError;
pub use pin::validate_pin_format;
pub use profile::QrPayload;
pub use requests::{RequestAction, RequestOutcome, RequestTarget, SendRequestInput};
pub use transfer::TransferInput;

pub(crate) use error::is_unique_violation;

use std::sync::Arc;

use crate::api::metrics::record_wallet_operation;
use crate::cache::{Cache, Mutation};
use crate::db::{DbPool, User, MAX_AMOUNT};
use crate::notifications::Notifier;
use crate::payments::PaymentGateway;

/// Longest free-text reference stored on a ledger row or request
pub const MAX_REFERENCE_LEN: usize = 140;

/// Longest accepted client idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

#[derive(Clone)]
pub struct Wallet {
    db: DbPool,
    cache: Cache,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    currency: String,
}

impl Wallet {
    pub fn new(
        db: DbPool,
        cache: Cache,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        currency: String,
    ) -> Self {
        Self {
            db,
            cache,
            gateway,
            notifier,
            currency,
        }
    }

    async fn load_user(&self, id: &str) -> Result<User, WalletError> {
        User::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| WalletError::NotFound("User not found".to_string()))
    }

    async fn invalidate(&self, mutation: Mutation) {
        self.cache.invalidate(&mutation).await;
    }
}

fn validate_amount(amount: i64) -> Result<(), WalletError> {
    if amount <= 0 {
        return Err(WalletError::validation("amount", "Amount must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(WalletError::validation("amount", "Amount exceeds the maximum allowed"));
    }
    Ok(())
}

fn validate_reference(reference: &str) -> Result<String, WalletError> {
    let reference = reference.trim();
    if reference.chars().count() > MAX_REFERENCE_LEN {
        return Err(WalletError::validation(
            "reference",
            format!("Reference must be at most {} characters", MAX_REFERENCE_LEN),
        ));
    }
    Ok(reference.to_string())
}

/// Blank keys are treated as absent
fn normalize_idempotency_key(key: Option<String>) -> Result<Option<String>, WalletError> {
    let key = match key {
        Some(k) if !k.trim().is_empty() => k.trim().to_string(),
        _ => return Ok(None),
    };
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(WalletError::validation(
            "idempotency_key",
            format!("Idempotency key must be at most {} characters", MAX_IDEMPOTENCY_KEY_LEN),
        ));
    }
    Ok(Some(key))
}

fn record<T>(operation: &'static str, result: &Result<T, WalletError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    };
    record_wallet_operation(operation, outcome);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::crypto::hash_secret;
    use crate::db::{test_pool, AuthProvider, NewUser};
    use crate::notifications::testing::RecordingMailer;
    use crate::payments::testing::ScriptedGateway;

    pub struct Harness {
        pub wallet: Wallet,
        pub db: DbPool,
        pub cache: Cache,
        pub gateway: Arc<ScriptedGateway>,
        pub mailer: Arc<RecordingMailer>,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_gateway(ScriptedGateway::approving()).await
        }

        pub async fn with_gateway(gateway: ScriptedGateway) -> Self {
            let db = test_pool().await;
            let cache = Cache::in_memory();
            let gateway = Arc::new(gateway);
            let mailer = Arc::new(RecordingMailer::default());
            let wallet = Wallet::new(
                db.clone(),
                cache.clone(),
                gateway.clone(),
                Notifier::new(mailer.clone()),
                "inr".to_string(),
            );
            Self {
                wallet,
                db,
                cache,
                gateway,
                mailer,
            }
        }

        /// Verified local user with the given balance and optional PIN
        pub async fn user(&self, email: &str, balance: i64, pin: Option<&str>) -> User {
            let user = User::insert(
                &self.db,
                &NewUser {
                    first_name: email.split('@').next().unwrap_or("user").to_string(),
                    last_name: "Tester".to_string(),
                    email: email.to_string(),
                    password_hash: Some(hash_secret("password1").unwrap()),
                    auth_provider: AuthProvider::Local,
                    google_id: None,
                    is_verified: true,
                    is_admin: false,
                },
            )
            .await
            .unwrap();
            if balance > 0 {
                assert!(User::credit(&self.db, &user.id, balance).await.unwrap());
            }
            if let Some(pin) = pin {
                User::set_pin_hash(&self.db, &user.id, &hash_secret(pin).unwrap())
                    .await
                    .unwrap();
            }
            User::find_by_id(&self.db, &user.id).await.unwrap().unwrap()
        }

        pub async fn balance(&self, user_id: &str) -> i64 {
            User::find_by_id(&self.db, user_id).await.unwrap().unwrap().balance
        }

        pub async fn ledger_rows(&self) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
                .fetch_one(&self.db)
                .await
                .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_bounds() {
        assert!(validate_amount(1).is_ok());
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-5).is_err());
        assert!(validate_amount(MAX_AMOUNT + 1).is_err());
    }

    #[test]
    fn test_reference_length() {
        assert_eq!(validate_reference("  lunch ").unwrap(), "lunch");
        assert!(validate_reference(&"x".repeat(MAX_REFERENCE_LEN)).is_ok());
        assert!(validate_reference(&"x".repeat(MAX_REFERENCE_LEN + 1)).is_err());
    }

    #[test]
    fn test_idempotency_key_normalization() {
        assert_eq!(normalize_idempotency_key(None).unwrap(), None);
        assert_eq!(normalize_idempotency_key(Some("  ".into())).unwrap(), None);
        assert_eq!(
            normalize_idempotency_key(Some(" k1 ".into())).unwrap().as_deref(),
            Some("k1")
        );
        assert!(normalize_idempotency_key(Some("k".repeat(65))).is_err());
    }
}
