//! Adding money to a wallet.
//!
//! Card deposits are captured synchronously and credited in the same database
//! transaction that records them. Bank transfer and UPI deposits are recorded
//! as pending and credited later by [`Wallet::settle_deposit`]. A card capture
//! whose credit fails to commit is kept the same way, as a pending deposit
//! carrying the processor reference.

use tracing::{error, info, warn};

use super::{
    is_unique_violation, normalize_idempotency_key, record, validate_amount, validate_reference,
    Wallet, WalletError,
};
use crate::cache::Mutation;
use crate::db::{
    NewTransaction, PaymentMethod, Transaction, TransactionKind, TransactionResponse,
    TransactionStatus, User,
};
use crate::notifications::WalletEvent;
use crate::payments::CaptureRequest;

#[derive(Debug, Clone)]
pub enum DepositMethod {
    Card {
        /// Processor payment method token
        payment_method: String,
    },
    BankTransfer {
        account_number: String,
        ifsc: String,
        account_holder: String,
    },
    Upi {
        upi_id: String,
    },
}

impl DepositMethod {
    fn payment_method(&self) -> PaymentMethod {
        match self {
            DepositMethod::Card { .. } => PaymentMethod::Card,
            DepositMethod::BankTransfer { .. } => PaymentMethod::BankTransfer,
            DepositMethod::Upi { .. } => PaymentMethod::Upi,
        }
    }

    fn default_reference(&self) -> &'static str {
        match self {
            DepositMethod::Card { .. } => "Card deposit",
            DepositMethod::BankTransfer { .. } => "Bank transfer deposit",
            DepositMethod::Upi { .. } => "UPI deposit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositInput {
    /// Minor units
    pub amount: i64,
    pub pin: String,
    pub method: DepositMethod,
    pub reference: Option<String>,
    pub idempotency_key: Option<String>,
}

enum Credit {
    Applied(Transaction),
    /// The capture was already on the ledger
    Replayed(Transaction),
}

fn require(field: &str, value: &str, label: &str) -> Result<String, WalletError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WalletError::validation(field, format!("{} is required", label)));
    }
    Ok(value.to_string())
}

impl Wallet {
    pub async fn deposit(
        &self,
        user_id: &str,
        input: DepositInput,
    ) -> Result<Transaction, WalletError> {
        let result = self.deposit_inner(user_id, input).await;
        record("deposit", &result);
        result
    }

    async fn deposit_inner(
        &self,
        user_id: &str,
        input: DepositInput,
    ) -> Result<Transaction, WalletError> {
        validate_amount(input.amount)?;
        let reference = match &input.reference {
            Some(r) if !r.trim().is_empty() => validate_reference(r)?,
            _ => input.method.default_reference().to_string(),
        };
        let key = normalize_idempotency_key(input.idempotency_key)?;

        let mut new = NewTransaction::wallet(
            user_id,
            user_id,
            input.amount,
            TransactionKind::Deposit,
            &reference,
        );
        new.payment_method = input.method.payment_method();
        new.idempotency_key = key.clone();

        match &input.method {
            DepositMethod::Card { payment_method } => {
                require("payment_method_id", payment_method, "Payment method")?;
            }
            DepositMethod::BankTransfer {
                account_number,
                ifsc,
                account_holder,
            } => {
                new.bank_account_number =
                    Some(require("account_number", account_number, "Account number")?);
                new.bank_ifsc = Some(require("ifsc", ifsc, "IFSC code")?.to_uppercase());
                new.bank_account_holder =
                    Some(require("account_holder", account_holder, "Account holder name")?);
            }
            DepositMethod::Upi { upi_id } => {
                new.upi_id = Some(require("upi_id", upi_id, "UPI ID")?.to_lowercase());
            }
        }

        self.verify_pin(user_id, &input.pin).await?;

        if let Some(key) = &key {
            if let Some(existing) =
                Transaction::find_by_idempotency_key(&self.db, user_id, key).await?
            {
                return replayed_deposit(existing, input.amount);
            }
        }

        match input.method {
            DepositMethod::Card { payment_method } => {
                self.card_deposit(user_id, new, payment_method.trim().to_string())
                    .await
            }
            _ => self.pending_deposit(new).await,
        }
    }

    async fn card_deposit(
        &self,
        user_id: &str,
        mut new: NewTransaction,
        payment_method: String,
    ) -> Result<Transaction, WalletError> {
        let capture = self
            .gateway
            .capture(&CaptureRequest {
                amount: new.amount,
                currency: self.currency.clone(),
                payment_method,
                idempotency_key: new.idempotency_key.clone(),
                user_id: user_id.to_string(),
            })
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, amount = new.amount, error = %e, "Card capture failed");
                WalletError::PaymentFailed(e.to_string())
            })?;

        if capture.amount != new.amount {
            warn!(
                payment_reference = %capture.id,
                requested = new.amount,
                captured = capture.amount,
                "Captured amount differs from requested amount"
            );
        }
        new.payment_reference = Some(capture.id.clone());

        match self.credit_capture(user_id, &new).await {
            Ok(Credit::Applied(row)) => {
                info!(
                    transaction_id = %row.id,
                    user_id = %user_id,
                    amount = row.amount,
                    payment_reference = %capture.id,
                    "Card deposit credited"
                );
                self.invalidate(Mutation::Deposit {
                    user_id: user_id.to_string(),
                })
                .await;
                self.notify_deposit(&row).await;
                Ok(row)
            }
            Ok(Credit::Replayed(row)) => Ok(row),
            Err(e) => self.park_capture(new, e).await,
        }
    }

    /// Credit the wallet and append the ledger row in one transaction
    async fn credit_capture(
        &self,
        user_id: &str,
        new: &NewTransaction,
    ) -> Result<Credit, WalletError> {
        let mut tx = self.db.begin().await?;

        if !User::credit(&mut *tx, user_id, new.amount).await? {
            tx.rollback().await?;
            return Err(WalletError::NotFound("User not found".to_string()));
        }

        let row = match Transaction::insert(&mut *tx, new).await {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                // This capture (or key) is already on the ledger and was credited then
                tx.rollback().await?;
                let payment_reference = new.payment_reference.as_deref().unwrap_or_default();
                let existing =
                    match Transaction::find_by_payment_reference(&self.db, payment_reference)
                        .await?
                    {
                        Some(row) => Some(row),
                        None => match &new.idempotency_key {
                            Some(key) => {
                                Transaction::find_by_idempotency_key(&self.db, user_id, key)
                                    .await?
                            }
                            None => None,
                        },
                    };
                return match existing {
                    Some(row) => replayed_deposit(row, new.amount).map(Credit::Replayed),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Ok(Credit::Applied(row))
    }

    /// The card was charged but the credit did not commit. Record the capture
    /// as a pending deposit so it can be settled instead of lost.
    async fn park_capture(
        &self,
        mut new: NewTransaction,
        cause: WalletError,
    ) -> Result<Transaction, WalletError> {
        let payment_reference = new.payment_reference.clone().unwrap_or_default();
        error!(
            payment_reference = %payment_reference,
            user_id = %new.receiver_id,
            amount = new.amount,
            error = %cause,
            "Card captured but wallet credit failed"
        );

        new.status = TransactionStatus::Pending;
        match Transaction::insert(&self.db, &new).await {
            Ok(row) => {
                warn!(
                    transaction_id = %row.id,
                    payment_reference = %payment_reference,
                    "Captured card payment recorded as pending deposit"
                );
                self.invalidate(Mutation::Deposit {
                    user_id: row.receiver_id.clone(),
                })
                .await;
                Ok(row)
            }
            Err(e) => {
                error!(
                    payment_reference = %payment_reference,
                    user_id = %new.receiver_id,
                    amount = new.amount,
                    error = %e,
                    "Could not record captured card payment, reconcile with the processor"
                );
                Err(cause)
            }
        }
    }

    async fn pending_deposit(&self, mut new: NewTransaction) -> Result<Transaction, WalletError> {
        new.status = TransactionStatus::Pending;

        let row = match Transaction::insert(&self.db, &new).await {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) && new.idempotency_key.is_some() => {
                let key = new.idempotency_key.clone().unwrap_or_default();
                return match Transaction::find_by_idempotency_key(&self.db, &new.sender_id, &key)
                    .await?
                {
                    Some(row) => replayed_deposit(row, new.amount),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            transaction_id = %row.id,
            user_id = %row.receiver_id,
            amount = row.amount,
            method = %row.payment_method,
            "Deposit recorded as pending"
        );

        self.invalidate(Mutation::Deposit {
            user_id: row.receiver_id.clone(),
        })
        .await;

        Ok(row)
    }

    /// Credit a pending bank transfer or UPI deposit.
    ///
    /// The status flip is conditional on the row still being pending, so a
    /// deposit is credited at most once.
    pub async fn settle_deposit(&self, transaction_id: &str) -> Result<Transaction, WalletError> {
        let result = self.settle_deposit_inner(transaction_id).await;
        record("settle_deposit", &result);
        result
    }

    async fn settle_deposit_inner(&self, transaction_id: &str) -> Result<Transaction, WalletError> {
        let not_found = || WalletError::NotFound("Deposit not found".to_string());

        let mut tx = self.db.begin().await?;

        if !Transaction::mark_success(&mut *tx, transaction_id).await? {
            let existing = Transaction::find_by_id(&mut *tx, transaction_id).await?;
            tx.rollback().await?;
            return Err(match existing {
                Some(row) if row.kind_enum() == Some(TransactionKind::Deposit) => {
                    WalletError::AlreadyProcessed("Deposit already settled".to_string())
                }
                _ => not_found(),
            });
        }

        let row = match Transaction::find_by_id(&mut *tx, transaction_id).await? {
            Some(row) if row.kind_enum() == Some(TransactionKind::Deposit) => row,
            _ => {
                tx.rollback().await?;
                return Err(not_found());
            }
        };

        if !User::credit(&mut *tx, &row.receiver_id, row.amount).await? {
            tx.rollback().await?;
            return Err(WalletError::NotFound("User not found".to_string()));
        }

        tx.commit().await?;

        info!(
            transaction_id = %row.id,
            user_id = %row.receiver_id,
            amount = row.amount,
            "Pending deposit settled"
        );

        self.invalidate(Mutation::DepositSettled {
            user_id: row.receiver_id.clone(),
        })
        .await;
        self.notify_deposit(&row).await;

        Ok(row)
    }

    /// Deposits awaiting settlement, oldest first
    pub async fn pending_deposits(&self) -> Result<Vec<TransactionResponse>, WalletError> {
        let rows = Transaction::list_pending_deposits(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let owner = row.transaction.receiver_id.clone();
                row.into_response(&owner)
            })
            .collect())
    }

    async fn notify_deposit(&self, row: &Transaction) {
        match User::find_by_id(&self.db, &row.receiver_id).await {
            Ok(Some(user)) => self.notifier.notify(WalletEvent::DepositCredited {
                email: user.email,
                amount: row.amount,
            }),
            _ => warn!(transaction_id = %row.id, "Could not load user for deposit notification"),
        }
    }
}

fn replayed_deposit(existing: Transaction, amount: i64) -> Result<Transaction, WalletError> {
    if existing.kind_enum() != Some(TransactionKind::Deposit) {
        return Err(WalletError::Conflict(
            "Idempotency key was already used for a different operation".to_string(),
        ));
    }
    if existing.amount != amount {
        return Err(WalletError::Conflict(
            "Idempotency key was already used for a different amount".to_string(),
        ));
    }
    info!(transaction_id = %existing.id, "Replayed deposit");
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::testing::ScriptedGateway;
    use crate::wallet::testing::Harness;

    fn card(amount: i64) -> DepositInput {
        DepositInput {
            amount,
            pin: "1234".to_string(),
            method: DepositMethod::Card {
                payment_method: "pm_card_visa".to_string(),
            },
            reference: None,
            idempotency_key: None,
        }
    }

    fn upi(amount: i64) -> DepositInput {
        DepositInput {
            amount,
            pin: "1234".to_string(),
            method: DepositMethod::Upi {
                upi_id: "Asha@okbank".to_string(),
            },
            reference: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_card_deposit_credits_once() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        let row = h.wallet.deposit(&user.id, card(5000)).await.unwrap();

        assert_eq!(row.status_enum(), Some(TransactionStatus::Success));
        assert_eq!(row.payment_method, "card");
        assert_eq!(row.sender_id, row.receiver_id);
        assert_eq!(row.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(h.balance(&user.id).await, 5000);
        assert_eq!(h.ledger_rows().await, 1);

        let captured = h.gateway.calls.lock().unwrap()[0].clone();
        assert_eq!(captured.amount, 5000);
        assert_eq!(captured.currency, "inr");
    }

    #[tokio::test]
    async fn test_declined_card_persists_nothing() {
        let h = Harness::with_gateway(ScriptedGateway::scripted(vec![Err(
            "Your card was declined.".to_string(),
        )]))
        .await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        let err = h.wallet.deposit(&user.id, card(5000)).await.unwrap_err();
        match err {
            WalletError::PaymentFailed(message) => assert_eq!(message, "Your card was declined."),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(h.balance(&user.id).await, 0);
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_replayed_capture_does_not_double_credit() {
        let h = Harness::with_gateway(ScriptedGateway::scripted(vec![
            Ok("pi_same".to_string()),
            Ok("pi_same".to_string()),
        ]))
        .await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        let first = h.wallet.deposit(&user.id, card(2500)).await.unwrap();
        let second = h.wallet.deposit(&user.id, card(2500)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(h.balance(&user.id).await, 2500);
        assert_eq!(h.ledger_rows().await, 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_skips_second_capture() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;
        let mut input = card(1000);
        input.idempotency_key = Some("topup-1".to_string());

        h.wallet.deposit(&user.id, input.clone()).await.unwrap();
        h.wallet.deposit(&user.id, input).await.unwrap();

        assert_eq!(h.gateway.call_count(), 1);
        assert_eq!(h.balance(&user.id).await, 1000);

        let mut bigger = card(9000);
        bigger.idempotency_key = Some("topup-1".to_string());
        assert!(matches!(
            h.wallet.deposit(&user.id, bigger).await,
            Err(WalletError::Conflict(_))
        ));
        assert_eq!(h.gateway.call_count(), 1);
    }

    async fn fail_ledger_inserts(h: &Harness, condition: &str) {
        let sql = format!(
            "CREATE TRIGGER ledger_down BEFORE INSERT ON transactions WHEN {} \
             BEGIN SELECT RAISE(ABORT, 'ledger unavailable'); END",
            condition
        );
        sqlx::query(&sql).execute(&h.db).await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_kept_as_pending_when_credit_fails() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;
        fail_ledger_inserts(&h, "NEW.status = 'success'").await;

        let row = h.wallet.deposit(&user.id, card(4000)).await.unwrap();
        assert_eq!(row.status_enum(), Some(TransactionStatus::Pending));
        assert_eq!(row.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(h.balance(&user.id).await, 0);
        assert_eq!(h.ledger_rows().await, 1);

        let pending = h.wallet.pending_deposits().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payment_reference.as_deref(), Some("pi_1"));

        h.wallet.settle_deposit(&row.id).await.unwrap();
        assert_eq!(h.balance(&user.id).await, 4000);
    }

    #[tokio::test]
    async fn test_unrecordable_capture_surfaces_error() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;
        fail_ledger_inserts(&h, "1").await;

        assert!(matches!(
            h.wallet.deposit(&user.id, card(4000)).await,
            Err(WalletError::Database(_))
        ));
        assert_eq!(h.gateway.call_count(), 1);
        assert_eq!(h.balance(&user.id).await, 0);
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_pin_never_reaches_gateway() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;
        let mut input = card(1000);
        input.pin = "0000".to_string();

        assert!(matches!(
            h.wallet.deposit(&user.id, input).await,
            Err(WalletError::InvalidPin)
        ));
        assert_eq!(h.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upi_deposit_is_pending_until_settled() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;

        let row = h.wallet.deposit(&user.id, upi(7000)).await.unwrap();
        assert_eq!(row.status_enum(), Some(TransactionStatus::Pending));
        assert_eq!(row.upi_id.as_deref(), Some("asha@okbank"));
        assert_eq!(h.balance(&user.id).await, 0);
        assert_eq!(h.wallet.pending_deposits().await.unwrap().len(), 1);

        let settled = h.wallet.settle_deposit(&row.id).await.unwrap();
        assert_eq!(settled.status_enum(), Some(TransactionStatus::Success));
        assert_eq!(h.balance(&user.id).await, 7000);
        assert!(h.wallet.pending_deposits().await.unwrap().is_empty());

        assert!(matches!(
            h.wallet.settle_deposit(&row.id).await,
            Err(WalletError::AlreadyProcessed(_))
        ));
        assert_eq!(h.balance(&user.id).await, 7000);
    }

    #[tokio::test]
    async fn test_bank_transfer_requires_details() {
        let h = Harness::new().await;
        let user = h.user("a@x.io", 0, Some("1234")).await;
        let input = DepositInput {
            amount: 1000,
            pin: "1234".to_string(),
            method: DepositMethod::BankTransfer {
                account_number: "123456789012".to_string(),
                ifsc: " ".to_string(),
                account_holder: "Asha Rao".to_string(),
            },
            reference: None,
            idempotency_key: None,
        };

        match h.wallet.deposit(&user.id, input).await {
            Err(WalletError::Validation { field, .. }) => assert_eq!(field, "ifsc"),
            other => panic!("unexpected result: {:?}", other.map(|t| t.id)),
        }
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_settle_unknown_or_non_deposit() {
        let h = Harness::new().await;
        assert!(matches!(
            h.wallet.settle_deposit("missing").await,
            Err(WalletError::NotFound(_))
        ));
    }
}
