use tracing::{info, warn};

use super::{
    is_unique_violation, normalize_idempotency_key, record, validate_amount, validate_reference,
    Wallet, WalletError,
};
use crate::cache::Mutation;
use crate::db::{NewTransaction, Transaction, TransactionKind, User};
use crate::notifications::WalletEvent;

#[derive(Debug, Clone)]
pub struct TransferInput {
    pub receiver_id: String,
    /// Minor units
    pub amount: i64,
    pub reference: String,
    pub pin: String,
    /// Retrying with the same key returns the original row instead of moving money again
    pub idempotency_key: Option<String>,
}

impl Wallet {
    /// Move money from one wallet to another.
    ///
    /// The debit, credit and ledger insert commit together or not at all.
    pub async fn transfer(
        &self,
        sender_id: &str,
        input: TransferInput,
    ) -> Result<Transaction, WalletError> {
        let result = self.transfer_inner(sender_id, input).await;
        record("transfer", &result);
        result
    }

    async fn transfer_inner(
        &self,
        sender_id: &str,
        input: TransferInput,
    ) -> Result<Transaction, WalletError> {
        validate_amount(input.amount)?;
        if input.receiver_id == sender_id {
            return Err(WalletError::validation(
                "receiver_id",
                "Cannot transfer money to yourself",
            ));
        }
        let reference = validate_reference(&input.reference)?;
        let key = normalize_idempotency_key(input.idempotency_key)?;

        self.verify_pin(sender_id, &input.pin).await?;

        if let Some(key) = &key {
            if let Some(existing) =
                Transaction::find_by_idempotency_key(&self.db, sender_id, key).await?
            {
                return replayed_transfer(existing, &input.receiver_id, input.amount);
            }
        }

        let mut new = NewTransaction::wallet(
            sender_id,
            &input.receiver_id,
            input.amount,
            TransactionKind::Transfer,
            &reference,
        );
        new.idempotency_key = key.clone();

        let mut tx = self.db.begin().await?;

        if !User::debit(&mut *tx, sender_id, input.amount).await? {
            let sender_exists = User::exists(&mut *tx, sender_id).await?;
            tx.rollback().await?;
            return Err(if sender_exists {
                WalletError::InsufficientBalance
            } else {
                WalletError::NotFound("Sender not found".to_string())
            });
        }

        if !User::credit(&mut *tx, &input.receiver_id, input.amount).await? {
            tx.rollback().await?;
            return Err(WalletError::NotFound("Receiver not found".to_string()));
        }

        let row = match Transaction::insert(&mut *tx, &new).await {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) && key.is_some() => {
                // Same key committed by a concurrent request; ours is discarded
                tx.rollback().await?;
                let key = key.unwrap_or_default();
                let existing = Transaction::find_by_idempotency_key(&self.db, sender_id, &key)
                    .await?
                    .ok_or_else(|| {
                        WalletError::Internal("idempotent transfer vanished".to_string())
                    })?;
                return replayed_transfer(existing, &input.receiver_id, input.amount);
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        info!(
            transaction_id = %row.id,
            sender_id = %row.sender_id,
            receiver_id = %row.receiver_id,
            amount = row.amount,
            "Transfer completed"
        );

        self.invalidate(Mutation::Transfer {
            sender_id: row.sender_id.clone(),
            receiver_id: row.receiver_id.clone(),
        })
        .await;
        self.notify_transfer(&row).await;

        Ok(row)
    }

    async fn notify_transfer(&self, row: &Transaction) {
        let sender = User::find_by_id(&self.db, &row.sender_id).await;
        let receiver = User::find_by_id(&self.db, &row.receiver_id).await;
        match (sender, receiver) {
            (Ok(Some(sender)), Ok(Some(receiver))) => {
                self.notifier.notify(WalletEvent::TransferReceived {
                    email: receiver.email,
                    sender_name: sender.full_name(),
                    amount: row.amount,
                    reference: row.reference.clone(),
                });
            }
            _ => warn!(transaction_id = %row.id, "Could not load parties for transfer notification"),
        }
    }
}

/// A key replays only the transfer it was first used for
fn replayed_transfer(
    existing: Transaction,
    receiver_id: &str,
    amount: i64,
) -> Result<Transaction, WalletError> {
    if existing.kind_enum() != Some(TransactionKind::Transfer) {
        return Err(WalletError::Conflict(
            "Idempotency key was already used for a different operation".to_string(),
        ));
    }
    if existing.receiver_id != receiver_id || existing.amount != amount {
        warn!(
            transaction_id = %existing.id,
            "Idempotency key reused with a different receiver or amount"
        );
        return Err(WalletError::Conflict(
            "Idempotency key was already used for a different transfer".to_string(),
        ));
    }
    info!(transaction_id = %existing.id, "Replayed idempotent transfer");
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::db::TransactionStatus;
    use crate::wallet::testing::Harness;

    fn input(receiver_id: &str, amount: i64) -> TransferInput {
        TransferInput {
            receiver_id: receiver_id.to_string(),
            amount,
            reference: "rent".to_string(),
            pin: "1234".to_string(),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_money_and_writes_one_row() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 500, Some("9999")).await;

        let row = h.wallet.transfer(&a.id, input(&b.id, 300)).await.unwrap();

        assert_eq!(row.kind_enum(), Some(TransactionKind::Transfer));
        assert_eq!(row.status_enum(), Some(TransactionStatus::Success));
        assert_eq!(row.amount, 300);
        assert_eq!(h.balance(&a.id).await, 700);
        assert_eq!(h.balance(&b.id).await, 800);
        assert_eq!(h.ledger_rows().await, 1);

        let email = h.mailer.wait_for("b@x.io", "You received").await;
        assert!(email.text_body.contains("3.00"));
    }

    #[tokio::test]
    async fn test_insufficient_balance_changes_nothing() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 100, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        let err = h.wallet.transfer(&a.id, input(&b.id, 101)).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance));
        assert_eq!(h.balance(&a.id).await, 100);
        assert_eq!(h.balance(&b.id).await, 0);
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_missing_receiver_rolls_back_debit() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 100, Some("1234")).await;

        let err = h.wallet.transfer(&a.id, input("ghost", 50)).await.unwrap_err();
        assert!(matches!(err, WalletError::NotFound(_)));
        assert_eq!(h.balance(&a.id).await, 100);
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_rejections_before_money_moves() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 100, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        let mut bad_pin = input(&b.id, 10);
        bad_pin.pin = "0000".to_string();
        assert!(matches!(
            h.wallet.transfer(&a.id, bad_pin).await,
            Err(WalletError::InvalidPin)
        ));
        assert!(matches!(
            h.wallet.transfer(&a.id, input(&a.id, 10)).await,
            Err(WalletError::Validation { .. })
        ));
        assert!(matches!(
            h.wallet.transfer(&a.id, input(&b.id, 0)).await,
            Err(WalletError::Validation { .. })
        ));
        // Receiver has no PIN; sending from them reports it
        assert!(matches!(
            h.wallet.transfer(&b.id, input(&a.id, 10)).await,
            Err(WalletError::PinNotSet)
        ));
        assert_eq!(h.balance(&a.id).await, 100);
        assert_eq!(h.ledger_rows().await, 0);
    }

    #[tokio::test]
    async fn test_idempotent_retry_debits_once() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        let mut req = input(&b.id, 250);
        req.idempotency_key = Some("checkout-42".to_string());

        let first = h.wallet.transfer(&a.id, req.clone()).await.unwrap();
        let second = h.wallet.transfer(&a.id, req).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(h.balance(&a.id).await, 750);
        assert_eq!(h.balance(&b.id).await, 250);
        assert_eq!(h.ledger_rows().await, 1);
    }

    #[tokio::test]
    async fn test_reused_key_with_different_details_conflicts() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;
        let c = h.user("c@x.io", 0, None).await;

        let mut req = input(&b.id, 250);
        req.idempotency_key = Some("checkout-42".to_string());
        h.wallet.transfer(&a.id, req.clone()).await.unwrap();

        let mut more = req.clone();
        more.amount = 900;
        assert!(matches!(
            h.wallet.transfer(&a.id, more).await,
            Err(WalletError::Conflict(_))
        ));

        let mut elsewhere = req;
        elsewhere.receiver_id = c.id.clone();
        assert!(matches!(
            h.wallet.transfer(&a.id, elsewhere).await,
            Err(WalletError::Conflict(_))
        ));

        assert_eq!(h.balance(&a.id).await, 750);
        assert_eq!(h.balance(&c.id).await, 0);
        assert_eq!(h.ledger_rows().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_transfers_never_overdraw() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let wallet = h.wallet.clone();
            let sender = a.id.clone();
            let req = input(&b.id, 300);
            handles.push(tokio::spawn(async move { wallet.transfer(&sender, req).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(WalletError::InsufficientBalance) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, 1000 / 300);
        assert_eq!(h.balance(&a.id).await, 1000 - 300 * succeeded);
        assert_eq!(h.balance(&b.id).await, 300 * succeeded);
        assert_eq!(h.ledger_rows().await, succeeded);
    }

    #[tokio::test]
    async fn test_transfer_invalidates_both_profiles() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        for id in [&a.id, &b.id] {
            h.cache.set_json(&CacheKey::UserProfile(id.clone()), &"stale").await;
        }
        h.wallet.transfer(&a.id, input(&b.id, 100)).await.unwrap();

        for id in [&a.id, &b.id] {
            let cached: Option<String> =
                h.cache.get_json(&CacheKey::UserProfile(id.clone())).await;
            assert!(cached.is_none());
        }
    }
}
