use super::{Wallet, WalletError};
use crate::cache::CacheKey;
use crate::db::{Page, Pagination, Transaction, TransactionResponse};

impl Wallet {
    /// A page of the user's ledger, newest first
    pub async fn list_transactions(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> Result<Page<TransactionResponse>, WalletError> {
        let pagination = pagination.normalized();
        let key = CacheKey::TransactionPage {
            user_id: user_id.to_string(),
            page: pagination.page,
            limit: pagination.limit,
        };
        if let Some(cached) = self.cache.get_json::<Page<TransactionResponse>>(&key).await {
            return Ok(cached);
        }

        let rows = Transaction::list_for_user(
            &self.db,
            user_id,
            pagination.limit as i64,
            pagination.offset(),
        )
        .await?;
        let total = Transaction::count_for_user(&self.db, user_id).await?;

        let items = rows.into_iter().map(|row| row.into_response(user_id)).collect();
        let page = Page::new(items, pagination, total);

        self.cache.set_json(&key, &page).await;
        Ok(page)
    }

    /// A single ledger row. Rows the user is not a party to read as missing.
    pub async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<TransactionResponse, WalletError> {
        match Transaction::find_with_parties(&self.db, transaction_id).await? {
            Some(row) if row.transaction.involves(user_id) => Ok(row.into_response(user_id)),
            _ => Err(WalletError::NotFound("Transaction not found".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Direction;
    use crate::wallet::testing::Harness;
    use crate::wallet::TransferInput;

    async fn send(h: &Harness, from: &str, to: &str, amount: i64) -> Transaction {
        // Keep created_at strictly increasing between rows
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        h.wallet
            .transfer(
                from,
                TransferInput {
                    receiver_id: to.to_string(),
                    amount,
                    reference: format!("t{}", amount),
                    pin: "1234".to_string(),
                    idempotency_key: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pages_and_directions() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 1000, Some("1234")).await;

        send(&h, &a.id, &b.id, 100).await;
        send(&h, &b.id, &a.id, 200).await;
        send(&h, &a.id, &b.id, 300).await;

        let first = h
            .wallet
            .list_transactions(&a.id, Pagination { page: 1, limit: 2 })
            .await
            .unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].amount, 3.0);
        assert_eq!(first.items[0].direction, Direction::Debit);
        assert_eq!(first.items[1].direction, Direction::Credit);

        let second = h
            .wallet
            .list_transactions(&a.id, Pagination { page: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
    }

    #[tokio::test]
    async fn test_new_transfer_invalidates_cached_pages() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;

        let before = h.wallet.list_transactions(&b.id, Pagination::default()).await.unwrap();
        assert_eq!(before.total, 0);

        send(&h, &a.id, &b.id, 100).await;

        let after = h.wallet.list_transactions(&b.id, Pagination::default()).await.unwrap();
        assert_eq!(after.total, 1);
    }

    #[tokio::test]
    async fn test_get_transaction_hides_foreign_rows() {
        let h = Harness::new().await;
        let a = h.user("a@x.io", 1000, Some("1234")).await;
        let b = h.user("b@x.io", 0, None).await;
        let c = h.user("c@x.io", 0, None).await;

        let row = send(&h, &a.id, &b.id, 100).await;

        assert_eq!(h.wallet.get_transaction(&b.id, &row.id).await.unwrap().id, row.id);
        assert!(matches!(
            h.wallet.get_transaction(&c.id, &row.id).await,
            Err(WalletError::NotFound(_))
        ));
        assert!(matches!(
            h.wallet.get_transaction(&a.id, "missing").await,
            Err(WalletError::NotFound(_))
        ));
    }
}
