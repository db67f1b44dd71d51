//! Ledger rows for transfers, deposits and settled payment requests.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::common::{now_rfc3339, to_major_units};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Deposit,
    Request,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Request => "request",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(TransactionKind::Transfer),
            "deposit" => Some(TransactionKind::Deposit),
            "request" => Some(TransactionKind::Request),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Pending => "pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(TransactionStatus::Success),
            "pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How money entered or moved; `Wallet` for balance-to-balance movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Card,
    BankTransfer,
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Upi => "upi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wallet" => Some(PaymentMethod::Wallet),
            "card" => Some(PaymentMethod::Card),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "upi" => Some(PaymentMethod::Upi),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Minor units
    pub amount: i64,
    pub kind: String,
    pub status: String,
    pub reference: String,
    pub payment_method: String,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub bank_account_holder: Option<String>,
    pub upi_id: Option<String>,
    pub payment_reference: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Transaction {
    pub fn kind_enum(&self) -> Option<TransactionKind> {
        TransactionKind::from_str(&self.kind)
    }

    pub fn status_enum(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_str(&self.status)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }
}

/// Fields for appending a ledger row
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub reference: String,
    pub payment_method: PaymentMethod,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub bank_account_holder: Option<String>,
    pub upi_id: Option<String>,
    pub payment_reference: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewTransaction {
    /// A wallet-to-wallet movement with no external metadata
    pub fn wallet(
        sender_id: &str,
        receiver_id: &str,
        amount: i64,
        kind: TransactionKind,
        reference: &str,
    ) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            amount,
            kind,
            status: TransactionStatus::Success,
            reference: reference.to_string(),
            payment_method: PaymentMethod::Wallet,
            bank_account_number: None,
            bank_ifsc: None,
            bank_account_holder: None,
            upi_id: None,
            payment_reference: None,
            idempotency_key: None,
        }
    }
}

/// One side of a ledger row as seen by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Ledger row joined with both parties' names
#[derive(Debug, Clone, FromRow)]
pub struct TransactionWithParties {
    #[sqlx(flatten)]
    pub transaction: Transaction,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub sender: Party,
    pub receiver: Party,
    pub amount: f64,
    pub kind: String,
    pub status: String,
    pub reference: String,
    pub payment_method: String,
    /// Relative to the viewer; deposits are credits
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    pub created_at: String,
}

impl TransactionWithParties {
    pub fn into_response(self, viewer_id: &str) -> TransactionResponse {
        let tx = self.transaction;
        let direction = if tx.sender_id == viewer_id && tx.receiver_id != viewer_id {
            Direction::Debit
        } else {
            Direction::Credit
        };
        TransactionResponse {
            sender: Party {
                id: tx.sender_id,
                name: self.sender_name,
                email: self.sender_email,
            },
            receiver: Party {
                id: tx.receiver_id,
                name: self.receiver_name,
                email: self.receiver_email,
            },
            id: tx.id,
            amount: to_major_units(tx.amount),
            kind: tx.kind,
            status: tx.status,
            reference: tx.reference,
            payment_method: tx.payment_method,
            direction,
            upi_id: tx.upi_id,
            payment_reference: tx.payment_reference,
            created_at: tx.created_at,
        }
    }
}

const SELECT_WITH_PARTIES: &str = r#"
    SELECT t.*,
           s.first_name || ' ' || s.last_name AS sender_name,
           s.email AS sender_email,
           r.first_name || ' ' || r.last_name AS receiver_name,
           r.email AS receiver_email
    FROM transactions t
    INNER JOIN users s ON s.id = t.sender_id
    INNER JOIN users r ON r.id = t.receiver_id
"#;

impl Transaction {
    /// Append a ledger row; runs on a pool or inside an open transaction
    pub async fn insert<'e, E>(executor: E, new: &NewTransaction) -> Result<Transaction, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO transactions (id, sender_id, receiver_id, amount, kind, status, reference,
                                      payment_method, bank_account_number, bank_ifsc,
                                      bank_account_holder, upi_id, payment_reference,
                                      idempotency_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&new.sender_id)
        .bind(&new.receiver_id)
        .bind(new.amount)
        .bind(new.kind.as_str())
        .bind(new.status.as_str())
        .bind(&new.reference)
        .bind(new.payment_method.as_str())
        .bind(&new.bank_account_number)
        .bind(&new.bank_ifsc)
        .bind(&new.bank_account_holder)
        .bind(&new.upi_id)
        .bind(&new.payment_reference)
        .bind(&new.idempotency_key)
        .bind(&now)
        .bind(&now)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: &str) -> Result<Option<Transaction>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_payment_reference<'e, E>(
        executor: E,
        payment_reference: &str,
    ) -> Result<Option<Transaction>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM transactions WHERE payment_reference = ?")
            .bind(payment_reference)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_idempotency_key<'e, E>(
        executor: E,
        sender_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM transactions WHERE sender_id = ? AND idempotency_key = ?")
            .bind(sender_id)
            .bind(key)
            .fetch_optional(executor)
            .await
    }

    /// Flip a pending row to success; false when it was not pending
    pub async fn mark_success<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'success', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_with_parties(
        db: &SqlitePool,
        id: &str,
    ) -> Result<Option<TransactionWithParties>, sqlx::Error> {
        let sql = format!("{} WHERE t.id = ?", SELECT_WITH_PARTIES);
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Rows where the user is sender or receiver, newest first
    pub async fn list_for_user(
        db: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionWithParties>, sqlx::Error> {
        let sql = format!(
            "{} WHERE t.sender_id = ?1 OR t.receiver_id = ?1 ORDER BY t.created_at DESC, t.id DESC LIMIT ?2 OFFSET ?3",
            SELECT_WITH_PARTIES
        );
        sqlx::query_as(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await
    }

    pub async fn count_for_user(db: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE sender_id = ?1 OR receiver_id = ?1")
            .bind(user_id)
            .fetch_one(db)
            .await
    }

    /// Bank/UPI deposits awaiting back-office settlement, oldest first
    pub async fn list_pending_deposits(
        db: &SqlitePool,
    ) -> Result<Vec<TransactionWithParties>, sqlx::Error> {
        let sql = format!(
            "{} WHERE t.kind = 'deposit' AND t.status = 'pending' ORDER BY t.created_at ASC",
            SELECT_WITH_PARTIES
        );
        sqlx::query_as(&sql).fetch_all(db).await
    }
}
