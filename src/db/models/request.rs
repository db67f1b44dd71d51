//! Payment requests: one user asking another for money.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::common::{now_rfc3339, to_major_units};

/// `Pending` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRequest {
    pub id: String,
    /// Requester; receives the money on accept
    pub sender_id: String,
    /// Payer; the only user allowed to accept or reject
    pub receiver_id: String,
    /// Minor units
    pub amount: i64,
    pub reference: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PaymentRequest {
    pub fn status_enum(&self) -> RequestStatus {
        RequestStatus::from_str(&self.status).unwrap_or(RequestStatus::Pending)
    }
}

/// Request joined with the counterpart's name for list views
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRequestWithParties {
    #[sqlx(flatten)]
    pub request: PaymentRequest,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestResponse {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub receiver_email: String,
    pub amount: f64,
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PaymentRequestWithParties> for PaymentRequestResponse {
    fn from(row: PaymentRequestWithParties) -> Self {
        let r = row.request;
        Self {
            id: r.id,
            sender_id: r.sender_id,
            sender_name: row.sender_name,
            sender_email: row.sender_email,
            receiver_id: r.receiver_id,
            receiver_name: row.receiver_name,
            receiver_email: row.receiver_email,
            amount: to_major_units(r.amount),
            reference: r.reference,
            status: r.status,
            transaction_id: r.transaction_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Both directions of a user's requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLists {
    pub sent: Vec<PaymentRequestResponse>,
    pub received: Vec<PaymentRequestResponse>,
}

const SELECT_WITH_PARTIES: &str = r#"
    SELECT q.*,
           s.first_name || ' ' || s.last_name AS sender_name,
           s.email AS sender_email,
           r.first_name || ' ' || r.last_name AS receiver_name,
           r.email AS receiver_email
    FROM requests q
    INNER JOIN users s ON s.id = q.sender_id
    INNER JOIN users r ON r.id = q.receiver_id
"#;

impl PaymentRequest {
    pub async fn insert(
        db: &SqlitePool,
        sender_id: &str,
        receiver_id: &str,
        amount: i64,
        reference: &str,
    ) -> Result<PaymentRequest, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO requests (id, sender_id, receiver_id, amount, reference, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(amount)
        .bind(reference)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: &str) -> Result<Option<PaymentRequest>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Move a pending request to a terminal status.
    ///
    /// Returns false when the request had already left `pending`, which makes the
    /// transition single-shot even under concurrent callers.
    pub async fn transition<'e, E>(
        executor: E,
        id: &str,
        to: RequestStatus,
        transaction_id: Option<&str>,
    ) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = ?, transaction_id = COALESCE(?, transaction_id), updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to.as_str())
        .bind(transaction_id)
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Link an accepted request to the ledger row that settled it
    pub async fn set_transaction_id<'e, E>(
        executor: E,
        id: &str,
        transaction_id: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE requests SET transaction_id = ?, updated_at = ? WHERE id = ?")
            .bind(transaction_id)
            .bind(now_rfc3339())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_sent(
        db: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<PaymentRequestWithParties>, sqlx::Error> {
        let sql = format!(
            "{} WHERE q.sender_id = ? ORDER BY q.created_at DESC, q.id DESC",
            SELECT_WITH_PARTIES
        );
        sqlx::query_as(&sql).bind(user_id).fetch_all(db).await
    }

    pub async fn list_received(
        db: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<PaymentRequestWithParties>, sqlx::Error> {
        let sql = format!(
            "{} WHERE q.receiver_id = ? ORDER BY q.created_at DESC, q.id DESC",
            SELECT_WITH_PARTIES
        );
        sqlx::query_as(&sql).bind(user_id).fetch_all(db).await
    }
}
