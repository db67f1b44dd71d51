//! User accounts and wallet balances.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::common::{now_rfc3339, to_major_units};

/// How the account's identity was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Google => "google",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(AuthProvider::Local),
            "google" => Some(AuthProvider::Google),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub auth_provider: String,
    pub google_id: Option<String>,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    /// Minor units
    pub balance: i64,
    pub is_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn provider(&self) -> AuthProvider {
        AuthProvider::from_str(&self.auth_provider).unwrap_or(AuthProvider::Local)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }
}

/// Fields for creating a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub auth_provider: AuthProvider,
    pub google_id: Option<String>,
    pub is_verified: bool,
    pub is_admin: bool,
}

/// Profile returned to the account owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub auth_provider: String,
    pub balance: f64,
    pub has_pin: bool,
    pub is_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            has_pin: user.has_pin(),
            balance: to_major_units(user.balance),
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            auth_provider: user.auth_provider,
            is_verified: user.is_verified,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

/// Public snippet shown to someone about to pay this user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Admin changes to account flags
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub is_verified: Option<bool>,
    pub is_admin: Option<bool>,
}

impl User {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_google_id(
        db: &SqlitePool,
        google_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE google_id = ?")
            .bind(google_id)
            .fetch_optional(db)
            .await
    }

    pub async fn insert(db: &SqlitePool, new: &NewUser) -> Result<User, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, auth_provider,
                               google_id, is_verified, is_admin, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(new.first_name.trim())
        .bind(new.last_name.trim())
        .bind(new.email.trim().to_lowercase())
        .bind(&new.password_hash)
        .bind(new.auth_provider.as_str())
        .bind(&new.google_id)
        .bind(new.is_verified)
        .bind(new.is_admin)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    /// Subtract `amount` only if the balance covers it.
    ///
    /// The balance test and the write are one statement, so concurrent debits
    /// cannot both pass. Returns false when the user is missing or short.
    pub async fn debit<'e, E>(executor: E, id: &str, amount: i64) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users SET balance = balance - ?1, updated_at = ?2 WHERE id = ?3 AND balance >= ?1",
        )
        .bind(amount)
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add `amount`; false when the user is missing
    pub async fn credit<'e, E>(executor: E, id: &str, amount: i64) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET balance = balance + ?1, updated_at = ?2 WHERE id = ?3")
            .bind(amount)
            .bind(now_rfc3339())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn exists<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(found.is_some())
    }

    pub async fn mark_verified(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_verified = 1, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Attach a Google subject to an existing account and mark it verified.
    ///
    /// With `drop_password` the stored password is cleared and the account
    /// becomes Google-only. Returns None if the account is gone or already
    /// linked to a Google subject.
    pub async fn link_google(
        db: &SqlitePool,
        id: &str,
        google_id: &str,
        drop_password: bool,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE users
            SET google_id = ?,
                is_verified = 1,
                password_hash = CASE WHEN ? THEN NULL ELSE password_hash END,
                auth_provider = CASE WHEN ? THEN 'google' ELSE auth_provider END,
                updated_at = ?
            WHERE id = ? AND google_id IS NULL
            RETURNING *
            "#,
        )
        .bind(google_id)
        .bind(drop_password)
        .bind(drop_password)
        .bind(now_rfc3339())
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn set_pin_hash(db: &SqlitePool, id: &str, pin_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET pin_hash = ?, updated_at = ? WHERE id = ?")
            .bind(pin_hash)
            .bind(now_rfc3339())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Set the first PIN only; returns false when a PIN already exists
    pub async fn set_initial_pin_hash(
        db: &SqlitePool,
        id: &str,
        pin_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET pin_hash = ?, updated_at = ? WHERE id = ? AND pin_hash IS NULL",
        )
        .bind(pin_hash)
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now_rfc3339())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_names(
        db: &SqlitePool,
        id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(
            "UPDATE users SET first_name = ?, last_name = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(first_name.trim())
        .bind(last_name.trim())
        .bind(now_rfc3339())
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn update_flags(
        db: &SqlitePool,
        id: &str,
        is_verified: Option<bool>,
        is_admin: Option<bool>,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE users
            SET is_verified = COALESCE(?, is_verified),
                is_admin = COALESCE(?, is_admin),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(is_verified)
        .bind(is_admin)
        .bind(now_rfc3339())
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Search by name or email, newest first
    pub async fn list(
        db: &SqlitePool,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        let pattern = search.map(|s| format!("%{}%", s.trim().to_lowercase()));
        sqlx::query_as(
            r#"
            SELECT * FROM users
            WHERE ?1 IS NULL
               OR lower(first_name || ' ' || last_name) LIKE ?1
               OR email LIKE ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    pub async fn count(db: &SqlitePool, search: Option<&str>) -> Result<i64, sqlx::Error> {
        let pattern = search.map(|s| format!("%{}%", s.trim().to_lowercase()));
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE ?1 IS NULL
               OR lower(first_name || ' ' || last_name) LIKE ?1
               OR email LIKE ?1
            "#,
        )
        .bind(pattern)
        .fetch_one(db)
        .await
    }
}
