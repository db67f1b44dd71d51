//! Startup seeding
//!
//! Runs on every startup; existing rows are left untouched.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::{AuthProvider, NewUser, User};
use crate::crypto::hash_secret;

/// Ensure a verified admin account exists for `email`.
///
/// An existing account with that email is promoted to admin rather than
/// having its password replaced.
pub async fn seed_admin_user(pool: &SqlitePool, email: &str, password: &str) -> Result<()> {
    if let Some(existing) = User::find_by_email(pool, email).await? {
        if !existing.is_admin || !existing.is_verified {
            User::update_flags(pool, &existing.id, Some(true), Some(true)).await?;
            info!(user_id = %existing.id, "Promoted existing account to admin");
        }
        return Ok(());
    }

    let password_hash = hash_secret(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;

    let user = User::insert(
        pool,
        &NewUser {
            first_name: "Admin".to_string(),
            last_name: "User".to_string(),
            email: email.to_string(),
            password_hash: Some(password_hash),
            auth_provider: AuthProvider::Local,
            google_id: None,
            is_verified: true,
            is_admin: true,
        },
    )
    .await
    .context("Failed to create admin user")?;

    info!(user_id = %user.id, email = %user.email, "Seeded admin user");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_secret;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_seed_creates_verified_admin_once() {
        let pool = test_pool().await;
        seed_admin_user(&pool, "Admin@Transacto.io", "adminpass1").await.unwrap();
        seed_admin_user(&pool, "admin@transacto.io", "other-pass2").await.unwrap();

        assert_eq!(User::count(&pool, None).await.unwrap(), 1);
        let admin = User::find_by_email(&pool, "admin@transacto.io").await.unwrap().unwrap();
        assert!(admin.is_admin);
        assert!(admin.is_verified);
        assert!(verify_secret("adminpass1", admin.password_hash.as_deref().unwrap()));
    }
}
