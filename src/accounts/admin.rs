//! Back-office user management.

use tracing::info;

use super::Accounts;
use crate::cache::Mutation;
use crate::db::{AdminUpdateUserRequest, Page, Pagination, User, UserResponse};
use crate::wallet::WalletError;

pub type UserList = Page<UserResponse>;

impl Accounts {
    pub async fn list_users(
        &self,
        pagination: Pagination,
        search: Option<&str>,
    ) -> Result<UserList, WalletError> {
        let pagination = pagination.normalized();
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        let users = User::list(&self.db, search, pagination.limit as i64, pagination.offset()).await?;
        let total = User::count(&self.db, search).await?;

        Ok(Page::new(
            users.into_iter().map(UserResponse::from).collect(),
            pagination,
            total,
        ))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserResponse, WalletError> {
        User::find_by_id(&self.db, user_id)
            .await?
            .map(UserResponse::from)
            .ok_or_else(|| WalletError::NotFound("User not found".to_string()))
    }

    /// Change verification or admin flags. Admins cannot demote themselves.
    pub async fn update_user(
        &self,
        actor_id: &str,
        user_id: &str,
        request: AdminUpdateUserRequest,
    ) -> Result<UserResponse, WalletError> {
        if actor_id == user_id && request.is_admin == Some(false) {
            return Err(WalletError::Forbidden(
                "You cannot remove your own admin access".to_string(),
            ));
        }

        let user = User::update_flags(&self.db, user_id, request.is_verified, request.is_admin)
            .await?
            .ok_or_else(|| WalletError::NotFound("User not found".to_string()))?;

        info!(
            actor_id = %actor_id,
            user_id = %user_id,
            is_verified = user.is_verified,
            is_admin = user.is_admin,
            "User flags updated"
        );
        self.cache
            .invalidate(&Mutation::ProfileUpdated {
                user_id: user_id.to_string(),
            })
            .await;

        Ok(UserResponse::from(user))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{registration, AccountsHarness};
    use super::*;
    use crate::cache::CacheKey;

    #[tokio::test]
    async fn test_list_users_with_search() {
        let h = AccountsHarness::new().await;
        for email in ["a@x.io", "b@x.io", "c@y.io"] {
            h.accounts.register(registration(email)).await.unwrap();
        }

        let all = h.accounts.list_users(Pagination::default(), None).await.unwrap();
        assert_eq!(all.total, 3);

        let filtered = h
            .accounts
            .list_users(Pagination::default(), Some("@x.io"))
            .await
            .unwrap();
        assert_eq!(filtered.total, 2);

        let paged = h
            .accounts
            .list_users(Pagination { page: 2, limit: 2 }, Some("  "))
            .await
            .unwrap();
        assert_eq!(paged.items.len(), 1);
        assert_eq!(paged.total_pages, 2);
    }

    #[tokio::test]
    async fn test_update_user_flags() {
        let h = AccountsHarness::new().await;
        let admin = h.accounts.register(registration("admin@x.io")).await.unwrap();
        let user = h.accounts.register(registration("u@x.io")).await.unwrap();

        h.cache
            .set_json(&CacheKey::UserProfile(user.id.clone()), &"stale")
            .await;

        let updated = h
            .accounts
            .update_user(
                &admin.id,
                &user.id,
                AdminUpdateUserRequest {
                    is_verified: Some(true),
                    is_admin: None,
                },
            )
            .await
            .unwrap();
        assert!(updated.is_verified);
        assert!(!updated.is_admin);

        let cached: Option<String> = h.cache.get_json(&CacheKey::UserProfile(user.id)).await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_admin_cannot_demote_self() {
        let h = AccountsHarness::new().await;
        let admin = h.accounts.register(registration("admin@x.io")).await.unwrap();

        assert!(matches!(
            h.accounts
                .update_user(
                    &admin.id,
                    &admin.id,
                    AdminUpdateUserRequest {
                        is_verified: None,
                        is_admin: Some(false),
                    },
                )
                .await,
            Err(WalletError::Forbidden(_))
        ));
        assert!(matches!(
            h.accounts.get_user("missing").await,
            Err(WalletError::NotFound(_))
        ));
    }
}
