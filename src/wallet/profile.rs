//! Profile views derived from the user row.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Wallet, WalletError};
use crate::cache::{CacheKey, Mutation};
use crate::db::{PublicProfile, User, UserResponse};

const MAX_NAME_LEN: usize = 50;

/// What a client encodes into the "pay me" QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub user_id: String,
    pub name: String,
    pub email: String,
    /// Deep link opened by the scanning app
    pub payload: String,
}

fn clean_name(field: &str, value: &str) -> Result<String, WalletError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WalletError::validation(field, "Name cannot be empty"));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(WalletError::validation(
            field,
            format!("Name must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(value.to_string())
}

impl Wallet {
    /// The caller's own profile, balance included
    pub async fn me(&self, user_id: &str) -> Result<UserResponse, WalletError> {
        let key = CacheKey::UserProfile(user_id.to_string());
        if let Some(cached) = self.cache.get_json::<UserResponse>(&key).await {
            return Ok(cached);
        }
        let profile = UserResponse::from(self.load_user(user_id).await?);
        self.cache.set_json(&key, &profile).await;
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserResponse, WalletError> {
        let current = self.load_user(user_id).await?;
        let first_name = match first_name {
            Some(name) => clean_name("first_name", name)?,
            None => current.first_name,
        };
        let last_name = match last_name {
            Some(name) => clean_name("last_name", name)?,
            None => current.last_name,
        };

        let user = User::update_names(&self.db, user_id, &first_name, &last_name)
            .await?
            .ok_or_else(|| WalletError::NotFound("User not found".to_string()))?;

        info!(user_id = %user_id, "Profile updated");
        self.invalidate(Mutation::ProfileUpdated {
            user_id: user_id.to_string(),
        })
        .await;
        Ok(UserResponse::from(user))
    }

    /// Confirm a payee before sending money. Unverified accounts read as missing.
    pub async fn verify_account(&self, user_id: &str) -> Result<PublicProfile, WalletError> {
        match User::find_by_id(&self.db, user_id).await? {
            Some(user) if user.is_verified => Ok(PublicProfile::from(user)),
            _ => Err(WalletError::NotFound("Account not found".to_string())),
        }
    }

    pub async fn qr_payload(&self, user_id: &str) -> Result<QrPayload, WalletError> {
        let key = CacheKey::QrCode(user_id.to_string());
        if let Some(cached) = self.cache.get_json::<QrPayload>(&key).await {
            return Ok(cached);
        }

        let user = self.load_user(user_id).await?;
        let name = user.full_name();
        let link = Url::parse_with_params(
            "transacto://pay",
            &[("to", user.id.as_str()), ("name", name.as_str())],
        )
        .map_err(|e| WalletError::Internal(format!("could not build payment link: {}", e)))?;

        let payload = QrPayload {
            payload: link.to_string(),
            user_id: user.id,
            name,
            email: user.email,
        };
        self.cache.set_json(&key, &payload).await;
        Ok(payload)
    }
}
