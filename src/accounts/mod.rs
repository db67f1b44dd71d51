//! Registration, sign-in and credential recovery.

pub mod admin;
pub mod google;
pub mod otp;
pub mod tokens;

pub use admin::UserList;
pub use google::{GoogleError, GoogleIdentity, GoogleVerifier, TokenInfoVerifier};
pub use tokens::{Claims, TokenIssuer};

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::validation::{validate_email, validate_name, validate_password};
use crate::cache::{Cache, CacheKey, Mutation, OtpPurpose};
use crate::crypto::{generate_token, hash_secret, hash_token, verify_secret};
use crate::db::{AuthProvider, DbPool, LoginResponse, NewUser, RegisterRequest, User, UserResponse};
use crate::notifications::{Notifier, WalletEvent};
use crate::wallet::{is_unique_violation, WalletError};

#[derive(Clone)]
pub struct Accounts {
    db: DbPool,
    cache: Cache,
    notifier: Notifier,
    tokens: TokenIssuer,
    google: Arc<dyn GoogleVerifier>,
    /// Base URL of the web client, for verification links
    app_url: String,
}

fn field<T>(name: &str, result: Result<T, String>) -> Result<T, WalletError> {
    result.map_err(|message| WalletError::validation(name, message))
}

fn invalid_credentials() -> WalletError {
    WalletError::Unauthorized("Invalid credentials".to_string())
}

impl Accounts {
    pub fn new(
        db: DbPool,
        cache: Cache,
        notifier: Notifier,
        tokens: TokenIssuer,
        google: Arc<dyn GoogleVerifier>,
        app_url: String,
    ) -> Self {
        Self {
            db,
            cache,
            notifier,
            tokens,
            google,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Create an unverified local account and email a verification link
    pub async fn register(&self, request: RegisterRequest) -> Result<UserResponse, WalletError> {
        field("first_name", validate_name(&request.first_name, "First name"))?;
        field("last_name", validate_name(&request.last_name, "Last name"))?;
        field("email", validate_email(&request.email))?;
        field("password", validate_password(&request.password))?;

        if User::find_by_email(&self.db, &request.email).await?.is_some() {
            return Err(email_taken());
        }

        let user = User::insert(
            &self.db,
            &NewUser {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                password_hash: Some(hash_secret(&request.password)?),
                auth_provider: AuthProvider::Local,
                google_id: None,
                is_verified: false,
                is_admin: false,
            },
        )
        .await
        .map_err(|e| if is_unique_violation(&e) { email_taken() } else { e.into() })?;

        info!(user_id = %user.id, "User registered");
        self.send_verification(&user).await;

        Ok(UserResponse::from(user))
    }

    async fn send_verification(&self, user: &User) {
        let token = generate_token();
        self.cache
            .set_raw(&CacheKey::EmailVerification(hash_token(&token)), &user.id)
            .await;
        self.notifier.notify(WalletEvent::VerifyEmail {
            email: user.email.clone(),
            name: user.first_name.clone(),
            link: format!("{}/verify-email?token={}", self.app_url, token),
        });
    }

    /// Consume a verification token and mark its account verified
    pub async fn verify_email(&self, token: &str) -> Result<UserResponse, WalletError> {
        let invalid = || WalletError::validation("token", "Invalid or expired verification link");

        let user_id = self
            .cache
            .take_raw(&CacheKey::EmailVerification(hash_token(token.trim())))
            .await
            .ok_or_else(invalid)?;

        if !User::mark_verified(&self.db, &user_id).await? {
            return Err(invalid());
        }
        self.cache
            .invalidate(&Mutation::ProfileUpdated {
                user_id: user_id.clone(),
            })
            .await;
        info!(user_id = %user_id, "Email verified");

        let user = User::find_by_id(&self.db, &user_id).await?.ok_or_else(invalid)?;
        Ok(UserResponse::from(user))
    }

    /// Re-send the verification link. Unknown or already verified addresses succeed silently.
    pub async fn resend_verification(&self, email: &str) -> Result<(), WalletError> {
        match User::find_by_email(&self.db, email).await? {
            Some(user) if !user.is_verified => self.send_verification(&user).await,
            _ => {}
        }
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, WalletError> {
        let user = User::find_by_email(&self.db, email)
            .await?
            .ok_or_else(invalid_credentials)?;

        let Some(hash) = user.password_hash.as_deref() else {
            return match user.provider() {
                AuthProvider::Google => Err(WalletError::Unauthorized(
                    "This account uses Google sign-in".to_string(),
                )),
                AuthProvider::Local => Err(invalid_credentials()),
            };
        };
        if !verify_secret(password, hash) {
            warn!(user_id = %user.id, "Failed login attempt");
            return Err(invalid_credentials());
        }
        if !user.is_verified {
            return Err(WalletError::AccountNotVerified);
        }

        info!(user_id = %user.id, "User logged in");
        self.session(user)
    }

    /// Sign in with a Google ID token, creating the account on first use
    pub async fn google_login(&self, id_token: &str) -> Result<LoginResponse, WalletError> {
        let identity = self.google.verify(id_token).await.map_err(|e| match e {
            GoogleError::NotConfigured => WalletError::Forbidden(e.to_string()),
            GoogleError::Invalid(_) => WalletError::Unauthorized(e.to_string()),
            GoogleError::Transport(_) => WalletError::Internal(e.to_string()),
        })?;

        if let Some(user) = User::find_by_google_id(&self.db, &identity.subject).await? {
            return self.session(user);
        }

        // Google vouches for the address. A password set before anyone proved
        // ownership of it is not trusted and is dropped.
        if let Some(existing) = User::find_by_email(&self.db, &identity.email).await? {
            if existing.google_id.is_some() {
                return Err(WalletError::Conflict(
                    "This email is linked to a different Google account".to_string(),
                ));
            }
            let drop_password = !existing.is_verified;
            let user = User::link_google(&self.db, &existing.id, &identity.subject, drop_password)
                .await?
                .ok_or_else(|| {
                    WalletError::Conflict(
                        "This email is linked to a different Google account".to_string(),
                    )
                })?;
            info!(
                user_id = %user.id,
                password_dropped = drop_password,
                "Linked Google identity to existing account"
            );
            self.cache
                .invalidate(&Mutation::ProfileUpdated {
                    user_id: user.id.clone(),
                })
                .await;
            return self.session(user);
        }

        let user = User::insert(
            &self.db,
            &NewUser {
                first_name: identity.first_name,
                last_name: identity.last_name,
                email: identity.email,
                password_hash: None,
                auth_provider: AuthProvider::Google,
                google_id: Some(identity.subject),
                is_verified: true,
                is_admin: false,
            },
        )
        .await?;
        info!(user_id = %user.id, "User registered with Google");
        self.session(user)
    }

    fn session(&self, user: User) -> Result<LoginResponse, WalletError> {
        let token = self
            .tokens
            .issue(&user)
            .map_err(|e| WalletError::Internal(format!("could not sign token: {}", e)))?;
        Ok(LoginResponse {
            token,
            user: UserResponse::from(user),
        })
    }

    /// Email a password reset code. Unknown addresses succeed silently.
    pub async fn forgot_password(&self, email: &str) -> Result<(), WalletError> {
        let Some(user) = User::find_by_email(&self.db, email).await? else {
            return Ok(());
        };
        let code = otp::issue(&self.cache, OtpPurpose::PasswordReset, &user.email).await;
        self.notifier.notify(WalletEvent::PasswordResetCode {
            email: user.email,
            code,
        });
        Ok(())
    }

    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), WalletError> {
        field("new_password", validate_password(new_password))?;
        let invalid = || WalletError::validation("otp", "Invalid or expired code");
        if !otp::consume(&self.cache, OtpPurpose::PasswordReset, email, code).await {
            return Err(invalid());
        }
        let user = User::find_by_email(&self.db, email).await?.ok_or_else(invalid)?;
        User::set_password_hash(&self.db, &user.id, &hash_secret(new_password)?).await?;
        info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), WalletError> {
        let user = User::find_by_id(&self.db, user_id)
            .await?
            .ok_or_else(|| WalletError::NotFound("User not found".to_string()))?;
        let hash = user.password_hash.as_deref().ok_or_else(|| {
            WalletError::validation(
                "current_password",
                "This account has no password. Use forgot password to set one",
            )
        })?;
        if !verify_secret(current_password, hash) {
            return Err(WalletError::Unauthorized(
                "Current password is incorrect".to_string(),
            ));
        }
        field("new_password", validate_password(new_password))?;
        User::set_password_hash(&self.db, user_id, &hash_secret(new_password)?).await?;
        info!(user_id = %user_id, "Password changed");
        Ok(())
    }
}

fn email_taken() -> WalletError {
    WalletError::Conflict("An account with this email already exists".to_string())
}
