//! Bearer-token extractors and the public authentication endpoints.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{validate_email, validate_password};
use crate::db::{LoginRequest, LoginResponse, RegisterRequest, User, UserResponse};
use crate::AppState;

/// The caller, resolved from `Authorization: Bearer <jwt>`
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// An authenticated caller with the admin flag
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let claims = state.accounts.tokens().verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        let user = User::find_by_id(&state.db, &claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    if request.first_name.trim().is_empty() {
        errors.add("first_name", "First name is required");
    }
    if request.last_name.trim().is_empty() {
        errors.add("last_name", "Last name is required");
    }
    if let Err(e) = validate_email(&request.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let user = state.accounts.register(request).await?;
    Ok(ApiResponse::created(
        "Registration successful. Check your email to verify your account",
        user,
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    let session = state.accounts.login(&request.email, &request.password).await?;
    Ok(ApiResponse::ok("Login successful", session))
}

/// POST /api/auth/google
pub async fn google_login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    if request.id_token.trim().is_empty() {
        return Err(ApiError::validation_field("id_token", "Google ID token is required"));
    }
    let session = state.accounts.google_login(request.id_token.trim()).await?;
    Ok(ApiResponse::ok("Login successful", session))
}

/// POST /api/auth/verify-email
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let Json(request) = payload?;
    let user = state.accounts.verify_email(&request.token).await?;
    Ok(ApiResponse::ok("Email verified", user))
}

/// POST /api/auth/resend-verification
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    state.accounts.resend_verification(&request.email).await?;
    Ok(ApiResponse::message(
        "If the account exists and is unverified, a new link has been sent",
    ))
}

/// POST /api/auth/forgot-password
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    state.accounts.forgot_password(&request.email).await?;
    Ok(ApiResponse::message(
        "If the account exists, a reset code has been sent",
    ))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    state
        .accounts
        .reset_password(&request.email, &request.otp, &request.new_password)
        .await?;
    Ok(ApiResponse::message("Password has been reset"))
}
