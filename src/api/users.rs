//! Profile, password and transaction PIN endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{validate_name, validate_password};
use crate::db::{PublicProfile, UpdateProfileRequest, UserResponse};
use crate::wallet::{validate_pin_format, QrPayload};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePinRequest {
    pub current_pin: String,
    pub new_pin: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPinRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPinRequest {
    pub email: String,
    pub otp: String,
    pub new_pin: String,
}

fn check_pin(field: &str, pin: &str) -> Result<(), ApiError> {
    validate_pin_format(pin).map_err(|e| ApiError::validation_field(field, e.to_string()))
}

/// GET /api/users/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let profile = state.wallet.me(&user.id).await?;
    Ok(ApiResponse::ok("Profile retrieved", profile))
}

/// PUT /api/users/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(first) = &request.first_name {
        if let Err(e) = validate_name(first, "First name") {
            errors.add("first_name", e);
        }
    }
    if let Some(last) = &request.last_name {
        if let Err(e) = validate_name(last, "Last name") {
            errors.add("last_name", e);
        }
    }
    errors.finish()?;

    let profile = state
        .wallet
        .update_profile(
            &user.id,
            request.first_name.as_deref(),
            request.last_name.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok("Profile updated", profile))
}

/// POST /api/users/me/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    validate_password(&request.new_password)
        .map_err(|e| ApiError::validation_field("new_password", e))?;
    state
        .accounts
        .change_password(&user.id, &request.current_password, &request.new_password)
        .await?;
    Ok(ApiResponse::message("Password changed"))
}

/// POST /api/users/me/pin
pub async fn set_pin(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PinRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    check_pin("pin", &request.pin)?;
    state.wallet.set_pin(&user.id, &request.pin).await?;
    Ok(ApiResponse::message("Transaction PIN set"))
}

/// POST /api/users/me/pin/change
pub async fn change_pin(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePinRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    check_pin("new_pin", &request.new_pin)?;
    state
        .wallet
        .change_pin(&user.id, &request.current_pin, &request.new_pin)
        .await?;
    Ok(ApiResponse::message("Transaction PIN changed"))
}

/// POST /api/users/me/pin/verify
pub async fn verify_pin(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PinRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    state.wallet.verify_pin(&user.id, &request.pin).await?;
    Ok(ApiResponse::message("PIN verified"))
}

/// POST /api/users/pin/forgot
pub async fn forgot_pin(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ForgotPinRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    state.wallet.forgot_pin(&request.email).await?;
    Ok(ApiResponse::message(
        "If the account exists, a PIN reset code has been sent",
    ))
}

/// POST /api/users/pin/reset
pub async fn reset_pin(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResetPinRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(request) = payload?;
    check_pin("new_pin", &request.new_pin)?;
    state
        .wallet
        .reset_pin(&request.email, &request.otp, &request.new_pin)
        .await?;
    Ok(ApiResponse::message("Transaction PIN has been reset"))
}

/// GET /api/users/me/qr
pub async fn qr_code(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<ApiResponse<QrPayload>, ApiError> {
    let payload = state.wallet.qr_payload(&user.id).await?;
    Ok(ApiResponse::ok("QR payload generated", payload))
}

/// GET /api/users/:id/verify
pub async fn verify_account(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<PublicProfile>, ApiError> {
    let profile = state.wallet.verify_account(&id).await?;
    Ok(ApiResponse::ok("Account verified", profile))
}
