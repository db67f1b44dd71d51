//! Back-office endpoints. Every handler requires an admin bearer token.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::ApiError;
use super::response::ApiResponse;
use crate::accounts::UserList;
use crate::db::{AdminUpdateUserRequest, Pagination, Transaction, TransactionResponse, UserResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

impl UserListQuery {
    fn pagination(&self) -> Pagination {
        let defaults = Pagination::default();
        Pagination {
            page: self.page.unwrap_or(defaults.page),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<UserListQuery>,
) -> Result<ApiResponse<UserList>, ApiError> {
    let users = state
        .accounts
        .list_users(query.pagination(), query.search.as_deref())
        .await?;
    Ok(ApiResponse::ok("Users retrieved", users))
}

/// GET /api/admin/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let user = state.accounts.get_user(&id).await?;
    Ok(ApiResponse::ok("User retrieved", user))
}

/// PATCH /api/admin/users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    payload: Result<Json<AdminUpdateUserRequest>, JsonRejection>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let Json(request) = payload?;
    if request.is_verified.is_none() && request.is_admin.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let user = state.accounts.update_user(&admin.id, &id, request).await?;
    Ok(ApiResponse::ok("User updated", user))
}

/// GET /api/admin/deposits/pending
pub async fn pending_deposits(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<ApiResponse<Vec<TransactionResponse>>, ApiError> {
    let deposits = state.wallet.pending_deposits().await?;
    Ok(ApiResponse::ok("Pending deposits retrieved", deposits))
}

/// POST /api/admin/deposits/:id/settle
pub async fn settle_deposit(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<TransactionResponse>, ApiError> {
    let settled = state.wallet.settle_deposit(&id).await?;
    tracing::info!(admin_id = %admin.id, transaction_id = %settled.id, "Deposit settled by admin");

    // Shown from the depositor's side
    let view = Transaction::find_with_parties(&state.db, &settled.id)
        .await?
        .map(|row| row.into_response(&settled.receiver_id))
        .ok_or_else(|| ApiError::not_found("Transaction not found"))?;
    Ok(ApiResponse::ok("Deposit settled", view))
}
