//! Payment request endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{validate_amount, validate_email, validate_uuid};
use crate::db::{to_major_units, PaymentRequest, RequestLists, TransactionResponse};
use crate::wallet::{RequestAction, RequestTarget, SendRequestInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub receiver_email: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequestBody {
    /// `accept` or `reject`; `status` is accepted as an alias
    #[serde(default, alias = "status")]
    pub action: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: f64,
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionResponse>,
}

impl RequestView {
    fn new(request: PaymentRequest, transaction: Option<TransactionResponse>) -> Self {
        Self {
            amount: to_major_units(request.amount),
            id: request.id,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            reference: request.reference,
            status: request.status,
            transaction_id: request.transaction_id,
            created_at: request.created_at,
            updated_at: request.updated_at,
            transaction,
        }
    }
}

fn request_target(
    body: &CreateRequestBody,
    errors: &mut ValidationErrorBuilder,
) -> Option<RequestTarget> {
    let id = body.receiver_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let email = body.receiver_email.as_deref().map(str::trim).filter(|s| !s.is_empty());

    match (id, email) {
        (Some(id), _) => {
            if let Err(e) = validate_uuid(id, "receiver_id") {
                errors.add("receiver_id", e);
            }
            Some(RequestTarget::Id(id.to_string()))
        }
        (None, Some(email)) => {
            if let Err(e) = validate_email(email) {
                errors.add("receiver_email", e);
            }
            Some(RequestTarget::Email(email.to_string()))
        }
        (None, None) => {
            errors.add("receiver_id", "Either receiver_id or receiver_email is required");
            None
        }
    }
}

/// POST /api/requests
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<ApiResponse<RequestView>, ApiError> {
    let Json(body) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    let target = request_target(&body, &mut errors);
    let amount = match validate_amount(body.amount) {
        Ok(amount) => amount,
        Err(e) => {
            errors.add("amount", e);
            0
        }
    };
    errors.finish()?;
    let target =
        target.ok_or_else(|| ApiError::validation_field("receiver_id", "Receiver is required"))?;

    let request = state
        .wallet
        .send_request(
            &user.id,
            SendRequestInput {
                target,
                amount,
                reference: body.reference.unwrap_or_default(),
            },
        )
        .await?;

    Ok(ApiResponse::created(
        "Payment request sent",
        RequestView::new(request, None),
    ))
}

/// GET /api/requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<ApiResponse<RequestLists>, ApiError> {
    let lists = state.wallet.list_requests(&user.id).await?;
    Ok(ApiResponse::ok("Requests retrieved", lists))
}

/// PATCH /api/requests/:id
pub async fn update_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateRequestBody>, JsonRejection>,
) -> Result<ApiResponse<RequestView>, ApiError> {
    let Json(body) = payload?;

    let action = body
        .action
        .as_deref()
        .and_then(RequestAction::from_str)
        .ok_or_else(|| ApiError::validation_field("action", "Action must be accept or reject"))?;

    let outcome = state
        .wallet
        .update_request_status(&user.id, &id, action, body.pin.as_deref())
        .await?;

    let transaction = match &outcome.transaction {
        Some(row) => Some(state.wallet.get_transaction(&user.id, &row.id).await?),
        None => None,
    };

    let message = match action {
        RequestAction::Accept => "Payment request accepted",
        RequestAction::Reject => "Payment request rejected",
    };
    Ok(ApiResponse::ok(
        message,
        RequestView::new(outcome.request, transaction),
    ))
}
