//! Transfer, deposit and ledger endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{
    validate_account_number, validate_amount, validate_ifsc, validate_upi_id, validate_uuid,
};
use crate::db::{Page, Pagination, TransactionResponse, TransactionStatus};
use crate::wallet::{DepositInput, DepositMethod, TransferInput};
use crate::AppState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub receiver_id: String,
    pub amount: f64,
    #[serde(default)]
    pub reference: Option<String>,
    pub pin: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: f64,
    /// `card`, `bank_transfer` or `upi`
    pub method: String,
    pub pin: String,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub ifsc: Option<String>,
    #[serde(default)]
    pub account_holder: Option<String>,
    #[serde(default)]
    pub upi_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Body field wins over the `Idempotency-Key` header
fn idempotency_key(body: Option<String>, headers: &HeaderMap) -> Option<String> {
    body.or_else(|| {
        headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// POST /api/transactions/transfer
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<ApiResponse<TransactionResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_uuid(&request.receiver_id, "receiver_id") {
        errors.add("receiver_id", e);
    }
    let amount = match validate_amount(request.amount) {
        Ok(amount) => amount,
        Err(e) => {
            errors.add("amount", e);
            0
        }
    };
    if request.pin.trim().is_empty() {
        errors.add("pin", "Transaction PIN is required");
    }
    errors.finish()?;

    let input = TransferInput {
        receiver_id: request.receiver_id,
        amount,
        reference: request.reference.unwrap_or_default(),
        pin: request.pin,
        idempotency_key: idempotency_key(request.idempotency_key, &headers),
    };

    let transaction = state.wallet.transfer(&user.id, input).await?;
    let view = state.wallet.get_transaction(&user.id, &transaction.id).await?;
    Ok(ApiResponse::created("Transfer successful", view))
}

fn deposit_method(
    request: &DepositRequest,
    errors: &mut ValidationErrorBuilder,
) -> Option<DepositMethod> {
    let field = |value: &Option<String>| value.as_deref().unwrap_or("").trim().to_string();

    match request.method.trim().to_lowercase().as_str() {
        "card" => {
            let payment_method = field(&request.payment_method_id);
            if payment_method.is_empty() {
                errors.add("payment_method_id", "Payment method is required for card deposits");
            }
            Some(DepositMethod::Card { payment_method })
        }
        "bank_transfer" | "bank" => {
            let account_number = field(&request.account_number);
            let ifsc = field(&request.ifsc);
            let account_holder = field(&request.account_holder);
            if let Err(e) = validate_account_number(&account_number) {
                errors.add("account_number", e);
            }
            if let Err(e) = validate_ifsc(&ifsc) {
                errors.add("ifsc", e);
            }
            if account_holder.is_empty() {
                errors.add("account_holder", "Account holder name is required");
            }
            Some(DepositMethod::BankTransfer {
                account_number,
                ifsc,
                account_holder,
            })
        }
        "upi" => {
            let upi_id = field(&request.upi_id);
            if let Err(e) = validate_upi_id(&upi_id) {
                errors.add("upi_id", e);
            }
            Some(DepositMethod::Upi { upi_id })
        }
        _ => {
            errors.add("method", "Method must be one of card, bank_transfer or upi");
            None
        }
    }
}

/// POST /api/transactions/deposit
///
/// Card deposits are captured immediately; bank and UPI deposits are
/// recorded as pending until an admin settles them.
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<ApiResponse<TransactionResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    let amount = match validate_amount(request.amount) {
        Ok(amount) => amount,
        Err(e) => {
            errors.add("amount", e);
            0
        }
    };
    if request.pin.trim().is_empty() {
        errors.add("pin", "Transaction PIN is required");
    }
    let method = deposit_method(&request, &mut errors);
    errors.finish()?;
    let method = method.ok_or_else(|| ApiError::validation_field("method", "Invalid method"))?;

    let input = DepositInput {
        amount,
        pin: request.pin,
        method,
        reference: request.reference,
        idempotency_key: idempotency_key(request.idempotency_key, &headers),
    };

    let transaction = state.wallet.deposit(&user.id, input).await?;
    let message = if transaction.status_enum() == Some(TransactionStatus::Success) {
        "Deposit successful"
    } else {
        "Deposit recorded and awaiting confirmation"
    };
    let view = state.wallet.get_transaction(&user.id, &transaction.id).await?;
    Ok(ApiResponse::created(message, view))
}

/// GET /api/transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(pagination): Query<Pagination>,
) -> Result<ApiResponse<Page<TransactionResponse>>, ApiError> {
    let page = state.wallet.list_transactions(&user.id, pagination).await?;
    Ok(ApiResponse::ok("Transactions retrieved", page))
}

/// GET /api/transactions/:id
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<TransactionResponse>, ApiError> {
    let view = state.wallet.get_transaction(&user.id, &id).await?;
    Ok(ApiResponse::ok("Transaction retrieved", view))
}
