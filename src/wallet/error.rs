use thiserror::Error;

/// Failure of a wallet or account operation.
///
/// Every variant except `Database` and `Internal` is user-correctable and is
/// reported to the caller with its own code.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Transaction PIN has not been set")]
    PinNotSet,

    #[error("Invalid transaction PIN")]
    InvalidPin,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("{0}")]
    AlreadyProcessed(String),

    #[error("{0}")]
    PaymentFailed(String),

    #[error("Please verify your email address before logging in")]
    AccountNotVerified,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl WalletError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        WalletError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Machine-readable code, also used as the metrics outcome label
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::Validation { .. } => "validation_error",
            WalletError::NotFound(_) => "not_found",
            WalletError::Forbidden(_) => "forbidden",
            WalletError::Unauthorized(_) => "unauthorized",
            WalletError::Conflict(_) => "conflict",
            WalletError::PinNotSet => "pin_not_set",
            WalletError::InvalidPin => "invalid_pin",
            WalletError::InsufficientBalance => "insufficient_balance",
            WalletError::AlreadyProcessed(_) => "already_processed",
            WalletError::PaymentFailed(_) => "payment_failed",
            WalletError::AccountNotVerified => "account_not_verified",
            WalletError::Database(_) => "database_error",
            WalletError::Internal(_) => "internal_error",
        }
    }
}

impl From<argon2::password_hash::Error> for WalletError {
    fn from(err: argon2::password_hash::Error) -> Self {
        WalletError::Internal(format!("hashing failed: {}", err))
    }
}

/// True for a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
