use thiserror::Error;

use crate::domain::Cents;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {account_number}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_number: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A uniqueness race lost at insert time. Retried internally, never
    /// returned from public operations.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage or infrastructure failure. Details go to the log, not the caller.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(anyhow::anyhow!(message.into()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "internal failure");
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::from(anyhow::Error::new(err))
    }
}
