use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Ledger write conflict")]
    WriteConflict,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Balance-ledger and payout-record errors
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Worker not found: {0}")]
    WorkerNotFound(uuid::Uuid),

    #[error("Insufficient balance: {available} pending, minimum withdrawal is {minimum}")]
    InsufficientBalance { available: i64, minimum: i64 },

    #[error("Payout record not found: {0}")]
    RecordNotFound(uuid::Uuid),

    #[error("Unlock not permitted: {0}")]
    UnlockNotPermitted(String),

    #[error("Invalid settlement transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Share-fetch and key-reconstruction errors
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Share endpoint failed: {0}")]
    ShareEndpoint(String),

    #[error("Insufficient shares: collected {collected}, threshold {threshold}")]
    InsufficientShares { collected: usize, threshold: usize },

    #[error("Corrupt share set: {0}")]
    CorruptShare(String),
}

/// Ledger-network submission errors
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    /// The network may have accepted the transfer but we never observed a
    /// confirmation. The transaction signature was recorded before broadcast
    /// so a redelivered job can look up the chain status instead of blindly resending.
    #[error("Submission outcome unknown for {signature}: {message}")]
    OutcomeUnknown { signature: String, message: String },
}

impl SubmitError {
    /// True when the transfer may have landed on chain despite the error.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, SubmitError::OutcomeUnknown { .. })
    }
}

/// Failure-reason prefix recorded when a job dies with an unknown submission
/// outcome. `unlock_failed_payout` refuses these records unless forced.
pub const OUTCOME_UNKNOWN_PREFIX: &str = "outcome unknown";

impl AppError {
    /// Classify a database error, lifting Postgres serialization/deadlock
    /// failures into `WriteConflict`. Used on writes the caller retries;
    /// the finalize write must be retried, never the transfer itself.
    pub fn from_db(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return AppError::WriteConflict;
            }
        }
        AppError::Database(error)
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, AppError::WriteConflict)
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Payout(PayoutError::WorkerNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKER_NOT_FOUND",
                format!("Worker not found: {}", id),
                None,
            ),
            AppError::Payout(PayoutError::InsufficientBalance { available, minimum }) => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Pending balance is below the minimum withdrawal threshold".to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "minimum": minimum,
                })),
            ),
            AppError::Payout(PayoutError::RecordNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PAYOUT_RECORD_NOT_FOUND",
                format!("Payout record not found: {}", id),
                None,
            ),
            AppError::Payout(PayoutError::UnlockNotPermitted(reason)) => (
                StatusCode::CONFLICT,
                "UNLOCK_NOT_PERMITTED",
                reason.clone(),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg.clone(),
                None,
            ),
            AppError::Submit(e) => (
                StatusCode::BAD_GATEWAY,
                "SUBMISSION_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Custody(CustodyError::ShareEndpoint(format!(
            "HTTP request error: {:?}",
            error
        )))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(error: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_unknown_classification() {
        let ambiguous = SubmitError::OutcomeUnknown {
            signature: "SIG1".to_string(),
            message: "confirmation timed out".to_string(),
        };
        assert!(ambiguous.outcome_unknown());

        let rejected = SubmitError::Broadcast("blockhash not found".to_string());
        assert!(!rejected.outcome_unknown());
        assert!(!SubmitError::Signature("bad recipient".to_string()).outcome_unknown());
    }

    #[test]
    fn write_conflict_detection() {
        assert!(AppError::WriteConflict.is_write_conflict());
        assert!(!AppError::Internal("boom".to_string()).is_write_conflict());
        assert!(!AppError::Payout(PayoutError::WorkerNotFound(uuid::Uuid::nil()))
            .is_write_conflict());
    }

    #[test]
    fn non_conflict_database_errors_pass_through() {
        let classified = AppError::from_db(sqlx::Error::RowNotFound);
        assert!(matches!(classified, AppError::Database(_)));
        assert!(!classified.is_write_conflict());
    }
}
