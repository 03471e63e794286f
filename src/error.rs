//! Error types shared by the store and the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::commerce::GateError;
use crate::editor::ValidationErrors;

/// Failures of the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} belongs to another account")]
    Forbidden(String),

    #[error(transparent)]
    Gate(#[from] GateError),
}

macro_rules! redb_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for StoreError {
            fn from(err: $ty) -> Self {
                StoreError::Database(err.into())
            }
        })*
    };
}

redb_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Errors returned by request handlers
///
/// Every variant renders as a JSON body `{"error": ..., "code": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("payment required to access link {0}")]
    PaymentRequired(String),
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        AppError::Store(StoreError::Gate(err))
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Store(StoreError::NotFound(_)) | AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AppError::Store(StoreError::Forbidden(_)) | AppError::Forbidden(_) => {
                (StatusCode::FORBIDDEN, "forbidden")
            }
            AppError::Store(StoreError::Gate(GateError::NotLocked(_))) => {
                (StatusCode::BAD_REQUEST, "not_locked")
            }
            AppError::Store(StoreError::Gate(GateError::InvalidTransition { .. })) => {
                (StatusCode::CONFLICT, "invalid_transition")
            }
            AppError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "payment_required"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "store failure");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": code,
        });
        if let AppError::Validation(errors) = &self {
            body["details"] = json!(errors.0.iter().map(ToString::to_string).collect::<Vec<_>>());
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
