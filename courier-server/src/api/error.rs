//! Error type shared by every API handler.
//!
//! Component errors are converted into one of a handful of HTTP-facing
//! categories. Every rejection is a JSON [`ErrorBody`].

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_core::processors::{
    DispatchError, IngestError, LedgerError, UnitCommandError,
};
use courier_core::transitions::TransitionError;
use courier_sdk::objects::ErrorBody;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or semantically invalid request. Never worth retrying as is.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error("{0}")]
    RateLimited(String),
    /// Storage or other unexpected failure. The detail is logged, not returned.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict { code, .. } => *code,
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }

    fn conflict(code: &'static str, message: impl ToString) -> Self {
        ApiError::Conflict {
            code,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error while handling request");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.code().to_string(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Invalid { .. } | TransitionError::NotAJob(_) => {
                ApiError::Validation(e.to_string())
            }
            TransitionError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TransitionError::Contended(_) => ApiError::conflict("contended", e),
            TransitionError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<UnitCommandError> for ApiError {
    fn from(e: UnitCommandError) -> Self {
        match e {
            UnitCommandError::Validation(msg) => ApiError::Validation(msg),
            UnitCommandError::Transition(e) => e.into(),
            UnitCommandError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(_) => ApiError::NotFound(e.to_string()),
            DispatchError::NotDue { .. } => ApiError::conflict("not_due", e),
            DispatchError::Busy(_) => ApiError::conflict("busy", e),
            DispatchError::RateLimited(_) => ApiError::RateLimited(e.to_string()),
            DispatchError::Transition(e) => e.into(),
            DispatchError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidTimestamp(_) => ApiError::Validation(e.to_string()),
            IngestError::Transition(e) => e.into(),
        }
    }
}

impl From<LedgerError<ApiError>> for ApiError {
    fn from(e: LedgerError<ApiError>) -> Self {
        match e {
            LedgerError::MissingKey | LedgerError::KeyTooLong => ApiError::Validation(e.to_string()),
            LedgerError::Conflict => ApiError::conflict("idempotency_conflict", e),
            LedgerError::InProgress => ApiError::conflict("in_progress", e),
            LedgerError::Storage(e) => ApiError::Internal(e.to_string()),
            LedgerError::Operation(e) => e,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Validation(format!("invalid JSON body: {e}"))
    }
}
