//! Crate-wide error taxonomy.
//!
//! Mirrors the rejection/propagation model in spec.md 7: validation and
//! queue-overflow failures are counted, not surfaced; everything that
//! reaches the HTTP edge is mapped to `{status, code, message}` the way
//! `auth::middleware::AuthError` maps to a response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Reason a single record was rejected by the validator (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SchemaInvalid,
    OutOfBounds,
    PrecisionViolation,
    Stale,
    UnknownSymbol,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SchemaInvalid => "schema_invalid",
            Self::OutOfBounds => "out_of_bounds",
            Self::PrecisionViolation => "precision_violation",
            Self::Stale => "stale",
            Self::UnknownSymbol => "unknown_symbol",
        };
        write!(f, "{s}")
    }
}

/// Top-level application error surfaced to the HTTP layer.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Validation(String),
    ImmutableField(String),
    Conflict(String),
    Storage(anyhow::Error),
    MigrationMismatch(String),
    Internal(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::Validation(m) => write!(f, "validation error: {m}"),
            Self::ImmutableField(m) => write!(f, "immutable field: {m}"),
            Self::Conflict(m) => write!(f, "conflict: {m}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::MigrationMismatch(m) => write!(f, "migration mismatch: {m}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) | Self::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(anyhow::Error::from(e))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Envelope {
    success: bool,
    error: ErrorBody,
}

impl AppError {
    fn code_and_status(&self) -> (&'static str, StatusCode) {
        match self {
            Self::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            Self::Validation(_) => ("validation_error", StatusCode::BAD_REQUEST),
            Self::ImmutableField(_) => ("immutable_field", StatusCode::BAD_REQUEST),
            Self::Conflict(_) => ("conflict", StatusCode::CONFLICT),
            Self::Storage(_) => ("storage_error", StatusCode::INTERNAL_SERVER_ERROR),
            Self::MigrationMismatch(_) => {
                ("migration_mismatch", StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Internal(_) => ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, status) = self.code_and_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Envelope {
            success: false,
            error: ErrorBody {
                code,
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
