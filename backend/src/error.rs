//! Error handling for the Stock Valuation Engine
//!
//! Every error carries a stable machine-readable code plus a human-readable
//! message; stock shortfalls also carry the per-item detail list.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{DomainError, StockShortfall};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication and authorization errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("No access to location {0}")]
    LocationAccessDenied(Uuid),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        code: &'static str,
        message: String,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid manday count: {0}")]
    InvalidMandayCount(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    // State conflicts
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Period {0} is closed")]
    PeriodClosed(Uuid),

    #[error("Period {period_id} is {status}, not OPEN")]
    PeriodNotOpen { period_id: Uuid, status: String },

    #[error("Insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("{} location(s) not ready to close", .0.len())]
    LocationsNotReady(Vec<Uuid>),

    #[error("Reconciliation for location {0} has not been confirmed")]
    ReconciliationNotConfirmed(Uuid),

    // Infrastructure errors
    #[error("Transaction timed out")]
    TransactionTimeout,

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Error families callers can branch on without matching every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ValidationError,
    AuthorizationError,
    StateConflict,
    NotFound,
    TransactionTimeout,
    InternalError,
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::LocationAccessDenied(_) => "LOCATION_ACCESS_DENIED",
            AppError::Validation { code, .. } => *code,
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::InvalidMandayCount(_) => "INVALID_MANDAY_COUNT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            AppError::PeriodClosed(_) => "PERIOD_CLOSED",
            AppError::PeriodNotOpen { .. } => "PERIOD_NOT_OPEN",
            AppError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            AppError::LocationsNotReady(_) => "LOCATIONS_NOT_READY",
            AppError::ReconciliationNotConfirmed(_) => "RECONCILIATION_NOT_CONFIRMED",
            AppError::TransactionTimeout => "TRANSACTION_TIMEOUT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Validation { .. }
            | AppError::InvalidQuantity(_)
            | AppError::InvalidMandayCount(_) => ErrorCategory::ValidationError,
            AppError::Unauthorized(_)
            | AppError::Forbidden(_)
            | AppError::LocationAccessDenied(_) => ErrorCategory::AuthorizationError,
            AppError::DuplicateEntry(_)
            | AppError::InvalidStatusTransition { .. }
            | AppError::PeriodClosed(_)
            | AppError::PeriodNotOpen { .. }
            | AppError::InsufficientStock(_)
            | AppError::LocationsNotReady(_)
            | AppError::ReconciliationNotConfirmed(_) => ErrorCategory::StateConflict,
            AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::TransactionTimeout => ErrorCategory::TransactionTimeout,
            AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => ErrorCategory::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::LocationAccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TransactionTimeout => StatusCode::SERVICE_UNAVAILABLE,
            _ => match self.category() {
                ErrorCategory::ValidationError => StatusCode::BAD_REQUEST,
                ErrorCategory::StateConflict => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let (message, field, details) = match self {
            AppError::Validation { field, message, .. } => (message.clone(), Some(field.clone()), None),
            AppError::NotFound(resource) => (format!("{} not found", resource), None, None),
            AppError::DuplicateEntry(field) => (
                format!("A record with this {} already exists", field),
                Some(field.clone()),
                None,
            ),
            AppError::InsufficientStock(shortfalls) => (
                self.to_string(),
                None,
                serde_json::to_value(shortfalls).ok(),
            ),
            AppError::LocationsNotReady(locations) => (
                self.to_string(),
                None,
                serde_json::to_value(locations).ok(),
            ),
            // Never leak driver or internal messages
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None, None),
            AppError::InternalError(_) | AppError::Internal(_) => {
                ("An internal server error occurred".to_string(), None, None)
            }
            _ => (self.to_string(), None, None),
        };

        ErrorDetail {
            code: self.code().to_string(),
            category: self.category(),
            message,
            field,
            details,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // lock_not_available, query_canceled (statement_timeout)
                Some("55P03") | Some("57014") => return AppError::TransactionTimeout,
                // deadlock_detected, serialization_failure
                Some("40P01") | Some("40001") => return AppError::TransactionTimeout,
                Some("23505") => {
                    let constraint = db_err.constraint().unwrap_or("key").to_string();
                    return AppError::DuplicateEntry(constraint);
                }
                Some("23514") | Some("23P01") => {
                    let constraint = db_err.constraint().unwrap_or("request").to_string();
                    return AppError::Validation {
                        message: format!("Rejected by constraint {}", constraint),
                        field: constraint,
                        code: "CONSTRAINT_VIOLATION",
                    };
                }
                _ => {}
            }
        }
        if let sqlx::Error::PoolTimedOut = err {
            return AppError::TransactionTimeout;
        }
        AppError::DatabaseError(err)
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidQuantity(q) => AppError::InvalidQuantity(format!("quantity must be positive, got {}", q)),
            DomainError::InvalidMandayCount(m) => {
                AppError::InvalidMandayCount(format!("total mandays must be positive, got {}", m))
            }
            DomainError::InvalidStatusTransition { from, to } => AppError::InvalidStatusTransition { from, to },
            DomainError::FinancialImpactRequired => AppError::Validation {
                field: "financial_impact".to_string(),
                code: "FINANCIAL_IMPACT_REQUIRED",
                message: err.to_string(),
            },
            DomainError::ResolutionTypeRequired => AppError::Validation {
                field: "resolution_type".to_string(),
                code: "RESOLUTION_TYPE_REQUIRED",
                message: err.to_string(),
            },
            DomainError::InsufficientStock(shortfalls) => AppError::InsufficientStock(shortfalls),
            DomainError::SameLocation => AppError::Validation {
                field: "to_location_id".to_string(),
                code: "SAME_LOCATION",
                message: err.to_string(),
            },
            // Unparseable text in a status column is a data fault, not user input
            DomainError::UnknownVariant { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let (field, message) = field_errors
            .iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("request".to_string(), errors.to_string()));
        AppError::validation(field, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();

        // Log the error for debugging
        if status.is_server_error() {
            tracing::error!(code = %detail.code, "Error: {:?}", self);
        } else {
            tracing::debug!(code = %detail.code, "Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
