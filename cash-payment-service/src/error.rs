//! Error taxonomy for the cash-payment subsystem and its HTTP mapping.
//!
//! Every variant a client can act on carries its own status and stable
//! `code`, so "this code can no longer be redeemed" is never collapsed into a
//! generic failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel_async::pooled_connection::PoolError;
use serde::Serialize;
use shared::ReservationStatus;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CashPaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum CashPaymentError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown item with barcode {barcode}")]
    UnknownItem { barcode: String },

    #[error("not enough stock for {barcode}: requested {requested}, available {available}")]
    InsufficientStock {
        barcode: String,
        requested: i32,
        available: i32,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cannot {action} a reservation in status {status}")]
    InvalidState {
        action: &'static str,
        status: ReservationStatus,
    },

    #[error("this cash code has already been used")]
    AlreadyUsed,

    #[error("this cash code was cancelled, request a new one")]
    Cancelled,

    #[error("this cash code has expired, request a new one")]
    Expired,

    #[error("user {user_id} already has an active reservation {reservation_id}")]
    ActiveReservationExists { user_id: i32, reservation_id: Uuid },

    #[error("conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("caller is not allowed to {0}")]
    Forbidden(&'static str),

    #[error("missing or invalid caller identity")]
    Unauthenticated,

    #[error("could not allocate a unique cash code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("database error: {0}")]
    Storage(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<bb8::RunError<PoolError>> for CashPaymentError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        CashPaymentError::Pool(err.to_string())
    }
}

impl CashPaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CashPaymentError::Validation(_) | CashPaymentError::UnknownItem { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CashPaymentError::InsufficientStock { .. }
            | CashPaymentError::InvalidState { .. }
            | CashPaymentError::AlreadyUsed
            | CashPaymentError::ActiveReservationExists { .. }
            | CashPaymentError::Conflict(_) => StatusCode::CONFLICT,
            CashPaymentError::Cancelled | CashPaymentError::Expired => StatusCode::GONE,
            CashPaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            CashPaymentError::Forbidden(_) => StatusCode::FORBIDDEN,
            CashPaymentError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CashPaymentError::CodeSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CashPaymentError::Storage(_)
            | CashPaymentError::Pool(_)
            | CashPaymentError::Serialization(_)
            | CashPaymentError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            CashPaymentError::Validation(_) => "VALIDATION_ERROR",
            CashPaymentError::UnknownItem { .. } => "UNKNOWN_ITEM",
            CashPaymentError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CashPaymentError::NotFound(_) => "NOT_FOUND",
            CashPaymentError::InvalidState { .. } => "INVALID_STATE",
            CashPaymentError::AlreadyUsed => "ALREADY_USED",
            CashPaymentError::Cancelled => "CODE_CANCELLED",
            CashPaymentError::Expired => "CODE_EXPIRED",
            CashPaymentError::ActiveReservationExists { .. } => "ACTIVE_RESERVATION_EXISTS",
            CashPaymentError::Conflict(_) => "CONFLICT",
            CashPaymentError::Forbidden(_) => "FORBIDDEN",
            CashPaymentError::Unauthenticated => "UNAUTHENTICATED",
            CashPaymentError::CodeSpaceExhausted { .. } => "CODE_SPACE_EXHAUSTED",
            CashPaymentError::Storage(_)
            | CashPaymentError::Pool(_)
            | CashPaymentError::Serialization(_)
            | CashPaymentError::Corrupt(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for CashPaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
            if matches!(self, CashPaymentError::CodeSpaceExhausted { .. }) {
                self.to_string()
            } else {
                "An internal error occurred".to_string()
            }
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
            self.to_string()
        };

        let body = ErrorResponse {
            code: self.error_code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
