use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::bookings::BookingError;
use crate::services::lifecycle::LifecycleError;
use crate::services::payment_reconciler::ReconcileError;
use crate::services::pricing::PricingError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid webhook: {0}")]
    Webhook(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn booking_not_found(id: Uuid) -> Self {
        AppError::NotFound(format!("booking {}", id))
    }
}

impl From<LifecycleError> for AppError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation { field, message } => AppError::Validation {
                field: Some(field.to_string()),
                message: format!("{}: {}", field, message),
            },
            LifecycleError::InvalidTransition { .. } | LifecycleError::NotPaid => {
                AppError::Conflict(e.to_string())
            }
        }
    }
}

impl From<PricingError> for AppError {
    fn from(e: PricingError) -> Self {
        let field = match e {
            PricingError::InvalidDistance(_) => "distance",
            PricingError::InvalidPassengers(_) => "passengers",
        };
        AppError::Validation {
            field: Some(field.to_string()),
            message: e.to_string(),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::Lifecycle(e) => e.into(),
            BookingError::Pricing(e) => e.into(),
            BookingError::Store(e) => e.into(),
            BookingError::NotFound(id) => AppError::booking_not_found(id),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Provider(e) => AppError::PaymentProvider(e.to_string()),
            ReconcileError::Webhook(e) => AppError::Webhook(e.to_string()),
            ReconcileError::UnknownSession(id) => {
                AppError::NotFound(format!("checkout session {}", id))
            }
            ReconcileError::BookingNotFound(id) => AppError::booking_not_found(id),
            ReconcileError::NotPayable { .. } => AppError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, field) = match &self {
            AppError::Validation { field, message } => {
                (StatusCode::BAD_REQUEST, message.clone(), field.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            AppError::Webhook(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::PaymentProvider(msg) => {
                tracing::error!(error = %msg, "Payment provider error");
                (StatusCode::BAD_GATEWAY, "Payment provider error".to_string(), None)
            }
            AppError::Store(e) => {
                tracing::error!(error = %e, "Persistence error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": error_message,
            "field": field,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
