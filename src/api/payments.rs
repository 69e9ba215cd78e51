use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::services::payment_reconciler::{CheckoutStarted, ReconcileOutcome};

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    booking_id: Uuid,
}

async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutStarted>> {
    Ok(Json(state.payments.start_checkout(request.booking_id).await?))
}

/// Poll channel: the client asks after returning from checkout.
async fn payment_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ReconcileOutcome>> {
    Ok(Json(state.payments.poll_session(&session_id).await?))
}

/// Push channel: provider webhook. Needs the raw body for the signature.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Webhook("missing Stripe-Signature header".to_string()))?;

    let outcome = state.payments.handle_webhook(&body, signature).await?;

    Ok(Json(json!({
        "received": true,
        "transitioned": outcome.map_or(false, |o| o.transitioned),
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/checkout", post(start_checkout))
        .route("/api/payments/status/:session_id", get(payment_status))
        .route("/api/webhooks/stripe", post(stripe_webhook))
}
