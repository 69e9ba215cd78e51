use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::error::Result;
use crate::models::{Booking, BookingEdit, BookingRequest, BookingStatus, PaymentMethod};
use crate::services::bookings::{AdminConfirmation, BulkDeleteResult, QuoteRequest};
use crate::services::notifications::DispatchReport;
use crate::services::pricing::PriceBreakdown;
use crate::store::BookingFilter;

#[derive(Debug, Deserialize)]
struct ListQuery {
    pickup_date: Option<NaiveDate>,
    status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfirmRequest {
    paid_externally: Option<PaymentMethod>,
}

async fn quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<PriceBreakdown>> {
    Ok(Json(state.bookings.quote(&request).await?))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    let booking = state.bookings.create_booking(request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Booking>>> {
    let filter = BookingFilter {
        pickup_date: query.pickup_date,
        status: query.status,
    };
    Ok(Json(state.bookings.list_bookings(&filter).await?))
}

async fn list_deleted(State(state): State<AppState>) -> Result<Json<Vec<Booking>>> {
    Ok(Json(state.bookings.list_deleted().await?))
}

async fn bulk_delete(
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResult>> {
    Ok(Json(state.bookings.bulk_delete(&request.ids).await?))
}

async fn get_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.get_booking(id).await?))
}

async fn edit_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(edit): Json<BookingEdit>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.edit_booking(id, edit).await?))
}

async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.delete_booking(id).await?))
}

async fn approve_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.approve_booking(id).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.cancel_booking(id).await?))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ConfirmRequest>>,
) -> Result<Json<AdminConfirmation>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .bookings
            .confirm_booking(id, request.paid_externally)
            .await?,
    ))
}

async fn restore_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.restore_booking(id).await?))
}

async fn resend_confirmation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchReport>> {
    Ok(Json(state.bookings.resend_confirmation(id).await?))
}

async fn resend_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchReport>> {
    Ok(Json(state.bookings.resend_reminder(id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/quote", post(quote))
        .route("/api/bookings", post(create_booking).get(list_bookings))
        .route("/api/bookings/deleted", get(list_deleted))
        .route("/api/bookings/bulk-delete", post(bulk_delete))
        .route(
            "/api/bookings/:id",
            get(get_booking).put(edit_booking).delete(delete_booking),
        )
        .route("/api/bookings/:id/approve", post(approve_booking))
        .route("/api/bookings/:id/cancel", post(cancel_booking))
        .route("/api/bookings/:id/confirm", post(confirm_booking))
        .route("/api/bookings/:id/restore", post(restore_booking))
        .route(
            "/api/bookings/:id/resend-confirmation",
            post(resend_confirmation),
        )
        .route("/api/bookings/:id/resend-reminder", post(resend_reminder))
}
