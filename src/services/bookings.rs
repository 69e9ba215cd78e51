use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Booking, BookingEdit, BookingRequest, BookingStatus, NewBookingRecord, PaymentMethod,
    PaymentStatus,
};
use crate::services::calendar::CalendarSync;
use crate::services::clock::Clock;
use crate::services::distance::{resolve_or_fallback, DistanceResolver};
use crate::services::lifecycle::{
    admin_confirmation_method, initial_status, sources_for, validate_edited,
    validate_request, LifecycleError,
};
use crate::services::notifications::{DispatchReport, NotificationDispatcher};
use crate::services::payment_reconciler::dispatch_confirmation;
use crate::services::pricing::{calculate_price, PriceBreakdown, PricingError, PricingInput};
use crate::store::{BookingFilter, BookingStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Booking not found: {0}")]
    NotFound(Uuid),
}

/// Inputs for a price quote that is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub pickup_address: String,
    pub dropoff_addresses: Vec<String>,
    pub passengers: i32,
    #[serde(default)]
    pub premium_pickup: bool,
    #[serde(default)]
    pub oversized_item: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminConfirmation {
    pub booking: Booking,
    pub notifications: DispatchReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteResult {
    pub deleted: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
}

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    distance: Arc<dyn DistanceResolver>,
    notifier: Arc<dyn NotificationDispatcher>,
    calendar: Arc<dyn CalendarSync>,
    clock: Arc<dyn Clock>,
    fallback_distance_km: Decimal,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        distance: Arc<dyn DistanceResolver>,
        notifier: Arc<dyn NotificationDispatcher>,
        calendar: Arc<dyn CalendarSync>,
        clock: Arc<dyn Clock>,
        fallback_distance_km: Decimal,
    ) -> Self {
        Self {
            store,
            distance,
            notifier,
            calendar,
            clock,
            fallback_distance_km,
        }
    }

    async fn price(
        &self,
        pickup: &str,
        dropoffs: &[String],
        passengers: i32,
        premium_pickup: bool,
        oversized_item: bool,
    ) -> Result<PriceBreakdown, BookingError> {
        let distance = resolve_or_fallback(
            self.distance.as_ref(),
            pickup,
            dropoffs,
            self.fallback_distance_km,
        )
        .await;

        Ok(calculate_price(&PricingInput {
            distance,
            passengers,
            premium_pickup,
            oversized_item,
        })?)
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn quote(&self, request: &QuoteRequest) -> Result<PriceBreakdown, BookingError> {
        if request.pickup_address.trim().is_empty() || request.dropoff_addresses.is_empty() {
            return Err(LifecycleError::Validation {
                field: "dropoff_addresses",
                message: "pickup and at least one drop-off are required".to_string(),
            }
            .into());
        }
        self.price(
            &request.pickup_address,
            &request.dropoff_addresses,
            request.passengers,
            request.premium_pickup,
            request.oversized_item,
        )
        .await
    }

    /// Validates, prices and stores a new booking. The initial status
    /// depends on how far away the pickup is right now.
    #[tracing::instrument(skip(self, request), fields(pickup_date = %request.pickup_date))]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, BookingError> {
        let payment_method = request.payment_method.unwrap_or(PaymentMethod::Card);
        let trip = validate_request(request)?;

        let pricing = self
            .price(
                &trip.pickup_address,
                &trip.dropoff_addresses,
                trip.passengers,
                trip.premium_pickup,
                trip.oversized_item,
            )
            .await?;
        let status = initial_status(trip.pickup_date, trip.pickup_time, self.clock.now());

        let booking = self
            .store
            .insert_booking(NewBookingRecord {
                trip,
                pricing,
                payment_method,
                payment_status: PaymentStatus::Unpaid,
                status,
            })
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            reference_number = booking.reference_number,
            status = %booking.status,
            total = %booking.total_price(),
            distance_estimated = booking.pricing.distance_estimated,
            "Booking created"
        );

        Ok(booking)
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.store
            .get_booking(id)
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.list_bookings(filter).await?)
    }

    pub async fn list_deleted(&self) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.list_deleted().await?)
    }

    /// Applies an admin edit. Pricing is recomputed when a pricing input
    /// changed; reminder bookkeeping resets when the pickup date moved.
    #[tracing::instrument(skip(self, edit))]
    pub async fn edit_booking(&self, id: Uuid, edit: BookingEdit) -> Result<Booking, BookingError> {
        let mut booking = self.get_booking(id).await?;
        if booking.status.is_terminal() {
            return Err(LifecycleError::Validation {
                field: "status",
                message: format!("{} bookings cannot be edited", booking.status),
            }
            .into());
        }

        booking.apply_edit(&edit);
        validate_edited(&booking)?;

        if edit.changes_pricing_inputs() {
            let pricing = self
                .price(
                    &booking.pickup_address,
                    &booking.dropoff_addresses,
                    booking.passengers,
                    booking.premium_pickup,
                    booking.oversized_item,
                )
                .await?;
            booking.pricing = sqlx::types::Json(pricing);
        }

        let saved = self
            .store
            .save_trip_details(&booking)
            .await?
            .ok_or(BookingError::NotFound(id))?;

        tracing::info!(booking_id = %id, total = %saved.total_price(), "Booking edited");
        Ok(saved)
    }

    /// Conditional status change; a lost race reports the status the
    /// booking actually has.
    async fn move_to(&self, id: Uuid, to: BookingStatus) -> Result<Booking, BookingError> {
        if let Some(booking) = self.store.transition_status(id, sources_for(to), to).await? {
            tracing::info!(booking_id = %id, status = %to, "Booking status changed");
            return Ok(booking);
        }

        let current = self.get_booking(id).await?;
        Err(LifecycleError::InvalidTransition {
            from: current.status,
            to,
        }
        .into())
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.move_to(id, BookingStatus::Pending).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.move_to(id, BookingStatus::Cancelled).await
    }

    /// Admin override of payment-driven confirmation. Uses the same
    /// confirmation claim as the payment path, so it cannot double-send.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_booking(
        &self,
        id: Uuid,
        paid_externally: Option<PaymentMethod>,
    ) -> Result<AdminConfirmation, BookingError> {
        let booking = self.get_booking(id).await?;
        let method = admin_confirmation_method(&booking, paid_externally)?;

        let Some(confirmed) = self.store.confirm_if_unconfirmed(id, method).await? else {
            let current = self.get_booking(id).await?;
            return Err(LifecycleError::InvalidTransition {
                from: current.status,
                to: BookingStatus::Confirmed,
            }
            .into());
        };

        tracing::info!(
            booking_id = %id,
            payment_method = ?confirmed.payment_method,
            "Booking confirmed by admin"
        );
        let notifications =
            dispatch_confirmation(self.notifier.as_ref(), self.calendar.as_ref(), &confirmed)
                .await;

        Ok(AdminConfirmation {
            booking: confirmed,
            notifications,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        let deleted = self
            .store
            .soft_delete(id)
            .await?
            .ok_or(BookingError::NotFound(id))?;
        tracing::info!(booking_id = %id, "Booking moved to deleted store");
        Ok(deleted)
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn bulk_delete(&self, ids: &[Uuid]) -> Result<BulkDeleteResult, BookingError> {
        let mut result = BulkDeleteResult::default();
        for &id in ids {
            match self.store.soft_delete(id).await? {
                Some(_) => result.deleted.push(id),
                None => result.not_found.push(id),
            }
        }
        tracing::info!(
            deleted = result.deleted.len(),
            not_found = result.not_found.len(),
            "Bulk delete completed"
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn restore_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        let restored = self
            .store
            .restore(id)
            .await?
            .ok_or(BookingError::NotFound(id))?;
        tracing::info!(booking_id = %id, status = %restored.status, "Booking restored");
        Ok(restored)
    }

    fn require_confirmed(booking: &Booking) -> Result<(), BookingError> {
        if booking.status == BookingStatus::Confirmed {
            Ok(())
        } else {
            Err(LifecycleError::Validation {
                field: "status",
                message: format!("booking is {}, not confirmed", booking.status),
            }
            .into())
        }
    }

    /// Operator resend. Bypasses the confirmation claim on purpose.
    #[tracing::instrument(skip(self))]
    pub async fn resend_confirmation(&self, id: Uuid) -> Result<DispatchReport, BookingError> {
        let booking = self.get_booking(id).await?;
        Self::require_confirmed(&booking)?;

        tracing::warn!(booking_id = %id, "Manual confirmation resend requested");
        let report = self.notifier.send_confirmation(&booking).await;
        if report.any_sent() {
            self.store.mark_confirmation_sent(id).await?;
        }
        Ok(report)
    }

    /// Operator resend of the reminder. Claims the pickup date first, so a
    /// later scheduled pass skips this booking, but sends whether or not the
    /// claim was won.
    #[tracing::instrument(skip(self))]
    pub async fn resend_reminder(&self, id: Uuid) -> Result<DispatchReport, BookingError> {
        let booking = self.get_booking(id).await?;
        Self::require_confirmed(&booking)?;

        let claimed = self
            .store
            .claim_reminder(id, booking.pickup_date)
            .await?
            .is_some();
        tracing::warn!(booking_id = %id, claimed, "Manual reminder resend requested");
        self.store.set_reminder_in_progress(id, true).await?;

        let report = self.notifier.send_reminder(&booking).await;

        if report.any_sent() {
            self.store.mark_reminder_sent(id, self.clock.now()).await?;
        }
        self.store.set_reminder_in_progress(id, false).await?;
        Ok(report)
    }
}
