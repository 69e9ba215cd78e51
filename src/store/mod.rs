// Store module - Persistence seams for bookings and payment transactions
//
// Every "should I perform this one-time side effect" decision is a
// conditional write here: it returns `Some(record)` when this call changed
// the record and `None` when the precondition no longer held.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, CreatePaymentTransactionData, NewBookingRecord, PaymentMethod,
    PaymentStatus, PaymentTransaction,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Filter for listing active bookings.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub pickup_date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.pickup_date.map_or(true, |d| booking.pickup_date == d)
            && self.status.map_or(true, |s| booking.status == s)
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Inserts a booking, assigning its id and next reference number.
    async fn insert_booking(&self, record: NewBookingRecord) -> StoreResult<Booking>;

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Active (not soft-deleted) bookings, ordered by pickup date and time.
    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>>;

    /// Persists the editable trip fields and pricing of an already-edited
    /// booking. Reminder bookkeeping is never taken from `booking`; it is
    /// cleared in the same write only when the pickup date changes.
    async fn save_trip_details(&self, booking: &Booking) -> StoreResult<Option<Booking>>;

    /// Moves `id` to `to` only if its current status is one of `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>>;

    /// Claim for the confirmation notification: sets `status=confirmed`,
    /// `payment_status=paid` and `confirmation_sent=true`, only if the
    /// booking is still pending or pending approval.
    async fn confirm_if_unconfirmed(
        &self,
        id: Uuid,
        payment_method: Option<PaymentMethod>,
    ) -> StoreResult<Option<Booking>>;

    /// Updates payment status, never moving a booking away from `paid`.
    async fn set_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<Option<Booking>>;

    async fn mark_confirmation_sent(&self, id: Uuid) -> StoreResult<()>;

    /// Moves the booking into the recoverable deleted store.
    async fn soft_delete(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Moves a soft-deleted booking back, exactly as it was.
    async fn restore(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn list_deleted(&self) -> StoreResult<Vec<Booking>>;

    /// Confirmed, active bookings on `date` whose reminder for `date` has
    /// not been claimed yet.
    async fn find_reminder_candidates(&self, date: NaiveDate) -> StoreResult<Vec<Booking>>;

    /// Active bookings with a pickup on `date`, regardless of status.
    async fn count_active_on(&self, date: NaiveDate) -> StoreResult<i64>;

    /// Claim for the reminder on `date`: sets `reminder_sent_for_date` only
    /// if the booking still matches the candidate predicate.
    async fn claim_reminder(&self, id: Uuid, date: NaiveDate) -> StoreResult<Option<Booking>>;

    async fn mark_reminder_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_reminder_in_progress(&self, id: Uuid, in_progress: bool) -> StoreResult<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_transaction(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction>;

    /// Inserts unless a record for the session already exists; returns the
    /// stored record either way.
    async fn insert_transaction_if_absent(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction>;

    async fn find_transaction_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentTransaction>>;

    async fn list_transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> StoreResult<Vec<PaymentTransaction>>;

    /// Moves the transaction to `status` unless it is already `paid` or
    /// already at `status`. `Some` means this call made the change.
    async fn transition_transaction(
        &self,
        session_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Option<PaymentTransaction>>;
}
