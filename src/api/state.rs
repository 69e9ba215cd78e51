use std::sync::Arc;

use sqlx::PgPool;

use crate::jobs::ReminderScheduler;
use crate::services::{bookings::BookingService, payment_reconciler::PaymentReconciler};

/// Shared handler state. `pool` is absent when running on the in-memory
/// store.
#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentReconciler>,
    pub reminders: Arc<ReminderScheduler>,
    pub pool: Option<PgPool>,
}
