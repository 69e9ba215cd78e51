use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::booking::PaymentStatus;

/// One checkout attempt against the payment provider.
///
/// `payment_status` only ever holds `pending`, `paid` or `failed`; once
/// `paid` it is never rewritten by either the poll or the webhook path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub session_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentTransactionData {
    pub booking_id: Uuid,
    pub session_id: String,
    pub amount: Decimal,
    pub currency: String,
}
