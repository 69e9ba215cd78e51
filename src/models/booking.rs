use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::services::pricing::PriceBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingApproval,
    Pending,
    Confirmed,
    Cancelled,
    Deleted,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Deleted => "deleted",
        }
    }

    /// Cancelled and deleted bookings accept no further lifecycle moves
    /// (deleted ones only come back through restore).
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Deleted)
    }

    /// States a successful payment may confirm from.
    pub fn awaiting_confirmation(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::PendingApproval)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Paid and failed are final as far as the provider is concerned.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Cash,
    BankTransfer,
    Import,
}

impl PaymentMethod {
    /// Methods settled outside the card checkout. Only these may be
    /// recorded as paid by an operator.
    pub fn is_external(&self) -> bool {
        !matches!(self, PaymentMethod::Card)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    AirportDropoff,
    AirportPickup,
    PointToPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub reference_number: i64,

    pub service_type: ServiceType,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,

    pub pickup_address: String,
    pub dropoff_addresses: Vec<String>,
    pub pickup_date: NaiveDate, // business timezone
    pub pickup_time: NaiveTime, // business timezone
    pub passengers: i32,
    pub premium_pickup: bool,
    pub oversized_item: bool,
    pub flight_number: Option<String>,
    pub notes: Option<String>,

    pub has_return: bool,
    pub return_date: Option<NaiveDate>,
    pub return_time: Option<NaiveTime>,
    pub return_flight_number: Option<String>,

    pub pricing: Json<PriceBreakdown>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,

    pub status: BookingStatus,
    pub status_before_delete: Option<BookingStatus>,

    pub confirmation_sent: bool,
    pub reminder_sent_for_date: Option<NaiveDate>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_in_progress: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Validated return leg. A return without a flight number cannot be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnTrip {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub flight_number: String,
}

/// Trip details after boundary validation, ready for pricing and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripDetails {
    pub service_type: ServiceType,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub pickup_address: String,
    pub dropoff_addresses: Vec<String>,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub passengers: i32,
    pub premium_pickup: bool,
    pub oversized_item: bool,
    pub flight_number: Option<String>,
    pub notes: Option<String>,
    pub return_trip: Option<ReturnTrip>,
}

/// Booking form as submitted. Loosely typed on purpose: it only becomes a
/// [`TripDetails`] after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub service_type: ServiceType,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub pickup_address: String,
    pub dropoff_addresses: Vec<String>,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub passengers: i32,
    #[serde(default)]
    pub premium_pickup: bool,
    #[serde(default)]
    pub oversized_item: bool,
    #[serde(default)]
    pub flight_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub book_return: bool,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub return_time: Option<NaiveTime>,
    #[serde(default)]
    pub return_flight_number: Option<String>,
    /// Only non-card methods are meaningful here; card bookings pay through
    /// checkout.
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// Everything the store needs to insert a booking. Identity and the
/// reference number are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewBookingRecord {
    pub trip: TripDetails,
    pub pricing: PriceBreakdown,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
}

/// Partial admin edit. For the nullable return fields the outer `Option`
/// means "touch this field" and the inner one is the new value, so
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingEdit {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub customer_phone: Option<Option<String>>,
    pub pickup_address: Option<String>,
    pub dropoff_addresses: Option<Vec<String>>,
    pub pickup_date: Option<NaiveDate>,
    pub pickup_time: Option<NaiveTime>,
    pub passengers: Option<i32>,
    pub premium_pickup: Option<bool>,
    pub oversized_item: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub flight_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub return_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub return_time: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "double_option")]
    pub return_flight_number: Option<Option<String>>,
}

/// Keeps an explicit JSON `null` as `Some(None)` instead of folding it into
/// "field absent".
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl BookingEdit {
    /// True when the edit touches an input of the pricing engine.
    pub fn changes_pricing_inputs(&self) -> bool {
        self.pickup_address.is_some()
            || self.dropoff_addresses.is_some()
            || self.passengers.is_some()
            || self.premium_pickup.is_some()
            || self.oversized_item.is_some()
    }
}

impl Booking {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn total_price(&self) -> rust_decimal::Decimal {
        self.pricing.total
    }

    /// Applies an edit in place. `has_return` is recomputed from
    /// `return_date` here and nowhere else.
    pub fn apply_edit(&mut self, edit: &BookingEdit) {
        if let Some(name) = &edit.customer_name {
            self.customer_name = name.clone();
        }
        if let Some(email) = &edit.customer_email {
            self.customer_email = email.clone();
        }
        if let Some(phone) = &edit.customer_phone {
            self.customer_phone = phone.clone();
        }
        if let Some(pickup) = &edit.pickup_address {
            self.pickup_address = pickup.clone();
        }
        if let Some(dropoffs) = &edit.dropoff_addresses {
            self.dropoff_addresses = dropoffs.clone();
        }
        if let Some(date) = edit.pickup_date {
            self.pickup_date = date;
        }
        if let Some(time) = edit.pickup_time {
            self.pickup_time = time;
        }
        if let Some(passengers) = edit.passengers {
            self.passengers = passengers;
        }
        if let Some(premium) = edit.premium_pickup {
            self.premium_pickup = premium;
        }
        if let Some(oversized) = edit.oversized_item {
            self.oversized_item = oversized;
        }
        if let Some(flight) = &edit.flight_number {
            self.flight_number = flight.clone();
        }
        if let Some(notes) = &edit.notes {
            self.notes = notes.clone();
        }
        if let Some(return_date) = edit.return_date {
            self.return_date = return_date;
        }
        if let Some(return_time) = edit.return_time {
            self.return_time = return_time;
        }
        if let Some(flight) = &edit.return_flight_number {
            self.return_flight_number = flight.clone();
        }

        self.has_return = self.return_date.is_some();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::sample_booking;

    #[test]
    fn test_setting_return_date_sets_flag() {
        let mut booking = sample_booking();
        assert!(!booking.has_return);

        booking.apply_edit(&BookingEdit {
            return_date: Some(NaiveDate::from_ymd_opt(2026, 3, 10)),
            return_flight_number: Some(Some("NZ102".to_string())),
            ..Default::default()
        });
        assert!(booking.has_return);

        booking.apply_edit(&BookingEdit {
            return_date: Some(None),
            ..Default::default()
        });
        assert!(!booking.has_return);
    }

    #[test]
    fn test_unrelated_edit_keeps_flag_in_sync() {
        let mut booking = sample_booking();
        booking.has_return = true; // stale flag from a bad import

        booking.apply_edit(&BookingEdit {
            notes: Some(Some("child seat".to_string())),
            ..Default::default()
        });
        assert!(!booking.has_return);
    }

    #[test]
    fn test_edit_distinguishes_null_from_absent() {
        let edit: BookingEdit =
            serde_json::from_str(r#"{"return_date": null, "notes": "late flight"}"#).unwrap();
        assert_eq!(edit.return_date, Some(None));
        assert_eq!(edit.notes, Some(Some("late flight".to_string())));
        assert_eq!(edit.return_flight_number, None);
    }

    #[test]
    fn test_status_helpers() {
        assert!(BookingStatus::Pending.awaiting_confirmation());
        assert!(BookingStatus::PendingApproval.awaiting_confirmation());
        assert!(!BookingStatus::Confirmed.awaiting_confirmation());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert_eq!(BookingStatus::PendingApproval.to_string(), "pending_approval");
    }
}
