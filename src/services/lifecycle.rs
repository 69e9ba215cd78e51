// Lifecycle rules - initial status, allowed transitions and the boundary
// validation that turns a booking form into trip details.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::models::{
    Booking, BookingRequest, BookingStatus, PaymentMethod, PaymentStatus, ReturnTrip,
    TripDetails,
};
use crate::services::clock::business_instant;

pub const MAX_PASSENGERS: i32 = 11;

/// Bookings picking up sooner than this after creation need a human
/// sign-off before they are dispatched.
pub fn approval_lead_time() -> Duration {
    Duration::hours(24)
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LifecycleError {
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking is unpaid; take payment or record a non-card payment method")]
    NotPaid,
}

fn invalid(field: &'static str, message: impl Into<String>) -> LifecycleError {
    LifecycleError::Validation {
        field,
        message: message.into(),
    }
}

/// Status a booking starts in, given when it is created.
pub fn initial_status(
    pickup_date: NaiveDate,
    pickup_time: NaiveTime,
    now: DateTime<Utc>,
) -> BookingStatus {
    let lead_time = business_instant(pickup_date, pickup_time) - now;
    if lead_time < approval_lead_time() {
        BookingStatus::PendingApproval
    } else {
        BookingStatus::Pending
    }
}

/// States from which a booking may be moved to `to`.
pub fn sources_for(to: BookingStatus) -> &'static [BookingStatus] {
    match to {
        BookingStatus::Pending => &[BookingStatus::PendingApproval],
        BookingStatus::Confirmed => &[BookingStatus::Pending, BookingStatus::PendingApproval],
        BookingStatus::Cancelled => &[
            BookingStatus::PendingApproval,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
        ],
        BookingStatus::Deleted => &[
            BookingStatus::PendingApproval,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
        ],
        BookingStatus::PendingApproval => &[],
    }
}

pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), LifecycleError> {
    if sources_for(to).contains(&from) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// Decides how an admin confirmation records payment.
///
/// Returns the payment method to record (`None` keeps the current one).
/// A booking may only be confirmed unpaid when the admin names the non-card
/// channel it was paid through.
pub fn admin_confirmation_method(
    booking: &Booking,
    paid_externally: Option<PaymentMethod>,
) -> Result<Option<PaymentMethod>, LifecycleError> {
    check_transition(booking.status, BookingStatus::Confirmed)?;

    if booking.payment_status == PaymentStatus::Paid {
        return Ok(None);
    }
    match paid_externally {
        Some(method) if method.is_external() => Ok(Some(method)),
        Some(_) => Err(invalid(
            "paid_externally",
            "card payments are confirmed by the payment provider",
        )),
        None => Err(LifecycleError::NotPaid),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_customer(name: &str, email: &str) -> Result<(), LifecycleError> {
    if name.trim().is_empty() {
        return Err(invalid("customer_name", "is required"));
    }
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(invalid("customer_email", "is not a valid email address")),
    }
}

fn check_route(pickup: &str, dropoffs: &[String]) -> Result<(), LifecycleError> {
    if pickup.trim().is_empty() {
        return Err(invalid("pickup_address", "is required"));
    }
    if dropoffs.is_empty() {
        return Err(invalid("dropoff_addresses", "at least one drop-off is required"));
    }
    if dropoffs.iter().any(|d| d.trim().is_empty()) {
        return Err(invalid("dropoff_addresses", "drop-off address cannot be blank"));
    }
    Ok(())
}

fn check_passengers(passengers: i32) -> Result<(), LifecycleError> {
    if (1..=MAX_PASSENGERS).contains(&passengers) {
        Ok(())
    } else {
        Err(invalid(
            "passengers",
            format!("must be between 1 and {}", MAX_PASSENGERS),
        ))
    }
}

fn build_return(
    pickup_date: NaiveDate,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    flight_number: Option<String>,
) -> Result<ReturnTrip, LifecycleError> {
    let date = date.ok_or_else(|| invalid("return_date", "is required for a return trip"))?;
    let time = time.ok_or_else(|| invalid("return_time", "is required for a return trip"))?;
    let flight_number = non_blank(flight_number)
        .ok_or_else(|| invalid("return_flight_number", "is required for a return trip"))?;
    if date < pickup_date {
        return Err(invalid("return_date", "cannot be before the pickup date"));
    }
    Ok(ReturnTrip {
        date,
        time,
        flight_number,
    })
}

/// Validates a submitted booking form. A return leg is requested by
/// `book_return` or by supplying a return date, and then needs all of its
/// fields.
pub fn validate_request(request: BookingRequest) -> Result<TripDetails, LifecycleError> {
    check_customer(&request.customer_name, &request.customer_email)?;
    check_route(&request.pickup_address, &request.dropoff_addresses)?;
    check_passengers(request.passengers)?;

    let return_trip = if request.book_return || request.return_date.is_some() {
        Some(build_return(
            request.pickup_date,
            request.return_date,
            request.return_time,
            request.return_flight_number,
        )?)
    } else {
        None
    };

    Ok(TripDetails {
        service_type: request.service_type,
        customer_name: request.customer_name.trim().to_string(),
        customer_email: request.customer_email.trim().to_string(),
        customer_phone: non_blank(request.customer_phone),
        pickup_address: request.pickup_address.trim().to_string(),
        dropoff_addresses: request
            .dropoff_addresses
            .into_iter()
            .map(|d| d.trim().to_string())
            .collect(),
        pickup_date: request.pickup_date,
        pickup_time: request.pickup_time,
        passengers: request.passengers,
        premium_pickup: request.premium_pickup,
        oversized_item: request.oversized_item,
        flight_number: non_blank(request.flight_number),
        notes: non_blank(request.notes),
        return_trip,
    })
}

/// Re-checks a booking after an admin edit has been applied to it.
pub fn validate_edited(booking: &Booking) -> Result<(), LifecycleError> {
    check_customer(&booking.customer_name, &booking.customer_email)?;
    check_route(&booking.pickup_address, &booking.dropoff_addresses)?;
    check_passengers(booking.passengers)?;

    if booking.has_return != booking.return_date.is_some() {
        return Err(invalid("return_date", "return flag out of sync"));
    }
    if let Some(return_date) = booking.return_date {
        build_return(
            booking.pickup_date,
            Some(return_date),
            booking.return_time,
            booking.return_flight_number.clone(),
        )?;
    }
    Ok(())
}
