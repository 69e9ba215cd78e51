#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use ridebook::models::{BookingRequest, ServiceType};
use ridebook::services::{
    bookings::BookingService,
    calendar::NoopCalendarSync,
    clock::FixedClock,
    distance::UnconfiguredDistanceResolver,
    notifications::RecordingDispatcher,
};
use ridebook::store::InMemoryStore;

/// 2026-03-01 09:00 in Auckland (NZDT).
pub fn morning_before_pickup() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 28, 20, 0, 0).unwrap()
}

pub fn pickup_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn booking_request(pickup_date: NaiveDate, pickup_time: NaiveTime) -> BookingRequest {
    BookingRequest {
        service_type: ServiceType::AirportDropoff,
        customer_name: "Aroha Ngata".to_string(),
        customer_email: "aroha@example.com".to_string(),
        customer_phone: Some("+64211234567".to_string()),
        pickup_address: "12 Queen Street, Auckland".to_string(),
        dropoff_addresses: vec!["Auckland Airport".to_string()],
        pickup_date,
        pickup_time,
        passengers: 2,
        premium_pickup: false,
        oversized_item: false,
        flight_number: Some("NZ101".to_string()),
        notes: None,
        book_return: false,
        return_date: None,
        return_time: None,
        return_flight_number: None,
        payment_method: None,
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingDispatcher>,
    pub clock: Arc<FixedClock>,
    pub bookings: BookingService,
}

pub fn fixture(now: DateTime<Utc>) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingDispatcher::default());
    let clock = Arc::new(FixedClock::new(now));
    let bookings = BookingService::new(
        store.clone(),
        Arc::new(UnconfiguredDistanceResolver),
        notifier.clone(),
        Arc::new(NoopCalendarSync),
        clock.clone(),
        dec!(25),
    );
    Fixture {
        store,
        notifier,
        clock,
        bookings,
    }
}
