mod common;

use chrono::{Duration, NaiveDate, NaiveTime};
use proptest::prelude::*;

use ridebook::models::{BookingEdit, BookingStatus};
use ridebook::services::bookings::BookingError;
use ridebook::services::clock::business_instant;
use ridebook::services::lifecycle::LifecycleError;
use ridebook::store::{BookingFilter, BookingStore};

use common::{booking_request, fixture, pickup_date};

fn pickup_time() -> NaiveTime {
    NaiveTime::from_hms_opt(6, 30, 0).unwrap()
}

#[tokio::test]
async fn status_depends_on_lead_time_at_creation() {
    let pickup = business_instant(pickup_date(), pickup_time());

    let f = fixture(pickup - Duration::hours(23) - Duration::minutes(59));
    let short_notice = f
        .bookings
        .create_booking(booking_request(pickup_date(), pickup_time()))
        .await
        .unwrap();
    assert_eq!(short_notice.status, BookingStatus::PendingApproval);

    f.clock.set(pickup - Duration::hours(24) - Duration::minutes(1));
    let normal = f
        .bookings
        .create_booking(booking_request(pickup_date(), pickup_time()))
        .await
        .unwrap();
    assert_eq!(normal.status, BookingStatus::Pending);
    assert_eq!(normal.reference_number, short_notice.reference_number + 1);
}

#[tokio::test]
async fn return_without_flight_is_rejected_before_persistence() {
    let f = fixture(business_instant(pickup_date(), pickup_time()) - Duration::days(7));
    let mut request = booking_request(pickup_date(), pickup_time());
    request.book_return = true;
    request.return_date = NaiveDate::from_ymd_opt(2026, 3, 9);
    request.return_time = NaiveTime::from_hms_opt(15, 0, 0);
    request.return_flight_number = None;

    let result = f.bookings.create_booking(request).await;

    assert!(matches!(
        result,
        Err(BookingError::Lifecycle(LifecycleError::Validation {
            field: "return_flight_number",
            ..
        }))
    ));
    let stored = f.store.list_bookings(&BookingFilter::default()).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn soft_delete_and_restore_round_trip() {
    let f = fixture(business_instant(pickup_date(), pickup_time()) - Duration::days(7));
    let booking = f
        .bookings
        .create_booking(booking_request(pickup_date(), pickup_time()))
        .await
        .unwrap();

    let deleted = f.bookings.delete_booking(booking.id).await.unwrap();
    assert_eq!(deleted.status, BookingStatus::Deleted);
    assert!(f.bookings.get_booking(booking.id).await.is_err());
    assert!(f
        .bookings
        .list_bookings(&BookingFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(f.bookings.list_deleted().await.unwrap().len(), 1);

    let restored = f.bookings.restore_booking(booking.id).await.unwrap();
    assert_eq!(restored, booking);
    assert!(f.bookings.list_deleted().await.unwrap().is_empty());
}

#[derive(Debug, Clone)]
enum ReturnEdit {
    Set(u32),
    Clear,
    Unrelated,
}

fn return_edit() -> impl Strategy<Value = ReturnEdit> {
    prop_oneof![
        (0u32..20).prop_map(ReturnEdit::Set),
        Just(ReturnEdit::Clear),
        Just(ReturnEdit::Unrelated),
    ]
}

impl ReturnEdit {
    fn to_edit(&self) -> BookingEdit {
        match self {
            ReturnEdit::Set(offset) => BookingEdit {
                return_date: Some(Some(pickup_date() + Duration::days(i64::from(*offset)))),
                return_time: Some(NaiveTime::from_hms_opt(15, 0, 0)),
                return_flight_number: Some(Some("NZ102".to_string())),
                ..Default::default()
            },
            ReturnEdit::Clear => BookingEdit {
                return_date: Some(None),
                ..Default::default()
            },
            ReturnEdit::Unrelated => BookingEdit {
                notes: Some(Some("child seat".to_string())),
                ..Default::default()
            },
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn has_return_never_desynchronises(edits in proptest::collection::vec(return_edit(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let f = fixture(business_instant(pickup_date(), pickup_time()) - Duration::days(7));
            let booking = f
                .bookings
                .create_booking(booking_request(pickup_date(), pickup_time()))
                .await
                .unwrap();

            for edit in &edits {
                let saved = f.bookings.edit_booking(booking.id, edit.to_edit()).await.unwrap();
                assert_eq!(saved.has_return, saved.return_date.is_some());
                let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
                assert_eq!(stored.has_return, stored.return_date.is_some());
            }
        });
    }
}
