use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BookingFilter, BookingStore, PaymentStore, StoreError, StoreResult};
use crate::models::{
    Booking, BookingStatus, CreatePaymentTransactionData, NewBookingRecord, PaymentMethod,
    PaymentStatus, PaymentTransaction,
};

const FIRST_REFERENCE_NUMBER: i64 = 10001;

#[derive(Debug)]
struct State {
    bookings: HashMap<Uuid, Booking>,
    deleted: HashMap<Uuid, Booking>,
    transactions: HashMap<String, PaymentTransaction>,
    next_reference: i64,
}

/// Process-local store with the same compare-and-set semantics as
/// [`super::PgStore`]. Each conditional write holds the lock for the whole
/// test-and-set, which is what a single `UPDATE ... WHERE` gives Postgres.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                bookings: HashMap::new(),
                deleted: HashMap::new(),
                transactions: HashMap::new(),
                next_reference: FIRST_REFERENCE_NUMBER,
            }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_reminder_candidate(booking: &Booking, date: NaiveDate) -> bool {
    booking.pickup_date == date
        && booking.status == BookingStatus::Confirmed
        && !booking.is_deleted()
        && booking.reminder_sent_for_date != Some(date)
}

fn sort_by_pickup(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        (a.pickup_date, a.pickup_time, a.reference_number).cmp(&(
            b.pickup_date,
            b.pickup_time,
            b.reference_number,
        ))
    });
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert_booking(&self, record: NewBookingRecord) -> StoreResult<Booking> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let trip = record.trip;
        let (return_date, return_time, return_flight_number) = match trip.return_trip {
            Some(ret) => (Some(ret.date), Some(ret.time), Some(ret.flight_number)),
            None => (None, None, None),
        };

        let booking = Booking {
            id: Uuid::new_v4(),
            reference_number: state.next_reference,
            service_type: trip.service_type,
            customer_name: trip.customer_name,
            customer_email: trip.customer_email,
            customer_phone: trip.customer_phone,
            pickup_address: trip.pickup_address,
            dropoff_addresses: trip.dropoff_addresses,
            pickup_date: trip.pickup_date,
            pickup_time: trip.pickup_time,
            passengers: trip.passengers,
            premium_pickup: trip.premium_pickup,
            oversized_item: trip.oversized_item,
            flight_number: trip.flight_number,
            notes: trip.notes,
            has_return: return_date.is_some(),
            return_date,
            return_time,
            return_flight_number,
            pricing: Json(record.pricing),
            payment_method: record.payment_method,
            payment_status: record.payment_status,
            status: record.status,
            status_before_delete: None,
            confirmation_sent: false,
            reminder_sent_for_date: None,
            reminder_sent_at: None,
            reminder_in_progress: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        state.next_reference += 1;
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let state = self.state.lock().await;
        Ok(state.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        sort_by_pickup(&mut bookings);
        Ok(bookings)
    }

    async fn save_trip_details(&self, booking: &Booking) -> StoreResult<Option<Booking>> {
        if booking.has_return != booking.return_date.is_some() {
            return Err(StoreError::Constraint(
                "has_return must match presence of return_date".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let Some(current) = state.bookings.get_mut(&booking.id) else {
            return Ok(None);
        };

        current.customer_name = booking.customer_name.clone();
        current.customer_email = booking.customer_email.clone();
        current.customer_phone = booking.customer_phone.clone();
        current.pickup_address = booking.pickup_address.clone();
        current.dropoff_addresses = booking.dropoff_addresses.clone();
        if current.pickup_date != booking.pickup_date {
            // Reminder bookkeeping belongs to the old date.
            current.reminder_sent_for_date = None;
            current.reminder_sent_at = None;
            current.reminder_in_progress = false;
        }
        current.pickup_date = booking.pickup_date;
        current.pickup_time = booking.pickup_time;
        current.passengers = booking.passengers;
        current.premium_pickup = booking.premium_pickup;
        current.oversized_item = booking.oversized_item;
        current.flight_number = booking.flight_number.clone();
        current.notes = booking.notes.clone();
        current.has_return = booking.has_return;
        current.return_date = booking.return_date;
        current.return_time = booking.return_time;
        current.return_flight_number = booking.return_flight_number.clone();
        current.pricing = booking.pricing.clone();
        current.updated_at = Utc::now();

        Ok(Some(current.clone()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(&id) {
            Some(booking) if from.contains(&booking.status) => {
                booking.status = to;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn confirm_if_unconfirmed(
        &self,
        id: Uuid,
        payment_method: Option<PaymentMethod>,
    ) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(&id) {
            Some(booking) if booking.status.awaiting_confirmation() => {
                booking.status = BookingStatus::Confirmed;
                booking.payment_status = PaymentStatus::Paid;
                if let Some(method) = payment_method {
                    booking.payment_method = method;
                }
                booking.confirmation_sent = true;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(&id) {
            Some(booking) if booking.payment_status != PaymentStatus::Paid => {
                booking.payment_status = status;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_confirmation_sent(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or(StoreError::BookingNotFound(id))?;
        booking.confirmation_sent = true;
        booking.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let Some(mut booking) = state.bookings.remove(&id) else {
            return Ok(None);
        };

        booking.status_before_delete = Some(booking.status);
        booking.status = BookingStatus::Deleted;
        booking.deleted_at = Some(Utc::now());
        state.deleted.insert(id, booking.clone());
        Ok(Some(booking))
    }

    async fn restore(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let Some(mut booking) = state.deleted.remove(&id) else {
            return Ok(None);
        };

        booking.status = booking
            .status_before_delete
            .take()
            .unwrap_or(BookingStatus::PendingApproval);
        booking.deleted_at = None;
        state.bookings.insert(id, booking.clone());
        Ok(Some(booking))
    }

    async fn list_deleted(&self) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state.deleted.values().cloned().collect();
        bookings.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(bookings)
    }

    async fn find_reminder_candidates(&self, date: NaiveDate) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| is_reminder_candidate(b, date))
            .cloned()
            .collect();
        sort_by_pickup(&mut bookings);
        Ok(bookings)
    }

    async fn count_active_on(&self, date: NaiveDate) -> StoreResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .bookings
            .values()
            .filter(|b| b.pickup_date == date)
            .count();
        Ok(count as i64)
    }

    async fn claim_reminder(&self, id: Uuid, date: NaiveDate) -> StoreResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(&id) {
            Some(booking) if is_reminder_candidate(booking, date) => {
                booking.reminder_sent_for_date = Some(date);
                booking.reminder_in_progress = false;
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_reminder_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or(StoreError::BookingNotFound(id))?;
        booking.reminder_sent_at = Some(sent_at);
        booking.updated_at = Utc::now();
        Ok(())
    }

    async fn set_reminder_in_progress(&self, id: Uuid, in_progress: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or(StoreError::BookingNotFound(id))?;
        booking.reminder_in_progress = in_progress;
        booking.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_transaction(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&data.session_id) {
            return Err(StoreError::Constraint(format!(
                "duplicate session id {}",
                data.session_id
            )));
        }
        let transaction = new_transaction(data);
        state
            .transactions
            .insert(transaction.session_id.clone(), transaction.clone());
        Ok(transaction)
    }

    async fn insert_transaction_if_absent(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction> {
        let mut state = self.state.lock().await;
        let transaction = state
            .transactions
            .entry(data.session_id.clone())
            .or_insert_with(|| new_transaction(data));
        Ok(transaction.clone())
    }

    async fn find_transaction_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let state = self.state.lock().await;
        Ok(state.transactions.get(session_id).cloned())
    }

    async fn list_transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> StoreResult<Vec<PaymentTransaction>> {
        let state = self.state.lock().await;
        let mut transactions: Vec<PaymentTransaction> = state
            .transactions
            .values()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn transition_transaction(
        &self,
        session_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let mut state = self.state.lock().await;
        match state.transactions.get_mut(session_id) {
            Some(tx) if tx.payment_status != PaymentStatus::Paid && tx.payment_status != status => {
                tx.payment_status = status;
                tx.updated_at = Utc::now();
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }
}

fn new_transaction(data: CreatePaymentTransactionData) -> PaymentTransaction {
    let now = Utc::now();
    PaymentTransaction {
        id: Uuid::new_v4(),
        booking_id: data.booking_id,
        session_id: data.session_id,
        amount: data.amount,
        currency: data.currency,
        payment_status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
pub(crate) fn sample_booking() -> Booking {
    use crate::models::ServiceType;
    use crate::services::pricing::{calculate_price, PricingInput, ResolvedDistance};
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    let pricing = calculate_price(&PricingInput {
        distance: ResolvedDistance::measured(dec!(42)),
        passengers: 2,
        premium_pickup: false,
        oversized_item: false,
    })
    .unwrap();
    let now = Utc::now();

    Booking {
        id: Uuid::new_v4(),
        reference_number: FIRST_REFERENCE_NUMBER,
        service_type: ServiceType::AirportDropoff,
        customer_name: "Aroha Ngata".to_string(),
        customer_email: "aroha@example.com".to_string(),
        customer_phone: Some("+64211234567".to_string()),
        pickup_address: "12 Queen Street, Auckland".to_string(),
        dropoff_addresses: vec!["Auckland Airport".to_string()],
        pickup_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        pickup_time: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
        passengers: 2,
        premium_pickup: false,
        oversized_item: false,
        flight_number: Some("NZ101".to_string()),
        notes: None,
        has_return: false,
        return_date: None,
        return_time: None,
        return_flight_number: None,
        pricing: Json(pricing),
        payment_method: PaymentMethod::Card,
        payment_status: PaymentStatus::Unpaid,
        status: BookingStatus::Pending,
        status_before_delete: None,
        confirmation_sent: false,
        reminder_sent_for_date: None,
        reminder_sent_at: None,
        reminder_in_progress: false,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
