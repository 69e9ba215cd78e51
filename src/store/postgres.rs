use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::{BookingFilter, BookingStore, PaymentStore, StoreError, StoreResult};
use crate::models::{
    Booking, BookingStatus, CreatePaymentTransactionData, NewBookingRecord, PaymentMethod,
    PaymentStatus, PaymentTransaction,
};

/// Postgres-backed store. Conditional writes are single
/// `UPDATE ... WHERE <precondition> RETURNING *` statements, so the row
/// lock taken by the update is the only synchronisation between processes.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert_booking(&self, record: NewBookingRecord) -> StoreResult<Booking> {
        let trip = record.trip;
        let (return_date, return_time, return_flight_number) = match trip.return_trip {
            Some(ret) => (Some(ret.date), Some(ret.time), Some(ret.flight_number)),
            None => (None, None, None),
        };

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (
                service_type, customer_name, customer_email, customer_phone,
                pickup_address, dropoff_addresses, pickup_date, pickup_time,
                passengers, premium_pickup, oversized_item, flight_number, notes,
                has_return, return_date, return_time, return_flight_number,
                pricing, payment_method, payment_status, status
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14::DATE IS NOT NULL, $14, $15, $16, $17, $18, $19, $20
            )
            RETURNING *
            "#,
        )
        .bind(trip.service_type)
        .bind(&trip.customer_name)
        .bind(&trip.customer_email)
        .bind(&trip.customer_phone)
        .bind(&trip.pickup_address)
        .bind(&trip.dropoff_addresses)
        .bind(trip.pickup_date)
        .bind(trip.pickup_time)
        .bind(trip.passengers)
        .bind(trip.premium_pickup)
        .bind(trip.oversized_item)
        .bind(&trip.flight_number)
        .bind(&trip.notes)
        .bind(return_date)
        .bind(return_time)
        .bind(return_flight_number)
        .bind(Json(&record.pricing))
        .bind(record.payment_method)
        .bind(record.payment_status)
        .bind(record.status)
        .fetch_one(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE ($1::DATE IS NULL OR pickup_date = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY pickup_date, pickup_time, reference_number
            "#,
        )
        .bind(filter.pickup_date)
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn save_trip_details(&self, booking: &Booking) -> StoreResult<Option<Booking>> {
        let saved = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET
                customer_name = $2,
                customer_email = $3,
                customer_phone = $4,
                pickup_address = $5,
                dropoff_addresses = $6,
                pickup_date = $7,
                pickup_time = $8,
                passengers = $9,
                premium_pickup = $10,
                oversized_item = $11,
                flight_number = $12,
                notes = $13,
                has_return = $14::DATE IS NOT NULL,
                return_date = $14,
                return_time = $15,
                return_flight_number = $16,
                pricing = $17,
                reminder_sent_for_date = CASE
                    WHEN pickup_date IS DISTINCT FROM $7 THEN NULL
                    ELSE reminder_sent_for_date
                END,
                reminder_sent_at = CASE
                    WHEN pickup_date IS DISTINCT FROM $7 THEN NULL
                    ELSE reminder_sent_at
                END,
                reminder_in_progress = CASE
                    WHEN pickup_date IS DISTINCT FROM $7 THEN FALSE
                    ELSE reminder_in_progress
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(booking.id)
        .bind(&booking.customer_name)
        .bind(&booking.customer_email)
        .bind(&booking.customer_phone)
        .bind(&booking.pickup_address)
        .bind(&booking.dropoff_addresses)
        .bind(booking.pickup_date)
        .bind(booking.pickup_time)
        .bind(booking.passengers)
        .bind(booking.premium_pickup)
        .bind(booking.oversized_item)
        .bind(&booking.flight_number)
        .bind(&booking.notes)
        .bind(booking.return_date)
        .bind(booking.return_time)
        .bind(&booking.return_flight_number)
        .bind(&booking.pricing)
        .fetch_optional(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn confirm_if_unconfirmed(
        &self,
        id: Uuid,
        payment_method: Option<PaymentMethod>,
    ) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET
                status = 'confirmed',
                payment_status = 'paid',
                payment_method = COALESCE($2, payment_method),
                confirmation_sent = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'pending_approval')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payment_method)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn set_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET payment_status = $2, updated_at = NOW()
            WHERE id = $1 AND payment_status <> 'paid'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn mark_confirmation_sent(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET confirmation_sent = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BookingNotFound(id));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM bookings WHERE id = $1 RETURNING *
            )
            INSERT INTO deleted_bookings SELECT * FROM moved
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE deleted_bookings
            SET
                status_before_delete = status,
                status = 'deleted',
                deleted_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(booking))
    }

    async fn restore(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            r#"
            UPDATE deleted_bookings
            SET
                status = COALESCE(status_before_delete, 'pending_approval'),
                status_before_delete = NULL,
                deleted_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            WITH moved AS (
                DELETE FROM deleted_bookings WHERE id = $1 RETURNING *
            )
            INSERT INTO bookings SELECT * FROM moved
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(booking))
    }

    async fn list_deleted(&self) -> StoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM deleted_bookings
            ORDER BY deleted_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn find_reminder_candidates(&self, date: NaiveDate) -> StoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE pickup_date = $1
              AND status = 'confirmed'
              AND deleted_at IS NULL
              AND reminder_sent_for_date IS DISTINCT FROM $1
            ORDER BY pickup_time, reference_number
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookings)
    }

    async fn count_active_on(&self, date: NaiveDate) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM bookings
            WHERE pickup_date = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn claim_reminder(&self, id: Uuid, date: NaiveDate) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET
                reminder_sent_for_date = $2,
                reminder_in_progress = FALSE,
                updated_at = NOW()
            WHERE id = $1
              AND pickup_date = $2
              AND status = 'confirmed'
              AND deleted_at IS NULL
              AND reminder_sent_for_date IS DISTINCT FROM $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(booking)
    }

    async fn mark_reminder_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET reminder_sent_at = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_reminder_in_progress(&self, id: Uuid, in_progress: bool) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET reminder_in_progress = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(in_progress)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_transaction(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction> {
        let transaction = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            INSERT INTO payment_transactions (booking_id, session_id, amount, currency)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.booking_id)
        .bind(&data.session_id)
        .bind(data.amount)
        .bind(&data.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn insert_transaction_if_absent(
        &self,
        data: CreatePaymentTransactionData,
    ) -> StoreResult<PaymentTransaction> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (booking_id, session_id, amount, currency)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(data.booking_id)
        .bind(&data.session_id)
        .bind(data.amount)
        .bind(&data.currency)
        .execute(&self.pool)
        .await?;

        self.find_transaction_by_session(&data.session_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn find_transaction_by_session(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let transaction = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT * FROM payment_transactions WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn list_transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> StoreResult<Vec<PaymentTransaction>> {
        let transactions = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT * FROM payment_transactions
            WHERE booking_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn transition_transaction(
        &self,
        session_id: &str,
        status: PaymentStatus,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let transaction = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            UPDATE payment_transactions
            SET payment_status = $2, updated_at = NOW()
            WHERE session_id = $1
              AND payment_status <> 'paid'
              AND payment_status <> $2
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceType, TripDetails};
    use crate::services::pricing::{calculate_price, PricingInput, ResolvedDistance};
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        PgStore::new(pool)
    }

    fn record(date: NaiveDate) -> NewBookingRecord {
        NewBookingRecord {
            trip: TripDetails {
                service_type: ServiceType::PointToPoint,
                customer_name: "Tane Wiremu".to_string(),
                customer_email: "tane@example.com".to_string(),
                customer_phone: None,
                pickup_address: "1 Lambton Quay, Wellington".to_string(),
                dropoff_addresses: vec!["Wellington Airport".to_string()],
                pickup_date: date,
                pickup_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                passengers: 1,
                premium_pickup: false,
                oversized_item: false,
                flight_number: None,
                notes: None,
                return_trip: None,
            },
            pricing: calculate_price(&PricingInput {
                distance: ResolvedDistance::measured(dec!(9.5)),
                passengers: 1,
                premium_pickup: false,
                oversized_item: false,
            })
            .unwrap(),
            payment_method: PaymentMethod::Card,
            payment_status: PaymentStatus::Unpaid,
            status: BookingStatus::Confirmed,
        }
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL
    async fn test_claim_reminder_is_conditional() {
        let store = connect().await;
        let date = NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();
        let booking = store.insert_booking(record(date)).await.unwrap();

        assert!(store.claim_reminder(booking.id, date).await.unwrap().is_some());
        assert!(store.claim_reminder(booking.id, date).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL
    async fn test_soft_delete_and_restore_round_trip() {
        let store = connect().await;
        let date = NaiveDate::from_ymd_opt(2030, 5, 2).unwrap();
        let booking = store.insert_booking(record(date)).await.unwrap();

        let deleted = store.soft_delete(booking.id).await.unwrap().unwrap();
        assert_eq!(deleted.status, BookingStatus::Deleted);
        assert!(store.get_booking(booking.id).await.unwrap().is_none());

        let restored = store.restore(booking.id).await.unwrap().unwrap();
        assert_eq!(restored, booking);
    }
}
