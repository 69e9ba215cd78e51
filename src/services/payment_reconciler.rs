// Payment reconciliation - one confirmation per booking, whichever channel
// (client poll or provider webhook) reports the payment first.

use std::{collections::HashMap, sync::Arc};

use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, CreatePaymentTransactionData, PaymentMethod, PaymentStatus,
};
use crate::services::calendar::CalendarSync;
use crate::services::clock::Clock;
use crate::services::notifications::{DispatchReport, NotificationDispatcher};
use crate::services::stripe::{
    parse_webhook_event, verify_signature, CheckoutRequest, ObservedPaymentStatus,
    PaymentProvider, StripeError, WebhookError,
};
use crate::store::{BookingStore, PaymentStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] StripeError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("Unknown checkout session: {0}")]
    UnknownSession(String),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Booking {id} cannot be paid: {reason}")]
    NotPayable { id: Uuid, reason: &'static str },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub session_id: String,
    pub booking_id: Uuid,
    pub payment_status: PaymentStatus,
    /// True only for the single call that confirmed the booking.
    pub transitioned: bool,
    pub notifications: Option<DispatchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub booking_id: Uuid,
    pub session_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentSettings {
    pub base_url: String,
    pub currency: String,
    pub webhook_secret: Secret<String>,
}

/// Sends the confirmation set (customer notifications and calendar entry)
/// for a booking whose confirmation claim was just won. Failures are logged
/// and reported, never propagated.
pub async fn dispatch_confirmation(
    notifier: &dyn NotificationDispatcher,
    calendar: &dyn CalendarSync,
    booking: &Booking,
) -> DispatchReport {
    let (report, calendar_result) = tokio::join!(
        notifier.send_confirmation(booking),
        calendar.sync_booking(booking)
    );

    if let Err(e) = calendar_result {
        tracing::warn!(booking_id = %booking.id, error = %e, "Calendar sync failed");
    }
    if report.needs_attention() {
        tracing::error!(
            booking_id = %booking.id,
            ?report,
            "Confirmation not fully delivered; eligible for manual resend"
        );
    } else {
        tracing::info!(booking_id = %booking.id, "Confirmation dispatched");
    }

    report
}

pub struct PaymentReconciler {
    bookings: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn NotificationDispatcher>,
    calendar: Arc<dyn CalendarSync>,
    clock: Arc<dyn Clock>,
    settings: PaymentSettings,
}

impl PaymentReconciler {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        calendar: Arc<dyn CalendarSync>,
        clock: Arc<dyn Clock>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            bookings,
            payments,
            provider,
            notifier,
            calendar,
            clock,
            settings,
        }
    }

    /// Records a provider-reported outcome for `session_id`. Safe to call any
    /// number of times, from either channel, in any order.
    ///
    /// 1. Conditionally move the transaction to the observed status (never
    ///    away from `paid`).
    /// 2. If the transaction is now `paid`, claim the booking's
    ///    confirmation with a conditional update. A transaction that was
    ///    already `paid` still goes through this step, so a retry finishes
    ///    a confirmation an earlier call left undone.
    /// 3. Only if that claim was won, dispatch the confirmation set.
    #[tracing::instrument(skip(self, metadata), fields(observed = ?observed))]
    pub async fn reconcile(
        &self,
        session_id: &str,
        observed: ObservedPaymentStatus,
        metadata: &HashMap<String, String>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let existing = match self.payments.find_transaction_by_session(session_id).await? {
            Some(tx) => tx,
            None => self.adopt_session(session_id, metadata).await?,
        };
        let booking_id = existing.booking_id;
        let target = PaymentStatus::from(observed);

        let Some(tx) = self.payments.transition_transaction(session_id, target).await? else {
            let current = self
                .payments
                .find_transaction_by_session(session_id)
                .await?
                .map_or(existing.payment_status, |tx| tx.payment_status);
            tracing::debug!(
                %booking_id,
                payment_status = %current,
                "Transaction already reconciled"
            );
            // An earlier call may have recorded the payment and then failed
            // before confirming the booking. The booking claim keeps this
            // from sending twice.
            let notifications = if current == PaymentStatus::Paid {
                self.confirm_paid_booking(booking_id).await?
            } else {
                None
            };
            return Ok(ReconcileOutcome {
                session_id: session_id.to_string(),
                booking_id,
                payment_status: current,
                transitioned: notifications.is_some(),
                notifications,
            });
        };

        tracing::info!(%booking_id, payment_status = %tx.payment_status, "Transaction updated");

        let notifications = match tx.payment_status {
            PaymentStatus::Paid => self.confirm_paid_booking(booking_id).await?,
            PaymentStatus::Failed => {
                if self
                    .bookings
                    .set_payment_status(booking_id, PaymentStatus::Failed)
                    .await?
                    .is_some()
                {
                    tracing::info!(%booking_id, "Booking payment marked failed");
                }
                None
            }
            PaymentStatus::Pending | PaymentStatus::Unpaid => None,
        };

        Ok(ReconcileOutcome {
            session_id: session_id.to_string(),
            booking_id,
            payment_status: tx.payment_status,
            transitioned: notifications.is_some(),
            notifications,
        })
    }

    /// Returns the dispatch report when this call won the confirmation claim.
    async fn confirm_paid_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<DispatchReport>, ReconcileError> {
        if let Some(booking) = self
            .bookings
            .confirm_if_unconfirmed(booking_id, Some(PaymentMethod::Card))
            .await?
        {
            tracing::info!(
                %booking_id,
                reference_number = booking.reference_number,
                "Booking confirmed by payment"
            );
            let report =
                dispatch_confirmation(self.notifier.as_ref(), self.calendar.as_ref(), &booking)
                    .await;
            return Ok(Some(report));
        }

        // Lost the claim or the booking is not awaiting confirmation. The
        // payment is still a fact.
        match self.bookings.get_booking(booking_id).await? {
            Some(booking) if booking.status == BookingStatus::Cancelled => {
                self.bookings
                    .set_payment_status(booking_id, PaymentStatus::Paid)
                    .await?;
                tracing::warn!(
                    %booking_id,
                    reference_number = booking.reference_number,
                    "Payment received for cancelled booking; refund follow-up required"
                );
            }
            Some(_) => {
                self.bookings
                    .set_payment_status(booking_id, PaymentStatus::Paid)
                    .await?;
                tracing::debug!(%booking_id, "Booking already confirmed");
            }
            None => {
                tracing::warn!(%booking_id, "Payment received for a booking that is not active");
            }
        }

        Ok(None)
    }

    /// Creates the transaction record for a session we have no record of,
    /// using the booking id the checkout carried in its metadata.
    async fn adopt_session(
        &self,
        session_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<crate::models::PaymentTransaction, ReconcileError> {
        let booking_id = metadata
            .get("booking_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| ReconcileError::UnknownSession(session_id.to_string()))?;

        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(ReconcileError::BookingNotFound(booking_id))?;

        tracing::warn!(
            %booking_id,
            "No transaction recorded for session, creating it from metadata"
        );

        let tx = self
            .payments
            .insert_transaction_if_absent(CreatePaymentTransactionData {
                booking_id,
                session_id: session_id.to_string(),
                amount: booking.total_price(),
                currency: self.settings.currency.clone(),
            })
            .await?;
        Ok(tx)
    }

    /// Opens a checkout session for the booking's current total.
    #[tracing::instrument(skip(self))]
    pub async fn start_checkout(&self, booking_id: Uuid) -> Result<CheckoutStarted, ReconcileError> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .filter(|b| !b.is_deleted())
            .ok_or(ReconcileError::BookingNotFound(booking_id))?;

        if booking.payment_status == PaymentStatus::Paid {
            return Err(ReconcileError::NotPayable {
                id: booking_id,
                reason: "already paid",
            });
        }
        if booking.status == BookingStatus::Cancelled {
            return Err(ReconcileError::NotPayable {
                id: booking_id,
                reason: "booking is cancelled",
            });
        }

        let base_url = self.settings.base_url.trim_end_matches('/');
        let session = self
            .provider
            .create_checkout_session(&CheckoutRequest {
                booking_id,
                reference_number: booking.reference_number,
                customer_email: booking.customer_email.clone(),
                description: format!("Ride booking #{}", booking.reference_number),
                amount: booking.total_price(),
                currency: self.settings.currency.clone(),
                success_url: format!(
                    "{}/booking/success?session_id={{CHECKOUT_SESSION_ID}}",
                    base_url
                ),
                cancel_url: format!("{}/booking/cancelled?booking_id={}", base_url, booking_id),
            })
            .await?;

        self.payments
            .insert_transaction(CreatePaymentTransactionData {
                booking_id,
                session_id: session.id.clone(),
                amount: booking.total_price(),
                currency: self.settings.currency.clone(),
            })
            .await?;

        if matches!(
            booking.payment_status,
            PaymentStatus::Unpaid | PaymentStatus::Failed
        ) {
            self.bookings
                .set_payment_status(booking_id, PaymentStatus::Pending)
                .await?;
        }

        tracing::info!(session_id = %session.id, "Checkout started");

        Ok(CheckoutStarted {
            booking_id,
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    /// Poll channel: asks the provider for the session and reconciles.
    #[tracing::instrument(skip(self))]
    pub async fn poll_session(&self, session_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let session = self.provider.retrieve_session(session_id).await?;
        self.reconcile(&session.id, session.status, &session.metadata)
            .await
    }

    /// Push channel: verifies and reconciles a provider webhook. Returns
    /// `None` for events that carry no checkout outcome.
    #[tracing::instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        verify_signature(
            payload,
            signature_header,
            self.settings.webhook_secret.expose_secret(),
            self.clock.now().timestamp(),
        )?;

        let Some(observation) = parse_webhook_event(payload)? else {
            tracing::debug!("Ignoring webhook event without a checkout outcome");
            return Ok(None);
        };

        tracing::info!(
            event_id = %observation.event_id,
            event_type = %observation.event_type,
            session_id = %observation.session_id,
            "Webhook received"
        );

        let outcome = self
            .reconcile(
                &observation.session_id,
                observation.status,
                &observation.metadata,
            )
            .await?;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBookingRecord;
    use crate::services::calendar::NoopCalendarSync;
    use crate::services::clock::FixedClock;
    use crate::services::notifications::RecordingDispatcher;
    use crate::services::stripe::CheckoutSession;
    use crate::store::{memory::sample_booking, InMemoryStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ring::hmac;

    struct FakeProvider {
        status: std::sync::Mutex<ObservedPaymentStatus>,
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_checkout_session(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, StripeError> {
            Ok(CheckoutSession {
                id: "cs_test_1".to_string(),
                url: Some("https://checkout.example/cs_test_1".to_string()),
                status: ObservedPaymentStatus::Pending,
                metadata: HashMap::new(),
            })
        }

        async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, StripeError> {
            Ok(CheckoutSession {
                id: session_id.to_string(),
                url: None,
                status: *self.status.lock().unwrap(),
                metadata: HashMap::new(),
            })
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingDispatcher>,
        provider: Arc<FakeProvider>,
        reconciler: PaymentReconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        let provider = Arc::new(FakeProvider {
            status: std::sync::Mutex::new(ObservedPaymentStatus::Pending),
        });
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap(),
        ));
        let reconciler = PaymentReconciler::new(
            store.clone(),
            store.clone(),
            provider.clone(),
            notifier.clone(),
            Arc::new(NoopCalendarSync),
            clock,
            PaymentSettings {
                base_url: "https://rides.example.com".to_string(),
                currency: "nzd".to_string(),
                webhook_secret: Secret::new("whsec_test".to_string()),
            },
        );
        Harness {
            store,
            notifier,
            provider,
            reconciler,
        }
    }

    async fn insert_pending_booking(store: &InMemoryStore) -> Booking {
        let sample = sample_booking();
        store
            .insert_booking(NewBookingRecord {
                trip: crate::models::TripDetails {
                    service_type: sample.service_type,
                    customer_name: sample.customer_name,
                    customer_email: sample.customer_email,
                    customer_phone: sample.customer_phone,
                    pickup_address: sample.pickup_address,
                    dropoff_addresses: sample.dropoff_addresses,
                    pickup_date: sample.pickup_date,
                    pickup_time: sample.pickup_time,
                    passengers: sample.passengers,
                    premium_pickup: false,
                    oversized_item: false,
                    flight_number: sample.flight_number,
                    notes: None,
                    return_trip: None,
                },
                pricing: sample.pricing.0,
                payment_method: PaymentMethod::Card,
                payment_status: PaymentStatus::Unpaid,
                status: BookingStatus::Pending,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_checkout_then_paid_poll_confirms_once() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;

        let started = h.reconciler.start_checkout(booking.id).await.unwrap();
        let after_checkout = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(after_checkout.payment_status, PaymentStatus::Pending);

        *h.provider.status.lock().unwrap() = ObservedPaymentStatus::Paid;
        let first = h.reconciler.poll_session(&started.session_id).await.unwrap();
        let second = h.reconciler.poll_session(&started.session_id).await.unwrap();

        assert!(first.transitioned);
        assert!(!second.transitioned);
        assert_eq!(second.payment_status, PaymentStatus::Paid);
        assert_eq!(h.notifier.confirmation_count(), 1);

        let confirmed = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
        assert!(confirmed.confirmation_sent);
    }

    #[tokio::test]
    async fn test_failed_after_paid_is_ignored() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();
        let none = HashMap::new();

        h.reconciler
            .reconcile(&started.session_id, ObservedPaymentStatus::Paid, &none)
            .await
            .unwrap();
        let late = h
            .reconciler
            .reconcile(&started.session_id, ObservedPaymentStatus::Failed, &none)
            .await
            .unwrap();

        assert!(!late.transitioned);
        assert_eq!(late.payment_status, PaymentStatus::Paid);
        let stored = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_retry_confirms_booking_after_interrupted_reconcile() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();

        // Transaction recorded as paid, booking confirmation never ran.
        h.store
            .transition_transaction(&started.session_id, PaymentStatus::Paid)
            .await
            .unwrap()
            .unwrap();

        let retry = h
            .reconciler
            .reconcile(&started.session_id, ObservedPaymentStatus::Paid, &HashMap::new())
            .await
            .unwrap();
        *h.provider.status.lock().unwrap() = ObservedPaymentStatus::Paid;
        let poll = h.reconciler.poll_session(&started.session_id).await.unwrap();

        assert!(retry.transitioned);
        assert!(!poll.transitioned);
        let stored = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(h.notifier.confirmation_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_marks_booking_failed() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();

        let outcome = h
            .reconciler
            .reconcile(&started.session_id, ObservedPaymentStatus::Failed, &HashMap::new())
            .await
            .unwrap();

        assert!(!outcome.transitioned);
        let stored = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(h.notifier.confirmation_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_adopted_from_metadata() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let metadata = HashMap::from([("booking_id".to_string(), booking.id.to_string())]);

        let outcome = h
            .reconciler
            .reconcile("cs_from_webhook", ObservedPaymentStatus::Paid, &metadata)
            .await
            .unwrap();

        assert!(outcome.transitioned);
        let tx = h
            .store
            .find_transaction_by_session("cs_from_webhook")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.booking_id, booking.id);
        assert_eq!(tx.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_unknown_session_without_metadata_is_rejected() {
        let h = harness();
        let result = h
            .reconciler
            .reconcile("cs_nobody", ObservedPaymentStatus::Paid, &HashMap::new())
            .await;
        assert!(matches!(result, Err(ReconcileError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_paid_cancelled_booking_is_not_confirmed() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();
        h.store
            .transition_status(booking.id, &[BookingStatus::Pending], BookingStatus::Cancelled)
            .await
            .unwrap();

        let outcome = h
            .reconciler
            .reconcile(&started.session_id, ObservedPaymentStatus::Paid, &HashMap::new())
            .await
            .unwrap();

        assert!(!outcome.transitioned);
        let stored = h.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(h.notifier.confirmation_count(), 0);
    }

    #[tokio::test]
    async fn test_checkout_refused_for_paid_booking() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        h.store
            .set_payment_status(booking.id, PaymentStatus::Paid)
            .await
            .unwrap();

        let result = h.reconciler.start_checkout(booking.id).await;
        assert!(matches!(result, Err(ReconcileError::NotPayable { .. })));
    }

    #[tokio::test]
    async fn test_signed_webhook_confirms_booking() {
        let h = harness();
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();

        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": started.session_id,
                "status": "complete",
                "payment_status": "paid",
                "metadata": { "booking_id": booking.id.to_string() }
            }}
        })
        .to_string();
        let timestamp = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap().timestamp();
        let key = hmac::Key::new(hmac::HMAC_SHA256, b"whsec_test");
        let tag = hmac::sign(&key, format!("{}.{}", timestamp, payload).as_bytes());
        let header = format!("t={},v1={}", timestamp, hex::encode(tag.as_ref()));

        let outcome = h
            .reconciler
            .handle_webhook(payload.as_bytes(), &header)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.transitioned);

        let bad = h
            .reconciler
            .handle_webhook(payload.as_bytes(), "t=1,v1=00")
            .await;
        assert!(matches!(bad, Err(ReconcileError::Webhook(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_paid_reports_confirm_once() {
        let h = Arc::new(harness());
        let booking = insert_pending_booking(&h.store).await;
        let started = h.reconciler.start_checkout(booking.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            let session_id = started.session_id.clone();
            handles.push(tokio::spawn(async move {
                h.reconciler
                    .reconcile(&session_id, ObservedPaymentStatus::Paid, &HashMap::new())
                    .await
                    .unwrap()
            }));
        }

        let mut transitioned = 0;
        for handle in handles {
            if handle.await.unwrap().transitioned {
                transitioned += 1;
            }
        }

        assert_eq!(transitioned, 1);
        assert_eq!(h.notifier.confirmation_count(), 1);
    }
}
