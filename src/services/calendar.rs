use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::models::Booking;
use crate::services::clock::business_instant;

#[derive(thiserror::Error, Debug)]
pub enum CalendarError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Calendar service error: HTTP {0}")]
    ApiError(u16),
}

/// Best-effort calendar mirror of confirmed bookings.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn sync_booking(&self, booking: &Booking) -> Result<(), CalendarError>;
}

#[derive(Debug, Serialize)]
struct CalendarEvent<'a> {
    booking_id: String,
    reference_number: i64,
    title: String,
    start: String,
    location: &'a str,
    description: String,
}

/// Posts confirmed bookings to a calendar bridge (e.g. an Apps Script
/// web app that writes to Google Calendar).
pub struct WebhookCalendarSync {
    client: Client,
    webhook_url: String,
}

impl WebhookCalendarSync {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl CalendarSync for WebhookCalendarSync {
    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn sync_booking(&self, booking: &Booking) -> Result<(), CalendarError> {
        let event = CalendarEvent {
            booking_id: booking.id.to_string(),
            reference_number: booking.reference_number,
            title: format!("#{} {}", booking.reference_number, booking.customer_name),
            start: business_instant(booking.pickup_date, booking.pickup_time).to_rfc3339(),
            location: &booking.pickup_address,
            description: format!(
                "{} passenger(s) to {}",
                booking.passengers,
                booking.dropoff_addresses.join(", ")
            ),
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&event)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CalendarError::ApiError(response.status().as_u16()));
        }

        Ok(())
    }
}

/// Used when no calendar bridge is configured.
pub struct NoopCalendarSync;

#[async_trait]
impl CalendarSync for NoopCalendarSync {
    async fn sync_booking(&self, _booking: &Booking) -> Result<(), CalendarError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::sample_booking;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_event_with_business_start_time() {
        let server = MockServer::start().await;
        // 2026-03-02 06:30 NZDT
        Mock::given(method("POST"))
            .and(body_string_contains("2026-03-01T17:30:00+00:00"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sync = WebhookCalendarSync::new(server.uri());
        sync.sync_booking(&sample_booking()).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sync = WebhookCalendarSync::new(server.uri());
        let result = sync.sync_booking(&sample_booking()).await;
        assert!(matches!(result, Err(CalendarError::ApiError(500))));
    }
}
