use std::{future::Future, sync::Arc, time::Duration};

use askama::Template;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

use crate::models::Booking;

#[derive(thiserror::Error, Debug)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Gateway rejected message: HTTP {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

/// Result of one channel of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Sent,
    Skipped(String),
    Failed(String),
    /// Delivery outcome unknown. Surfaced for manual resend, never retried.
    TimedOut,
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ChannelOutcome::Sent)
    }

    pub fn needs_attention(&self) -> bool {
        matches!(self, ChannelOutcome::Failed(_) | ChannelOutcome::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub email: ChannelOutcome,
    pub sms: ChannelOutcome,
}

impl DispatchReport {
    pub fn any_sent(&self) -> bool {
        self.email.is_sent() || self.sms.is_sent()
    }

    pub fn needs_attention(&self) -> bool {
        self.email.needs_attention() || self.sms.needs_attention()
    }
}

/// Customer notification fan-out. Implementations never touch booking
/// bookkeeping; callers record the outcome.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_confirmation(&self, booking: &Booking) -> DispatchReport;
    async fn send_reminder(&self, booking: &Booking) -> DispatchReport;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotificationError>;
}

#[derive(Template)]
#[template(path = "email/confirmation.html")]
struct ConfirmationEmail {
    customer_name: String,
    reference_number: i64,
    pickup_when: String,
    pickup_address: String,
    dropoffs: String,
    passengers: i32,
    flight_number: Option<String>,
    return_summary: Option<String>,
    total: String,
}

#[derive(Template)]
#[template(path = "email/reminder.html")]
struct ReminderEmail {
    customer_name: String,
    reference_number: i64,
    pickup_when: String,
    pickup_address: String,
    dropoffs: String,
    flight_number: Option<String>,
}

fn pickup_when(booking: &Booking) -> String {
    format!(
        "{} at {}",
        booking.pickup_date.format("%A %-d %B %Y"),
        booking.pickup_time.format("%-I:%M %p")
    )
}

fn return_summary(booking: &Booking) -> Option<String> {
    let date = booking.return_date?;
    let mut summary = date.format("%A %-d %B %Y").to_string();
    if let Some(time) = booking.return_time {
        summary.push_str(&format!(" at {}", time.format("%-I:%M %p")));
    }
    if let Some(flight) = &booking.return_flight_number {
        summary.push_str(&format!(" (flight {})", flight));
    }
    Some(summary)
}

pub fn confirmation_email(booking: &Booking) -> Result<EmailMessage, NotificationError> {
    let html = ConfirmationEmail {
        customer_name: booking.customer_name.clone(),
        reference_number: booking.reference_number,
        pickup_when: pickup_when(booking),
        pickup_address: booking.pickup_address.clone(),
        dropoffs: booking.dropoff_addresses.join(" → "),
        passengers: booking.passengers,
        flight_number: booking.flight_number.clone(),
        return_summary: return_summary(booking),
        total: booking.total_price().to_string(),
    }
    .render()?;

    Ok(EmailMessage {
        to: booking.customer_email.clone(),
        subject: format!("Booking #{} confirmed", booking.reference_number),
        html,
    })
}

pub fn reminder_email(booking: &Booking) -> Result<EmailMessage, NotificationError> {
    let html = ReminderEmail {
        customer_name: booking.customer_name.clone(),
        reference_number: booking.reference_number,
        pickup_when: pickup_when(booking),
        pickup_address: booking.pickup_address.clone(),
        dropoffs: booking.dropoff_addresses.join(" → "),
        flight_number: booking.flight_number.clone(),
    }
    .render()?;

    Ok(EmailMessage {
        to: booking.customer_email.clone(),
        subject: format!("Reminder: your ride tomorrow (#{})", booking.reference_number),
        html,
    })
}

pub fn confirmation_sms(booking: &Booking, to: &str) -> SmsMessage {
    SmsMessage {
        to: to.to_string(),
        body: format!(
            "Booking #{} confirmed: pickup {} from {}. Thank you!",
            booking.reference_number,
            pickup_when(booking),
            booking.pickup_address
        ),
    }
}

pub fn reminder_sms(booking: &Booking, to: &str) -> SmsMessage {
    SmsMessage {
        to: to.to_string(),
        body: format!(
            "Reminder: your ride #{} is tomorrow, {} from {}.",
            booking.reference_number,
            pickup_when(booking),
            booking.pickup_address
        ),
    }
}

/// Runs one channel under the dispatch timeout.
async fn run_channel<F>(channel: &'static str, timeout: Duration, send: F) -> ChannelOutcome
where
    F: Future<Output = Result<(), NotificationError>>,
{
    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(())) => ChannelOutcome::Sent,
        Ok(Err(e)) => {
            tracing::error!(channel, error = %e, "Notification send failed");
            ChannelOutcome::Failed(e.to_string())
        }
        Err(_) => {
            tracing::error!(
                channel,
                timeout_secs = timeout.as_secs(),
                "Notification send timed out, outcome unknown"
            );
            ChannelOutcome::TimedOut
        }
    }
}

/// Dispatcher over concrete email and SMS transports. Channels run
/// concurrently and independently; a missing transport is reported as
/// skipped.
pub struct TransportDispatcher {
    email: Option<Arc<dyn EmailTransport>>,
    sms: Option<Arc<dyn SmsTransport>>,
    admin_email: Option<String>,
    timeout: Duration,
}

impl TransportDispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailTransport>>,
        sms: Option<Arc<dyn SmsTransport>>,
        admin_email: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            email,
            sms,
            admin_email,
            timeout,
        }
    }

    async fn send_email_channel(
        &self,
        message: Result<EmailMessage, NotificationError>,
    ) -> ChannelOutcome {
        let Some(transport) = &self.email else {
            return ChannelOutcome::Skipped("email not configured".to_string());
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build email");
                return ChannelOutcome::Failed(e.to_string());
            }
        };
        run_channel("email", self.timeout, transport.send_email(&message)).await
    }

    async fn send_sms_channel(&self, message: Option<SmsMessage>) -> ChannelOutcome {
        let Some(transport) = &self.sms else {
            return ChannelOutcome::Skipped("sms not configured".to_string());
        };
        let Some(message) = message else {
            return ChannelOutcome::Skipped("no phone number".to_string());
        };
        run_channel("sms", self.timeout, transport.send_sms(&message)).await
    }

    async fn copy_to_admin(&self, message: &EmailMessage) {
        let (Some(transport), Some(admin)) = (&self.email, &self.admin_email) else {
            return;
        };
        let copy = EmailMessage {
            to: admin.clone(),
            subject: format!("[Copy] {}", message.subject),
            html: message.html.clone(),
        };
        let outcome = run_channel("admin_email", self.timeout, transport.send_email(&copy)).await;
        if !outcome.is_sent() {
            tracing::warn!(?outcome, "Admin copy of confirmation not delivered");
        }
    }
}

fn customer_phone(booking: &Booking) -> Option<&str> {
    booking
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

#[async_trait]
impl NotificationDispatcher for TransportDispatcher {
    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn send_confirmation(&self, booking: &Booking) -> DispatchReport {
        let email = confirmation_email(booking);
        if let Ok(message) = &email {
            self.copy_to_admin(message).await;
        }
        let sms = customer_phone(booking).map(|to| confirmation_sms(booking, to));

        let (email, sms) = tokio::join!(self.send_email_channel(email), self.send_sms_channel(sms));
        DispatchReport { email, sms }
    }

    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn send_reminder(&self, booking: &Booking) -> DispatchReport {
        let email = reminder_email(booking);
        let sms = customer_phone(booking).map(|to| reminder_sms(booking, to));

        let (email, sms) = tokio::join!(self.send_email_channel(email), self.send_sms_channel(sms));
        DispatchReport { email, sms }
    }
}

#[derive(Debug, Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridAddress<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
}

/// Email over a SendGrid-compatible HTTP API.
pub struct SendGridTransport {
    client: Client,
    api_base_url: String,
    api_key: Secret<String>,
    from: String,
}

impl SendGridTransport {
    pub fn new(api_base_url: &str, api_key: Secret<String>, from: String) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let body = SendGridRequest {
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress { email: &message.to }],
            }],
            from: SendGridAddress { email: &self.from },
            subject: &message.subject,
            content: vec![SendGridContent {
                content_type: "text/html",
                value: &message.html,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.api_base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotificationError::Rejected { status, message });
        }

        Ok(())
    }
}

/// SMS over a Twilio-compatible HTTP API.
pub struct TwilioTransport {
    client: Client,
    api_base_url: String,
    account_sid: String,
    auth_token: Secret<String>,
    from: String,
}

impl TwilioTransport {
    pub fn new(
        api_base_url: &str,
        account_sid: String,
        auth_token: Secret<String>,
        from: String,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            from,
        }
    }
}

#[async_trait]
impl SmsTransport for TwilioTransport {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotificationError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url, self.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[
                ("To", message.to.as_str()),
                ("From", self.from.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotificationError::Rejected { status, message });
        }

        Ok(())
    }
}

/// Dispatcher double that records which bookings it was asked to notify.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub confirmations: std::sync::Mutex<Vec<uuid::Uuid>>,
    pub reminders: std::sync::Mutex<Vec<uuid::Uuid>>,
    /// Report every reminder as undelivered.
    pub fail_reminders: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingDispatcher {
    fn recorded(list: &std::sync::Mutex<Vec<uuid::Uuid>>) -> Vec<uuid::Uuid> {
        list.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn confirmation_count(&self) -> usize {
        Self::recorded(&self.confirmations).len()
    }

    pub fn reminder_count(&self) -> usize {
        Self::recorded(&self.reminders).len()
    }

    pub fn reminders_for(&self, id: uuid::Uuid) -> usize {
        Self::recorded(&self.reminders)
            .iter()
            .filter(|r| **r == id)
            .count()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_confirmation(&self, booking: &Booking) -> DispatchReport {
        self.confirmations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(booking.id);
        DispatchReport {
            email: ChannelOutcome::Sent,
            sms: ChannelOutcome::Sent,
        }
    }

    async fn send_reminder(&self, booking: &Booking) -> DispatchReport {
        // Lets racing passes interleave.
        tokio::task::yield_now().await;
        self.reminders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(booking.id);
        if self.fail_reminders {
            return DispatchReport {
                email: ChannelOutcome::TimedOut,
                sms: ChannelOutcome::Failed("gateway down".to_string()),
            };
        }
        DispatchReport {
            email: ChannelOutcome::Sent,
            sms: ChannelOutcome::Sent,
        }
    }
}
