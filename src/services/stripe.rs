use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use ring::hmac;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::models::PaymentStatus;

/// Stripe's default replay window for webhook signatures.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(thiserror::Error, Debug)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Stripe API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WebhookError {
    #[error("Missing or malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("Signature timestamp outside tolerance")]
    Expired,

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Payment outcome as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedPaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl From<ObservedPaymentStatus> for PaymentStatus {
    fn from(observed: ObservedPaymentStatus) -> Self {
        match observed {
            ObservedPaymentStatus::Pending => PaymentStatus::Pending,
            ObservedPaymentStatus::Paid => PaymentStatus::Paid,
            ObservedPaymentStatus::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: ObservedPaymentStatus,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: uuid::Uuid,
    pub reference_number: i64,
    pub customer_email: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, StripeError>;
}

/// Checkout session object as Stripe returns it (API and webhooks).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionObject {
    pub fn observed_status(&self) -> ObservedPaymentStatus {
        if self.payment_status.as_deref() == Some("paid") {
            ObservedPaymentStatus::Paid
        } else if self.status.as_deref() == Some("expired") {
            ObservedPaymentStatus::Failed
        } else {
            ObservedPaymentStatus::Pending
        }
    }

    fn into_session(self) -> CheckoutSession {
        let status = self.observed_status();
        CheckoutSession {
            id: self.id,
            url: self.url,
            status,
            metadata: self.metadata,
        }
    }
}

pub struct StripeClient {
    client: Client,
    api_base_url: String,
    secret_key: Secret<String>,
}

impl StripeClient {
    pub fn new(api_base_url: &str, secret_key: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    async fn parse_session(response: reqwest::Response) -> Result<CheckoutSession, StripeError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(status, error = %message, "Stripe request failed");
            return Err(StripeError::ApiError { status, message });
        }

        let session: SessionObject = response.json().await?;
        Ok(session.into_session())
    }
}

/// Converts a decimal amount to the provider's minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, StripeError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .filter(|cents| *cents > 0)
        .ok_or(StripeError::InvalidAmount(amount))
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[tracing::instrument(skip(self, request), fields(booking_id = %request.booking_id))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError> {
        let unit_amount = to_minor_units(request.amount)?;
        let booking_id = request.booking_id.to_string();

        let params = [
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("customer_email", request.customer_email.clone()),
            ("client_reference_id", booking_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", unit_amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
            ("metadata[booking_id]", booking_id.clone()),
            (
                "metadata[reference_number]",
                request.reference_number.to_string(),
            ),
            ("payment_intent_data[metadata][booking_id]", booking_id),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&params)
            .send()
            .await?;

        let session = Self::parse_session(response).await?;
        tracing::info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, StripeError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_base_url, session_id
            ))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        Self::parse_session(response).await
    }
}

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>[,v1=...]`)
/// against the raw request body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::Expired);
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);

    // ring::hmac::verify compares in constant time.
    if signatures
        .iter()
        .any(|sig| hmac::verify(&key, &signed, sig).is_ok())
    {
        Ok(())
    } else {
        Err(WebhookError::BadSignature)
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// A payment observation extracted from a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookObservation {
    pub event_id: String,
    pub event_type: String,
    pub session_id: String,
    pub status: ObservedPaymentStatus,
    pub metadata: HashMap<String, String>,
}

/// Parses a verified webhook body. Returns `Ok(None)` for event types that
/// carry no checkout outcome.
pub fn parse_webhook_event(payload: &[u8]) -> Result<Option<WebhookObservation>, WebhookError> {
    let envelope: EventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    let forced_status = match envelope.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => None,
        "checkout.session.async_payment_failed" | "checkout.session.expired" => {
            Some(ObservedPaymentStatus::Failed)
        }
        _ => return Ok(None),
    };

    let session: SessionObject = serde_json::from_value(envelope.data.object)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let status = forced_status.unwrap_or_else(|| session.observed_status());

    Ok(Some(WebhookObservation {
        event_id: envelope.id,
        event_type: envelope.event_type,
        session_id: session.id,
        status,
        metadata: session.metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let tag = hmac::sign(&key, &signed);
        format!("t={},v1={}", timestamp, hex::encode(tag.as_ref()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_test", 1_700_000_000);
        assert_eq!(
            verify_signature(payload, &header, "whsec_test", 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign(br#"{"id":"evt_1"}"#, "whsec_test", 1_700_000_000);
        assert_eq!(
            verify_signature(br#"{"id":"evt_2"}"#, &header, "whsec_test", 1_700_000_000),
            Err(WebhookError::BadSignature)
        );
    }

    #[test]
    fn test_stale_signature_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_test", 1_700_000_000);
        assert_eq!(
            verify_signature(payload, &header, "whsec_test", 1_700_000_000 + 301),
            Err(WebhookError::Expired)
        );
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert_eq!(
            verify_signature(b"{}", "garbage", "whsec_test", 0),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn test_parse_completed_event() {
        let payload = serde_json::json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_abc",
                "status": "complete",
                "payment_status": "paid",
                "metadata": { "booking_id": "5b0c6f0e-3f0a-4a55-9d7a-1f4d2a0c9e11" }
            }}
        });
        let observation = parse_webhook_event(payload.to_string().as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(observation.session_id, "cs_test_abc");
        assert_eq!(observation.status, ObservedPaymentStatus::Paid);
        assert!(observation.metadata.contains_key("booking_id"));
    }

    #[test]
    fn test_parse_expired_and_unrelated_events() {
        let expired = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.expired",
            "data": { "object": { "id": "cs_1", "status": "expired", "payment_status": "unpaid" } }
        });
        let observation = parse_webhook_event(expired.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(observation.status, ObservedPaymentStatus::Failed);

        let unrelated = serde_json::json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        });
        assert!(parse_webhook_event(unrelated.to_string().as_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(187.48)).unwrap(), 18748);
        assert!(to_minor_units(Decimal::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test"))
            .and(body_string_contains("unit_amount%5D=18748"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "status": "open",
                "payment_status": "unpaid",
                "metadata": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new(&server.uri(), Secret::new("sk_test".to_string()));
        let session = client
            .create_checkout_session(&CheckoutRequest {
                booking_id: uuid::Uuid::new_v4(),
                reference_number: 10001,
                customer_email: "aroha@example.com".to_string(),
                description: "Booking #10001".to_string(),
                amount: dec!(187.48),
                currency: "nzd".to_string(),
                success_url: "https://rides.example.com/paid".to_string(),
                cancel_url: "https://rides.example.com/cancelled".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.id, "cs_test_1");
        assert_eq!(session.status, ObservedPaymentStatus::Pending);
        assert!(session.url.is_some());
    }

    #[tokio::test]
    async fn test_retrieve_paid_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_test_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_1",
                "status": "complete",
                "payment_status": "paid"
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new(&server.uri(), Secret::new("sk_test".to_string()));
        let session = client.retrieve_session("cs_test_1").await.unwrap();
        assert_eq!(session.status, ObservedPaymentStatus::Paid);
    }
}
