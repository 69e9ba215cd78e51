use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::services::pricing::ResolvedDistance;

#[derive(thiserror::Error, Debug)]
pub enum DistanceError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Maps API error: {0}")]
    ApiError(String),

    #[error("No route between {origin} and {destination}: {status}")]
    NoRoute {
        origin: String,
        destination: String,
        status: String,
    },

    #[error("Distance resolver not configured")]
    NotConfigured,
}

/// Resolves a pickup and ordered drop-offs to a total driving distance.
#[async_trait]
pub trait DistanceResolver: Send + Sync {
    async fn distance_km(&self, pickup: &str, dropoffs: &[String]) -> Result<Decimal, DistanceError>;
}

/// Resolves the distance, or degrades to `fallback_km` flagged as
/// estimated. Never returns an unflagged guess.
pub async fn resolve_or_fallback(
    resolver: &dyn DistanceResolver,
    pickup: &str,
    dropoffs: &[String],
    fallback_km: Decimal,
) -> ResolvedDistance {
    match resolver.distance_km(pickup, dropoffs).await {
        Ok(km) => ResolvedDistance::measured(km),
        Err(e) => {
            tracing::warn!(
                error = %e,
                pickup = %pickup,
                fallback_km = %fallback_km,
                "Distance lookup failed, using estimated fallback distance"
            );
            ResolvedDistance::estimated(fallback_km)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<DistanceMatrixRow>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixRow {
    elements: Vec<DistanceMatrixElement>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixElement {
    status: String,
    distance: Option<DistanceValue>,
}

#[derive(Debug, Deserialize)]
struct DistanceValue {
    value: i64, // metres
}

/// Google Distance Matrix client. Multi-stop trips are priced as the sum
/// of consecutive legs.
pub struct GoogleDistanceResolver {
    client: Client,
    api_base_url: String,
    api_key: Secret<String>,
}

impl GoogleDistanceResolver {
    pub fn new(api_base_url: &str, api_key: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn leg_metres(&self, origin: &str, destination: &str) -> Result<i64, DistanceError> {
        let url = format!("{}/maps/api/distancematrix/json", self.api_base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("origins", origin),
                ("destinations", destination),
                ("units", "metric"),
                ("key", self.api_key.expose_secret().as_str()),
            ])
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DistanceError::ApiError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: DistanceMatrixResponse = response.json().await?;
        if body.status != "OK" {
            return Err(DistanceError::ApiError(
                body.error_message.unwrap_or(body.status),
            ));
        }

        let element = body
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or_else(|| DistanceError::ApiError("Empty distance matrix".to_string()))?;

        match (element.status.as_str(), element.distance) {
            ("OK", Some(distance)) => Ok(distance.value),
            (status, _) => Err(DistanceError::NoRoute {
                origin: origin.to_string(),
                destination: destination.to_string(),
                status: status.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DistanceResolver for GoogleDistanceResolver {
    async fn distance_km(&self, pickup: &str, dropoffs: &[String]) -> Result<Decimal, DistanceError> {
        let mut metres = 0i64;
        let mut origin = pickup;
        for destination in dropoffs {
            metres += self.leg_metres(origin, destination).await?;
            origin = destination;
        }

        tracing::debug!(pickup = %pickup, stops = dropoffs.len(), metres, "Resolved trip distance");

        Ok(Decimal::new(metres, 3))
    }
}

/// Used when no maps API key is configured: every lookup degrades to the
/// flagged fallback distance.
pub struct UnconfiguredDistanceResolver;

#[async_trait]
impl DistanceResolver for UnconfiguredDistanceResolver {
    async fn distance_km(&self, _pickup: &str, _dropoffs: &[String]) -> Result<Decimal, DistanceError> {
        Err(DistanceError::NotConfigured)
    }
}
