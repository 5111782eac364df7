use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::Position;
use crate::services::cache::{CacheKey, CacheManager};

/// Errors that can occur when resolving an address
#[derive(Debug, Error)]
pub enum GeocodingError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Geocoding API returned status {0}")]
    ApiError(String),

    #[error("No location found for address: {0}")]
    NotFound(String),

    #[error("Geocoding is not configured")]
    NotConfigured,
}

/// Turns a free-text address into a position
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Position, GeocodingError>;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

/// Client for a Google Geocoding compatible HTTP API
///
/// The HTTP client is built on first use; concurrent first callers wait on the
/// same initialization instead of each building their own.
pub struct HttpGeocoder {
    endpoint: String,
    api_key: String,
    timeout: Duration,
    client: OnceCell<Client>,
    cache: Option<Arc<CacheManager>>,
}

impl HttpGeocoder {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self {
            endpoint,
            api_key,
            timeout,
            client: OnceCell::new(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Whether the HTTP client has been built yet
    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&Client, GeocodingError> {
        self.client
            .get_or_try_init(|| async {
                tracing::debug!("Initializing geocoding client for {}", self.endpoint);
                Client::builder().timeout(self.timeout).build()
            })
            .await
            .map_err(GeocodingError::from)
    }

    async fn lookup(&self, address: &str) -> Result<Position, GeocodingError> {
        let url = format!(
            "{}?address={}&key={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(address),
            urlencoding::encode(&self.api_key)
        );

        let response = self.client().await?.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GeocodingError::ApiError(response.status().to_string()));
        }

        let body: GeocodeResponse = response.json().await?;
        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Err(GeocodingError::NotFound(address.to_string())),
            other => return Err(GeocodingError::ApiError(other.to_string())),
        }

        body.results
            .first()
            .map(|result| Position::new(result.geometry.location.lat, result.geometry.location.lng))
            .ok_or_else(|| GeocodingError::NotFound(address.to_string()))
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Position, GeocodingError> {
        if self.api_key.is_empty() {
            return Err(GeocodingError::NotConfigured);
        }

        let key = CacheKey::geocode(address);
        if let Some(cache) = &self.cache {
            if let Ok(position) = cache.get::<Position>(&key).await {
                return Ok(position);
            }
        }

        let position = self.lookup(address).await?;
        tracing::debug!(
            "Geocoded '{}' to ({}, {})",
            address,
            position.latitude,
            position.longitude
        );

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &position).await {
                tracing::warn!("Failed to cache geocode result: {}", e);
            }
        }

        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key() {
        let geocoder = HttpGeocoder::new(
            "https://maps.example/geocode/json".to_string(),
            String::new(),
            Duration::from_secs(5),
        );

        assert!(matches!(
            geocoder.geocode("1 Main St").await,
            Err(GeocodingError::NotConfigured)
        ));
        assert!(!geocoder.is_initialized());
    }

    #[tokio::test]
    async fn test_client_is_built_once() {
        let geocoder = Arc::new(HttpGeocoder::new(
            "https://maps.example/geocode/json".to_string(),
            "key".to_string(),
            Duration::from_secs(5),
        ));

        let (a, b) = tokio::join!(geocoder.client(), geocoder.client());
        let (a, b) = (a.unwrap() as *const Client, b.unwrap() as *const Client);
        assert_eq!(a, b);
        assert!(geocoder.is_initialized());
    }
}
