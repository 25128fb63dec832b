//! Google Geocoding API provider
//!
//! The paid higher-accuracy option. Requires a billing-enabled API key;
//! selected via the "google" or "hybrid" provider configuration. Google
//! tolerates far more traffic than Nominatim, but the client still
//! carries its own limiter so a runaway run cannot burn quota.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::GeocodeProvider;
use crate::types::{Coordinates, GeocodeError};

const GOOGLE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Requests per second allowed against the Google API
const GOOGLE_RATE_PER_SECOND: u32 = 10;

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLocation,
}

#[derive(Debug, Deserialize)]
struct GoogleLocation {
    lat: f64,
    lng: f64,
}

/// Paid Google Geocoding provider
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GoogleProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be built, which cannot happen
    /// with the default configuration.
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        let rate_limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(GOOGLE_RATE_PER_SECOND).expect("rate is non-zero"),
        ));

        Self {
            client,
            api_key,
            rate_limiter,
        }
    }
}

#[async_trait]
impl GeocodeProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "Google"
    }

    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(GOOGLE_URL)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Api(status.as_u16(), body));
        }

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;

        match body.status.as_str() {
            "OK" => {
                let Some(hit) = body.results.first() else {
                    return Ok(None);
                };
                Ok(Some(Coordinates {
                    latitude: hit.geometry.location.lat,
                    longitude: hit.geometry.location.lng,
                }))
            }
            "ZERO_RESULTS" => Ok(None),
            other => Err(GeocodeError::Api(200, format!("status {}", other))),
        }
    }
}
