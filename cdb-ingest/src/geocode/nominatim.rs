//! Nominatim (OpenStreetMap) geocoding provider
//!
//! The free default. No API key, but the usage policy requires a real
//! User-Agent and at most one request per second — the limiter waits
//! rather than erroring, so worker concurrency never tips the service
//! into throttling us.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::GeocodeProvider;
use crate::types::{Coordinates, GeocodeError};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// One search hit; Nominatim returns coordinates as strings
#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

/// Free OpenStreetMap Nominatim provider, rate limited to ~1 req/s
pub struct NominatimProvider {
    client: Client,
    user_agent: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl NominatimProvider {
    /// # Panics
    /// Panics if the HTTP client cannot be built (invalid TLS setup),
    /// which cannot happen with the default configuration.
    pub fn new(user_agent: String, rate_limit_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        // Burst of 1, replenished once per interval; 1000ms → 1 req/s
        let quota = Quota::with_period(Duration::from_millis(rate_limit_ms.max(1)))
            .expect("interval is non-zero")
            .allow_burst(NonZeroU32::new(1).expect("1 is non-zero"));
        let rate_limiter = RateLimiter::direct(quota);

        Self {
            client,
            user_agent,
            rate_limiter,
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        "Nominatim"
    }

    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        // Wait for a permit; exceeding the rate limit waits, never errors
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(NOMINATIM_URL)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Api(status.as_u16(), body));
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;

        let Some(hit) = results.first() else {
            return Ok(None);
        };

        let latitude = hit
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::Parse(format!("lat '{}': {}", hit.lat, e)))?;
        let longitude = hit
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::Parse(format!("lon '{}': {}", hit.lon, e)))?;

        Ok(Some(Coordinates {
            latitude,
            longitude,
        }))
    }
}
