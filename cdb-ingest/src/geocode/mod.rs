//! Geocoding provider abstraction
//!
//! Three interchangeable strategies selected by configuration: the free
//! Nominatim provider (default), the paid Google provider, and a hybrid
//! that tries Google first and falls back to Nominatim. Providers sit
//! behind one uniform `resolve` seam; fallback is an ordered chain, not
//! inheritance.
//!
//! Failure semantics: a provider error is retried with bounded backoff,
//! then the chain falls through to the next provider. When everything is
//! exhausted the record proceeds WITHOUT coordinates — the DQ evaluator
//! flags it; geocoding never drops a record.

pub mod google;
pub mod nominatim;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Coordinates, GeocodeError};
use cdb_common::config::GeocodingConfig;

pub use google::GoogleProvider;
pub use nominatim::NominatimProvider;

/// Uniform provider seam. `Ok(None)` means the provider answered but
/// found nothing; `Err` means the provider itself failed and a retry or
/// fallback is worthwhile.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Resolve free-text address to coordinates
    async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// Ordered provider chain with per-provider bounded retry.
///
/// This is the single rate-limited gate shared by all pipeline workers:
/// each concrete provider carries its own limiter, so worker concurrency
/// never multiplies outbound request rate.
pub struct GeocoderChain {
    providers: Vec<Box<dyn GeocodeProvider>>,
    max_retries: u32,
}

impl GeocoderChain {
    pub fn new(providers: Vec<Box<dyn GeocodeProvider>>, max_retries: u32) -> Self {
        Self {
            providers,
            max_retries,
        }
    }

    /// Build the configured chain: "osm", "google", or "hybrid".
    /// "google"/"hybrid" without an API key degrade to the free provider.
    pub fn from_config(config: &GeocodingConfig) -> Self {
        let mut providers: Vec<Box<dyn GeocodeProvider>> = Vec::new();

        match config.provider.as_str() {
            "google" => match &config.google_api_key {
                Some(key) if !key.trim().is_empty() => {
                    providers.push(Box::new(GoogleProvider::new(key.clone())));
                }
                _ => {
                    warn!("Google geocoding selected but no API key configured, using Nominatim");
                    providers.push(Box::new(NominatimProvider::new(
                        config.user_agent.clone(),
                        config.rate_limit_ms,
                    )));
                }
            },
            "hybrid" => {
                if let Some(key) = config.google_api_key.as_ref().filter(|k| !k.trim().is_empty())
                {
                    providers.push(Box::new(GoogleProvider::new(key.clone())));
                }
                providers.push(Box::new(NominatimProvider::new(
                    config.user_agent.clone(),
                    config.rate_limit_ms,
                )));
            }
            _ => {
                providers.push(Box::new(NominatimProvider::new(
                    config.user_agent.clone(),
                    config.rate_limit_ms,
                )));
            }
        }

        Self::new(providers, config.max_retries)
    }

    /// Try each provider in order, retrying provider errors with
    /// exponential backoff. `None` when every provider is exhausted or
    /// answered not-found — never an error.
    pub async fn resolve(&self, address: &str) -> Option<Coordinates> {
        for provider in &self.providers {
            let mut attempt: u32 = 0;
            loop {
                match provider.resolve(address).await {
                    Ok(Some(coords)) => {
                        debug!(
                            provider = provider.name(),
                            address = address,
                            latitude = coords.latitude,
                            longitude = coords.longitude,
                            "Geocoded"
                        );
                        return Some(coords);
                    }
                    Ok(None) => {
                        debug!(
                            provider = provider.name(),
                            address = address,
                            "No geocoding result"
                        );
                        break; // not-found is final for this provider; try the next
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.max_retries {
                            warn!(
                                provider = provider.name(),
                                address = address,
                                error = %e,
                                "Geocoding failed after {} retries",
                                self.max_retries
                            );
                            break;
                        }
                        let backoff = Duration::from_millis(250 * (1 << attempt.min(4)));
                        debug!(
                            provider = provider.name(),
                            attempt = attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Geocoding error, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        None
    }
}

// ============================================================================
// Tests
// ============================================================================
