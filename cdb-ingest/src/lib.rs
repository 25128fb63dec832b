//! cdb-ingest library interface
//!
//! Exposes the reconciliation pipeline and its HTTP surface for
//! integration testing.

pub mod api;
pub mod db;
pub mod dq;
pub mod error;
pub mod geocode;
pub mod identity;
pub mod mappers;
pub mod normalize;
pub mod run;
pub mod types;
pub mod writer;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use cdb_common::config::TomlConfig;

use crate::geocode::GeocoderChain;
use crate::run::RunOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Run orchestrator (owns the shared geocoder chain and writer)
    pub orchestrator: Arc<RunOrchestrator>,
}

impl AppState {
    /// Build state from configuration. The geocoder chain is the one
    /// long-lived shared resource every run's workers go through.
    pub fn new(db: SqlitePool, config: &TomlConfig) -> Self {
        let geocoder = Arc::new(GeocoderChain::from_config(&config.geocoding));
        Self::with_geocoder(db, config, geocoder)
    }

    /// Build state with an injected geocoder chain (tests use stub
    /// providers here)
    pub fn with_geocoder(
        db: SqlitePool,
        config: &TomlConfig,
        geocoder: Arc<GeocoderChain>,
    ) -> Self {
        let settings = Arc::new(config.pipeline.clone());
        let regions = Arc::new(config.regions.clone());
        let orchestrator = Arc::new(RunOrchestrator::new(
            db.clone(),
            geocoder,
            settings,
            regions,
        ));

        Self { db, orchestrator }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::ingest_routes())
        .merge(api::run_routes())
        .with_state(state)
}
