//! HTTP API surface
//!
//! Thin collaborator contracts around the core pipeline: submit a raw
//! record into staging, trigger an ingest run, poll run status, health.

pub mod health;
pub mod ingest;
pub mod runs;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health_check))
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/ingest/records", post(ingest::submit_raw_record))
}

pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(runs::trigger_run))
        .route("/runs/:ingest_run_id", get(runs::run_status))
}
