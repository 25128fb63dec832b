//! Staging submission endpoint
//!
//! Ingestion collaborators (feed pollers, file loaders, the claim
//! approval flow) push raw per-source payloads here; the pipeline
//! absorbs their schema differences per source tag.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cdb_common::models::EntityKind;

use crate::db::staging::{self, StagingRecord};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRawRecordRequest {
    /// "event" or "business"
    pub entity_kind: String,
    /// Source tag ("ics", "csv", "osm", "certifier", "claim")
    pub source: String,
    /// Source-local opaque identifier
    pub source_ref: Option<String>,
    /// Raw source-shaped payload
    pub payload: Value,
    /// Staging batch to join; a new batch is opened when absent
    pub ingest_run_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SubmitRawRecordResponse {
    pub staging_id: Uuid,
    pub ingest_run_id: Uuid,
}

/// POST /ingest/records
pub async fn submit_raw_record(
    State(state): State<AppState>,
    Json(request): Json<SubmitRawRecordRequest>,
) -> ApiResult<Json<SubmitRawRecordResponse>> {
    let entity_kind = EntityKind::parse(&request.entity_kind)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if request.source.trim().is_empty() {
        return Err(ApiError::BadRequest("source must not be empty".to_string()));
    }

    let ingest_run_id = request.ingest_run_id.unwrap_or_else(Uuid::new_v4);
    let record = StagingRecord::new(
        ingest_run_id,
        entity_kind,
        request.source,
        request.source_ref,
        request.payload,
    );

    staging::insert_record(&state.db, &record).await?;

    tracing::debug!(
        staging_id = %record.staging_id,
        ingest_run_id = %ingest_run_id,
        source = %record.source,
        "Raw record staged"
    );

    Ok(Json(SubmitRawRecordResponse {
        staging_id: record.staging_id,
        ingest_run_id,
    }))
}
