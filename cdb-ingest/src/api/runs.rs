//! Run trigger and status endpoints
//!
//! The external scheduler (cron-equivalent) POSTs here to start a run
//! and polls the status endpoint for monitoring. The run executes in a
//! background task; per-record failures never fail the run, only
//! systemic errors do, and those surface through the persisted run row.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cdb_common::models::{BuildType, IngestRun};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    /// "events", "businesses", or "all" (default)
    pub build_type: Option<String>,
    /// Restrict the sweep to one staging batch; also becomes the run id.
    /// Absent: sweep everything unprocessed under a fresh run id.
    pub ingest_run_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TriggerRunResponse {
    pub ingest_run_id: Uuid,
    pub status: String,
}

/// POST /runs
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(request): Json<TriggerRunRequest>,
) -> ApiResult<Json<TriggerRunResponse>> {
    let build_type = match request.build_type.as_deref() {
        None => BuildType::All,
        Some(s) => BuildType::parse(s).map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    let ingest_run_id = request.ingest_run_id.unwrap_or_else(Uuid::new_v4);

    // A run row for this id means the batch was already triggered
    if db::runs::load_run(&state.db, ingest_run_id).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Run {} already exists",
            ingest_run_id
        )));
    }

    let orchestrator = state.orchestrator.clone();
    let batch = request.ingest_run_id;
    tokio::spawn(async move {
        // Outcome is persisted on the run row; systemic errors are
        // already logged by the orchestrator
        let _ = orchestrator.execute(ingest_run_id, build_type, batch).await;
    });

    tracing::info!(
        ingest_run_id = %ingest_run_id,
        build_type = build_type.as_str(),
        "Run triggered"
    );

    Ok(Json(TriggerRunResponse {
        ingest_run_id,
        status: "running".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub ingest_run_id: Uuid,
    pub build_type: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub records_processed: u64,
    pub records_failed: u64,
    pub error_log: Option<String>,
}

impl From<IngestRun> for RunStatusResponse {
    fn from(run: IngestRun) -> Self {
        Self {
            ingest_run_id: run.ingest_run_id,
            build_type: run.build_type.as_str().to_string(),
            status: run.status.as_str().to_string(),
            started_at: run.started_at.to_rfc3339(),
            completed_at: run.completed_at.map(|t| t.to_rfc3339()),
            records_processed: run.records_processed,
            records_failed: run.records_failed,
            error_log: run.error_log,
        }
    }
}

/// GET /runs/:ingest_run_id
pub async fn run_status(
    State(state): State<AppState>,
    Path(ingest_run_id): Path<Uuid>,
) -> ApiResult<Json<RunStatusResponse>> {
    let run = db::runs::load_run(&state.db, ingest_run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Run {}", ingest_run_id)))?;

    Ok(Json(run.into()))
}
