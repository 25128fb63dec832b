//! Run metadata table operations

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cdb_common::models::{BuildType, IngestRun, RunStatus};
use cdb_common::Result;

use super::{parse_ts, parse_ts_opt};

/// Insert the run row at orchestration start
pub async fn insert_run(pool: &SqlitePool, run: &IngestRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (
            ingest_run_id, build_type, started_at, completed_at, status,
            records_processed, records_failed, error_log
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.ingest_run_id.to_string())
    .bind(run.build_type.as_str())
    .bind(run.started_at.to_rfc3339())
    .bind(run.completed_at.map(|t| t.to_rfc3339()))
    .bind(run.status.as_str())
    .bind(run.records_processed as i64)
    .bind(run.records_failed as i64)
    .bind(&run.error_log)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write back the run row (progress or terminal state)
pub async fn update_run(pool: &SqlitePool, run: &IngestRun) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_runs SET
            completed_at = ?, status = ?, records_processed = ?,
            records_failed = ?, error_log = ?
        WHERE ingest_run_id = ?
        "#,
    )
    .bind(run.completed_at.map(|t| t.to_rfc3339()))
    .bind(run.status.as_str())
    .bind(run.records_processed as i64)
    .bind(run.records_failed as i64)
    .bind(&run.error_log)
    .bind(run.ingest_run_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a run row for status polling
pub async fn load_run(pool: &SqlitePool, ingest_run_id: Uuid) -> Result<Option<IngestRun>> {
    let row = sqlx::query(
        r#"
        SELECT ingest_run_id, build_type, started_at, completed_at, status,
               records_processed, records_failed, error_log
        FROM ingest_runs
        WHERE ingest_run_id = ?
        "#,
    )
    .bind(ingest_run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let build_type: String = row.get("build_type");
        let status: String = row.get("status");

        Ok(IngestRun {
            ingest_run_id,
            build_type: BuildType::parse(&build_type)?,
            started_at: parse_ts(&row.get::<String, _>("started_at"))?,
            completed_at: parse_ts_opt(row.get("completed_at"))?,
            status: RunStatus::parse(&status)?,
            records_processed: row.get::<i64, _>("records_processed") as u64,
            records_failed: row.get::<i64, _>("records_failed") as u64,
            error_log: row.get("error_log"),
        })
    })
    .transpose()
}
