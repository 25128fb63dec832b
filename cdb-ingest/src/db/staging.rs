//! Staging table operations
//!
//! Staging rows are created by the ingestion collaborators and mutated
//! only here: the orchestrator claims them (atomic read-and-mark) and
//! records per-record failures. Rows are never deleted by the pipeline —
//! retention is an external policy.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cdb_common::models::EntityKind;
use cdb_common::{Error, Result};

use super::{parse_ts, parse_uuid};

/// One raw per-source payload awaiting reconciliation
#[derive(Debug, Clone)]
pub struct StagingRecord {
    pub staging_id: Uuid,
    pub ingest_run_id: Uuid,
    pub entity_kind: EntityKind,
    pub source: String,
    pub source_ref: Option<String>,
    pub raw_payload: Value,
    pub ingested_at: DateTime<Utc>,
    pub processed: bool,
    pub error_message: Option<String>,
}

impl StagingRecord {
    /// Fresh unprocessed record as submitted by an ingestion collaborator
    pub fn new(
        ingest_run_id: Uuid,
        entity_kind: EntityKind,
        source: String,
        source_ref: Option<String>,
        raw_payload: Value,
    ) -> Self {
        Self {
            staging_id: Uuid::new_v4(),
            ingest_run_id,
            entity_kind,
            source,
            source_ref,
            raw_payload,
            ingested_at: Utc::now(),
            processed: false,
            error_message: None,
        }
    }
}

/// Insert a staging record
pub async fn insert_record(pool: &SqlitePool, record: &StagingRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.raw_payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO staging_records (
            staging_id, ingest_run_id, entity_kind, source, source_ref,
            raw_payload, ingested_at, processed, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.staging_id.to_string())
    .bind(record.ingest_run_id.to_string())
    .bind(record.entity_kind.as_str())
    .bind(&record.source)
    .bind(&record.source_ref)
    .bind(payload)
    .bind(record.ingested_at.to_rfc3339())
    .bind(record.processed as i64)
    .bind(&record.error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a staging record by id
pub async fn load_record(pool: &SqlitePool, staging_id: Uuid) -> Result<StagingRecord> {
    let row = sqlx::query(
        r#"
        SELECT staging_id, ingest_run_id, entity_kind, source, source_ref,
               raw_payload, ingested_at, processed, error_message
        FROM staging_records
        WHERE staging_id = ?
        "#,
    )
    .bind(staging_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Staging record {}", staging_id)))?;

    let payload: String = row.get("raw_payload");
    let raw_payload: Value = serde_json::from_str(&payload)
        .map_err(|e| Error::Internal(format!("Failed to parse payload: {}", e)))?;

    let entity_kind: String = row.get("entity_kind");
    let ingested_at: String = row.get("ingested_at");

    Ok(StagingRecord {
        staging_id,
        ingest_run_id: parse_uuid(&row.get::<String, _>("ingest_run_id"))?,
        entity_kind: EntityKind::parse(&entity_kind)?,
        source: row.get("source"),
        source_ref: row.get("source_ref"),
        raw_payload,
        ingested_at: parse_ts(&ingested_at)?,
        processed: row.get::<i64, _>("processed") != 0,
        error_message: row.get("error_message"),
    })
}

/// Ids of unprocessed records, optionally filtered to one ingest batch
/// and one entity kind. The orchestrator pulls these in chunks and then
/// claims each one individually.
pub async fn fetch_unprocessed_ids(
    pool: &SqlitePool,
    kind: Option<EntityKind>,
    ingest_run_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<Uuid>> {
    let mut sql = String::from("SELECT staging_id FROM staging_records WHERE processed = 0");
    if kind.is_some() {
        sql.push_str(" AND entity_kind = ?");
    }
    if ingest_run_id.is_some() {
        sql.push_str(" AND ingest_run_id = ?");
    }
    sql.push_str(" ORDER BY ingested_at LIMIT ?");

    let mut query = sqlx::query(&sql);
    if let Some(kind) = kind {
        query = query.bind(kind.as_str());
    }
    if let Some(run_id) = ingest_run_id {
        query = query.bind(run_id.to_string());
    }
    query = query.bind(limit);

    let rows = query.fetch_all(pool).await?;

    rows.iter()
        .map(|row| parse_uuid(&row.get::<String, _>("staging_id")))
        .collect()
}

/// Atomically claim an unprocessed record (`processed=false → claim`).
/// Returns false when another run already claimed it — the conditional
/// update is what keeps two concurrent runs from double-processing a row.
pub async fn claim_record(pool: &SqlitePool, staging_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staging_records SET processed = 1 WHERE staging_id = ? AND processed = 0",
    )
    .bind(staging_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a per-record failure on an already-claimed row
pub async fn mark_failed(pool: &SqlitePool, staging_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE staging_records SET error_message = ? WHERE staging_id = ?")
        .bind(error)
        .bind(staging_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        cdb_common::db::create_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let pool = memory_pool().await;
        let record = StagingRecord::new(
            Uuid::new_v4(),
            EntityKind::Business,
            "osm".to_string(),
            Some("osm_node_1".to_string()),
            json!({"tags": {"name": "Al-Noor Market"}}),
        );

        insert_record(&pool, &record).await.unwrap();
        let loaded = load_record(&pool, record.staging_id).await.unwrap();

        assert_eq!(loaded.source, "osm");
        assert!(!loaded.processed);
        assert_eq!(loaded.raw_payload["tags"]["name"], "Al-Noor Market");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let pool = memory_pool().await;
        let record = StagingRecord::new(
            Uuid::new_v4(),
            EntityKind::Event,
            "ics".to_string(),
            None,
            json!({"summary": "Jummah"}),
        );
        insert_record(&pool, &record).await.unwrap();

        // First claim wins, second sees it already marked
        assert!(claim_record(&pool, record.staging_id).await.unwrap());
        assert!(!claim_record(&pool, record.staging_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_unprocessed_filters() {
        let pool = memory_pool().await;
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        let event = StagingRecord::new(
            run_a,
            EntityKind::Event,
            "ics".to_string(),
            None,
            json!({}),
        );
        let business = StagingRecord::new(
            run_b,
            EntityKind::Business,
            "csv".to_string(),
            None,
            json!({}),
        );
        insert_record(&pool, &event).await.unwrap();
        insert_record(&pool, &business).await.unwrap();

        let all = fetch_unprocessed_ids(&pool, None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let events_only = fetch_unprocessed_ids(&pool, Some(EntityKind::Event), None, 10)
            .await
            .unwrap();
        assert_eq!(events_only, vec![event.staging_id]);

        let run_b_only = fetch_unprocessed_ids(&pool, None, Some(run_b), 10)
            .await
            .unwrap();
        assert_eq!(run_b_only, vec![business.staging_id]);

        // Claimed rows disappear from the unprocessed set
        claim_record(&pool, event.staging_id).await.unwrap();
        let remaining = fetch_unprocessed_ids(&pool, None, None, 10).await.unwrap();
        assert_eq!(remaining, vec![business.staging_id]);
    }
}
