//! Provenance log operations
//!
//! Append-only: one entry per meaningful mutation of a canonical record.
//! Entries are never rewritten — the dedup guard in the writer compares
//! against the latest entry before appending, it never updates one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cdb_common::models::{EntityKind, ProvenanceAction};
use cdb_common::{Error, Result};

use super::{parse_ts, parse_uuid};

/// One immutable audit entry
#[derive(Debug, Clone)]
pub struct ProvenanceEntry {
    pub prov_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub action: ProvenanceAction,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Append an entry to the provenance log
pub async fn append_entry<'a, E>(
    executor: E,
    entity_type: EntityKind,
    entity_id: Uuid,
    action: ProvenanceAction,
    details: &Value,
) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let details = serde_json::to_string(details)
        .map_err(|e| Error::Internal(format!("Failed to serialize details: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO provenance_log (prov_id, entity_type, entity_id, action, details, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entity_type.as_str())
    .bind(entity_id.to_string())
    .bind(action.as_str())
    .bind(details)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Latest entry for an entity, optionally filtered by action. The writer
/// uses this to avoid appending duplicate entries on idempotent replay.
pub async fn latest_entry(
    pool: &SqlitePool,
    entity_type: EntityKind,
    entity_id: Uuid,
    action: Option<ProvenanceAction>,
) -> Result<Option<ProvenanceEntry>> {
    let mut sql = String::from(
        "SELECT prov_id, entity_type, entity_id, action, details, timestamp
         FROM provenance_log
         WHERE entity_type = ? AND entity_id = ?",
    );
    if action.is_some() {
        sql.push_str(" AND action = ?");
    }
    sql.push_str(" ORDER BY timestamp DESC, prov_id DESC LIMIT 1");

    let mut query = sqlx::query(&sql)
        .bind(entity_type.as_str())
        .bind(entity_id.to_string());
    if let Some(action) = action {
        query = query.bind(action.as_str());
    }

    let row = query.fetch_optional(pool).await?;

    row.map(|row| {
        let details: String = row.get("details");
        let details: Value = serde_json::from_str(&details)
            .map_err(|e| Error::Internal(format!("Failed to parse details: {}", e)))?;
        let entity_type: String = row.get("entity_type");
        let action: String = row.get("action");

        Ok(ProvenanceEntry {
            prov_id: parse_uuid(&row.get::<String, _>("prov_id"))?,
            entity_type: EntityKind::parse(&entity_type)?,
            entity_id,
            action: ProvenanceAction::parse(&action)?,
            details,
            timestamp: parse_ts(&row.get::<String, _>("timestamp"))?,
        })
    })
    .transpose()
}

/// Entry count for an entity, optionally filtered by action
pub async fn count_entries(
    pool: &SqlitePool,
    entity_type: EntityKind,
    entity_id: Uuid,
    action: Option<ProvenanceAction>,
) -> Result<i64> {
    let mut sql = String::from(
        "SELECT COUNT(*) FROM provenance_log WHERE entity_type = ? AND entity_id = ?",
    );
    if action.is_some() {
        sql.push_str(" AND action = ?");
    }

    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(entity_type.as_str())
        .bind(entity_id.to_string());
    if let Some(action) = action {
        query = query.bind(action.as_str());
    }

    Ok(query.fetch_one(pool).await?)
}
