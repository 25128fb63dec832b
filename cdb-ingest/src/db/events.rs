//! Canonical event table operations
//!
//! Canonical rows are created and mutated only by the canonical writer;
//! everything else reads.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cdb_common::models::DqStatus;
use cdb_common::{Error, Result};

use super::{parse_ts, parse_ts_opt, parse_uuid};
use crate::dq::DqIssue;

/// Canonical event row
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub event_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub venue_name: Option<String>,
    pub address_street: Option<String>,
    pub address_city: String,
    pub address_state: String,
    pub address_zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub url: Option<String>,
    pub organizer_name: Option<String>,
    pub organizer_contact: Option<String>,
    pub source: String,
    pub source_ref: Option<String>,
    pub region: String,
    pub dq_status: DqStatus,
    pub dq_issues: Vec<DqIssue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity lookup: one indexed read scoped to the region
pub async fn find_by_identity(
    pool: &SqlitePool,
    region: &str,
    title: &str,
    city: &str,
    state: &str,
) -> Result<Option<Uuid>> {
    let row = sqlx::query(
        r#"
        SELECT event_id FROM event_canonical
        WHERE region = ?
          AND lower(title) = lower(?)
          AND lower(address_city) = lower(?)
          AND lower(address_state) = lower(?)
        "#,
    )
    .bind(region)
    .bind(title)
    .bind(city)
    .bind(state)
    .fetch_optional(pool)
    .await?;

    row.map(|r| parse_uuid(&r.get::<String, _>("event_id")))
        .transpose()
}

/// Load a canonical event by id
pub async fn load_event(pool: &SqlitePool, event_id: Uuid) -> Result<Option<CanonicalEvent>> {
    let row = sqlx::query(
        r#"
        SELECT event_id, title, description, start_time, end_time, all_day,
               venue_name, address_street, address_city, address_state, address_zip,
               latitude, longitude, url, organizer_name, organizer_contact,
               source, source_ref, region, dq_status, dq_issues, created_at, updated_at
        FROM event_canonical
        WHERE event_id = ?
        "#,
    )
    .bind(event_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| event_from_row(&row)).transpose()
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CanonicalEvent> {
    let dq_status: String = row.get("dq_status");
    let dq_issues: String = row.get("dq_issues");
    let dq_issues: Vec<DqIssue> = serde_json::from_str(&dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to parse dq_issues: {}", e)))?;

    Ok(CanonicalEvent {
        event_id: parse_uuid(&row.get::<String, _>("event_id"))?,
        title: row.get("title"),
        description: row.get("description"),
        start_time: parse_ts_opt(row.get("start_time"))?,
        end_time: parse_ts_opt(row.get("end_time"))?,
        all_day: row.get::<i64, _>("all_day") != 0,
        venue_name: row.get("venue_name"),
        address_street: row.get("address_street"),
        address_city: row.get("address_city"),
        address_state: row.get("address_state"),
        address_zip: row.get("address_zip"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        url: row.get("url"),
        organizer_name: row.get("organizer_name"),
        organizer_contact: row.get("organizer_contact"),
        source: row.get("source"),
        source_ref: row.get("source_ref"),
        region: row.get("region"),
        dq_status: DqStatus::parse(&dq_status)?,
        dq_issues,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

/// Insert a new canonical event. A unique-index violation here means a
/// concurrent writer created the same identity key first — the caller
/// re-resolves and merges instead.
pub async fn insert_event<'a, E>(executor: E, event: &CanonicalEvent) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let dq_issues = serde_json::to_string(&event.dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to serialize dq_issues: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO event_canonical (
            event_id, title, description, start_time, end_time, all_day,
            venue_name, address_street, address_city, address_state, address_zip,
            latitude, longitude, url, organizer_name, organizer_contact,
            source, source_ref, region, dq_status, dq_issues, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.event_id.to_string())
    .bind(&event.title)
    .bind(&event.description)
    .bind(event.start_time.map(|t| t.to_rfc3339()))
    .bind(event.end_time.map(|t| t.to_rfc3339()))
    .bind(event.all_day as i64)
    .bind(&event.venue_name)
    .bind(&event.address_street)
    .bind(&event.address_city)
    .bind(&event.address_state)
    .bind(&event.address_zip)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(&event.url)
    .bind(&event.organizer_name)
    .bind(&event.organizer_contact)
    .bind(&event.source)
    .bind(&event.source_ref)
    .bind(&event.region)
    .bind(event.dq_status.as_str())
    .bind(dq_issues)
    .bind(event.created_at.to_rfc3339())
    .bind(event.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Write back a merged canonical event
pub async fn update_event<'a, E>(executor: E, event: &CanonicalEvent) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let dq_issues = serde_json::to_string(&event.dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to serialize dq_issues: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE event_canonical SET
            title = ?, description = ?, start_time = ?, end_time = ?, all_day = ?,
            venue_name = ?, address_street = ?, address_city = ?, address_state = ?,
            address_zip = ?, latitude = ?, longitude = ?, url = ?,
            organizer_name = ?, organizer_contact = ?, source = ?, source_ref = ?,
            region = ?, dq_status = ?, dq_issues = ?, updated_at = ?
        WHERE event_id = ?
        "#,
    )
    .bind(&event.title)
    .bind(&event.description)
    .bind(event.start_time.map(|t| t.to_rfc3339()))
    .bind(event.end_time.map(|t| t.to_rfc3339()))
    .bind(event.all_day as i64)
    .bind(&event.venue_name)
    .bind(&event.address_street)
    .bind(&event.address_city)
    .bind(&event.address_state)
    .bind(&event.address_zip)
    .bind(event.latitude)
    .bind(event.longitude)
    .bind(&event.url)
    .bind(&event.organizer_name)
    .bind(&event.organizer_contact)
    .bind(&event.source)
    .bind(&event.source_ref)
    .bind(&event.region)
    .bind(event.dq_status.as_str())
    .bind(dq_issues)
    .bind(event.updated_at.to_rfc3339())
    .bind(event.event_id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Canonical event count (test and metrics support)
pub async fn count_events(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_canonical")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
