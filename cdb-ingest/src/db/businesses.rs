//! Canonical business table operations

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use cdb_common::models::DqStatus;
use cdb_common::{Error, Result};

use super::{parse_ts, parse_uuid};
use crate::dq::DqIssue;
use crate::types::BusinessCategory;

/// Canonical business row
#[derive(Debug, Clone)]
pub struct CanonicalBusiness {
    pub business_id: Uuid,
    pub name: String,
    pub category: BusinessCategory,
    pub address_street: Option<String>,
    pub address_city: String,
    pub address_state: String,
    pub address_zip: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub certified: bool,
    pub certifier_name: Option<String>,
    pub certifier_ref: Option<String>,
    pub placekey: Option<String>,
    pub source: String,
    pub source_ref: Option<String>,
    pub region: String,
    pub dq_status: DqStatus,
    pub dq_issues: Vec<DqIssue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lookup by external stable place identifier
pub async fn find_by_placekey(pool: &SqlitePool, placekey: &str) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT business_id FROM business_canonical WHERE placekey = ?")
        .bind(placekey)
        .fetch_optional(pool)
        .await?;

    row.map(|r| parse_uuid(&r.get::<String, _>("business_id")))
        .transpose()
}

/// Identity lookup: one indexed read scoped to the region
pub async fn find_by_identity(
    pool: &SqlitePool,
    region: &str,
    name: &str,
    city: &str,
    state: &str,
) -> Result<Option<Uuid>> {
    let row = sqlx::query(
        r#"
        SELECT business_id FROM business_canonical
        WHERE region = ?
          AND lower(name) = lower(?)
          AND lower(address_city) = lower(?)
          AND lower(address_state) = lower(?)
        "#,
    )
    .bind(region)
    .bind(name)
    .bind(city)
    .bind(state)
    .fetch_optional(pool)
    .await?;

    row.map(|r| parse_uuid(&r.get::<String, _>("business_id")))
        .transpose()
}

/// Load a canonical business by id
pub async fn load_business(
    pool: &SqlitePool,
    business_id: Uuid,
) -> Result<Option<CanonicalBusiness>> {
    let row = sqlx::query(
        r#"
        SELECT business_id, name, category, address_street, address_city,
               address_state, address_zip, latitude, longitude, website, phone,
               email, certified, certifier_name, certifier_ref, placekey,
               source, source_ref, region, dq_status, dq_issues, created_at, updated_at
        FROM business_canonical
        WHERE business_id = ?
        "#,
    )
    .bind(business_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| business_from_row(&row)).transpose()
}

fn business_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CanonicalBusiness> {
    let category: String = row.get("category");
    let dq_status: String = row.get("dq_status");
    let dq_issues: String = row.get("dq_issues");
    let dq_issues: Vec<DqIssue> = serde_json::from_str(&dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to parse dq_issues: {}", e)))?;

    Ok(CanonicalBusiness {
        business_id: parse_uuid(&row.get::<String, _>("business_id"))?,
        name: row.get("name"),
        category: BusinessCategory::resolve(&category),
        address_street: row.get("address_street"),
        address_city: row.get("address_city"),
        address_state: row.get("address_state"),
        address_zip: row.get("address_zip"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        website: row.get("website"),
        phone: row.get("phone"),
        email: row.get("email"),
        certified: row.get::<i64, _>("certified") != 0,
        certifier_name: row.get("certifier_name"),
        certifier_ref: row.get("certifier_ref"),
        placekey: row.get("placekey"),
        source: row.get("source"),
        source_ref: row.get("source_ref"),
        region: row.get("region"),
        dq_status: DqStatus::parse(&dq_status)?,
        dq_issues,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

/// Insert a new canonical business. A unique-index violation means a
/// concurrent writer won the insert race for the same identity key —
/// the caller re-resolves and merges.
pub async fn insert_business<'a, E>(executor: E, business: &CanonicalBusiness) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let dq_issues = serde_json::to_string(&business.dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to serialize dq_issues: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO business_canonical (
            business_id, name, category, address_street, address_city,
            address_state, address_zip, latitude, longitude, website, phone,
            email, certified, certifier_name, certifier_ref, placekey,
            source, source_ref, region, dq_status, dq_issues, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(business.business_id.to_string())
    .bind(&business.name)
    .bind(business.category.as_str())
    .bind(&business.address_street)
    .bind(&business.address_city)
    .bind(&business.address_state)
    .bind(&business.address_zip)
    .bind(business.latitude)
    .bind(business.longitude)
    .bind(&business.website)
    .bind(&business.phone)
    .bind(&business.email)
    .bind(business.certified as i64)
    .bind(&business.certifier_name)
    .bind(&business.certifier_ref)
    .bind(&business.placekey)
    .bind(&business.source)
    .bind(&business.source_ref)
    .bind(&business.region)
    .bind(business.dq_status.as_str())
    .bind(dq_issues)
    .bind(business.created_at.to_rfc3339())
    .bind(business.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Write back a merged canonical business
pub async fn update_business<'a, E>(executor: E, business: &CanonicalBusiness) -> Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let dq_issues = serde_json::to_string(&business.dq_issues)
        .map_err(|e| Error::Internal(format!("Failed to serialize dq_issues: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE business_canonical SET
            name = ?, category = ?, address_street = ?, address_city = ?,
            address_state = ?, address_zip = ?, latitude = ?, longitude = ?,
            website = ?, phone = ?, email = ?, certified = ?, certifier_name = ?,
            certifier_ref = ?, placekey = ?, source = ?, source_ref = ?,
            region = ?, dq_status = ?, dq_issues = ?, updated_at = ?
        WHERE business_id = ?
        "#,
    )
    .bind(&business.name)
    .bind(business.category.as_str())
    .bind(&business.address_street)
    .bind(&business.address_city)
    .bind(&business.address_state)
    .bind(&business.address_zip)
    .bind(business.latitude)
    .bind(business.longitude)
    .bind(&business.website)
    .bind(&business.phone)
    .bind(&business.email)
    .bind(business.certified as i64)
    .bind(&business.certifier_name)
    .bind(&business.certifier_ref)
    .bind(&business.placekey)
    .bind(&business.source)
    .bind(&business.source_ref)
    .bind(&business.region)
    .bind(business.dq_status.as_str())
    .bind(dq_issues)
    .bind(business.updated_at.to_rfc3339())
    .bind(business.business_id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Canonical business count (test and metrics support)
pub async fn count_businesses(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM business_canonical")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
