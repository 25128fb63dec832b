//! Database initialization
//!
//! Creates the backbone schema on first run and is safe to call again on
//! every startup (all statements are `IF NOT EXISTS`).
//!
//! Tables:
//! - `staging_records` — raw per-source payloads awaiting reconciliation
//! - `event_canonical` / `business_canonical` — served canonical datasets
//! - `provenance_log` — append-only audit trail of canonical mutations
//! - `ingest_runs` — run metadata for external monitoring

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer; the worker pool
    // issues canonical writes from several tasks at once
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create all backbone tables (idempotent). Split out from
/// `init_database` so tests can run against `sqlite::memory:` pools.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_staging_table(pool).await?;
    create_event_canonical_table(pool).await?;
    create_business_canonical_table(pool).await?;
    create_provenance_table(pool).await?;
    create_ingest_runs_table(pool).await?;

    info!("Database tables initialized");

    Ok(())
}

async fn create_staging_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_records (
            staging_id TEXT PRIMARY KEY,
            ingest_run_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            source TEXT NOT NULL,
            source_ref TEXT,
            raw_payload TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_unprocessed
         ON staging_records(processed, entity_kind)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staging_run
         ON staging_records(ingest_run_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_event_canonical_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_canonical (
            event_id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            description TEXT,
            start_time TEXT,
            end_time TEXT,
            all_day INTEGER NOT NULL DEFAULT 0,
            venue_name TEXT,
            address_street TEXT,
            address_city TEXT NOT NULL DEFAULT '',
            address_state TEXT NOT NULL DEFAULT '',
            address_zip TEXT,
            latitude REAL,
            longitude REAL,
            url TEXT,
            organizer_name TEXT,
            organizer_contact TEXT,
            source TEXT NOT NULL,
            source_ref TEXT,
            region TEXT NOT NULL,
            dq_status TEXT NOT NULL DEFAULT 'ok',
            dq_issues TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup invariant: one canonical event per identity key within a region
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_event_dedup
         ON event_canonical(region, lower(title), lower(address_city), lower(address_state))",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_business_canonical_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS business_canonical (
            business_id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'other',
            address_street TEXT,
            address_city TEXT NOT NULL DEFAULT '',
            address_state TEXT NOT NULL DEFAULT '',
            address_zip TEXT,
            latitude REAL,
            longitude REAL,
            website TEXT,
            phone TEXT,
            email TEXT,
            certified INTEGER NOT NULL DEFAULT 0,
            certifier_name TEXT,
            certifier_ref TEXT,
            placekey TEXT,
            source TEXT NOT NULL,
            source_ref TEXT,
            region TEXT NOT NULL,
            dq_status TEXT NOT NULL DEFAULT 'ok',
            dq_issues TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup invariant: one canonical business per identity key within a region
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_business_dedup
         ON business_canonical(region, lower(name), lower(address_city), lower(address_state))",
    )
    .execute(pool)
    .await?;

    // External stable place identifier, unique where present
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_business_placekey
         ON business_canonical(placekey) WHERE placekey IS NOT NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_provenance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provenance_log (
            prov_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_provenance_entity
         ON provenance_log(entity_type, entity_id, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ingest_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            ingest_run_id TEXT PRIMARY KEY,
            build_type TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            status TEXT NOT NULL,
            records_processed INTEGER NOT NULL DEFAULT 0,
            records_failed INTEGER NOT NULL DEFAULT 0,
            error_log TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
