//! End-to-end pipeline tests against an in-memory database
//!
//! Each test stages raw records, executes a run through the real
//! orchestrator (with a stub geocoding provider), and asserts on the
//! canonical store and the provenance trail.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use cdb_common::config::TomlConfig;
use cdb_common::models::{BuildType, DqStatus, EntityKind, ProvenanceAction, RunStatus};

use cdb_ingest::db::staging::{self, StagingRecord};
use cdb_ingest::db::{businesses, events, provenance, runs};
use cdb_ingest::geocode::{GeocodeProvider, GeocoderChain};
use cdb_ingest::run::RunOrchestrator;
use cdb_ingest::types::{Coordinates, GeocodeError};
use cdb_ingest::AppState;

/// Stub provider returning fixed coordinates (or nothing)
struct StubGeocoder {
    coords: Option<Coordinates>,
}

#[async_trait]
impl GeocodeProvider for StubGeocoder {
    fn name(&self) -> &'static str {
        "Stub"
    }

    async fn resolve(&self, _address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(self.coords)
    }
}

fn denver() -> Coordinates {
    Coordinates {
        latitude: 39.74,
        longitude: -104.98,
    }
}

async fn setup(geocoder_coords: Option<Coordinates>) -> (SqlitePool, Arc<RunOrchestrator>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    cdb_common::db::create_tables(&pool).await.unwrap();

    let config = TomlConfig::default();
    let chain = GeocoderChain::new(
        vec![Box::new(StubGeocoder {
            coords: geocoder_coords,
        })],
        0,
    );
    let state = AppState::with_geocoder(pool.clone(), &config, Arc::new(chain));

    (pool, state.orchestrator)
}

async fn stage(
    pool: &SqlitePool,
    batch: Uuid,
    kind: EntityKind,
    source: &str,
    payload: Value,
) -> Uuid {
    let record = StagingRecord::new(batch, kind, source.to_string(), None, payload);
    staging::insert_record(pool, &record).await.unwrap();
    record.staging_id
}

fn al_noor_osm() -> Value {
    json!({
        "type": "node",
        "id": 4730294117u64,
        "tags": {
            "name": "Al-Noor Market",
            "shop": "grocery",
            "addr:city": "Denver",
            "addr:state": "CO"
        },
        "region": "CO"
    })
}

#[tokio::test]
async fn test_new_business_geocoded_and_created() {
    // Ingest a business with no coordinates; the free geocoder answers
    // with Denver coordinates inside the CO bbox
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();
    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 0);

    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);

    let id = businesses::find_by_identity(&pool, "CO", "Al-Noor Market", "Denver", "CO")
        .await
        .unwrap()
        .expect("canonical row exists");
    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();

    assert_eq!(row.latitude, Some(39.74));
    assert_eq!(row.longitude, Some(-104.98));
    assert_eq!(row.dq_status, DqStatus::Ok);
    assert!(row.dq_issues.is_empty());

    let created = provenance::count_entries(
        &pool,
        EntityKind::Business,
        id,
        Some(ProvenanceAction::Created),
    )
    .await
    .unwrap();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_second_source_merges_new_fields() {
    // Same business arrives again from a more authoritative source with
    // a phone number: the existing row gains the phone, count stays 1,
    // one merged provenance entry is appended
    let (pool, orchestrator) = setup(Some(denver())).await;

    let batch1 = Uuid::new_v4();
    stage(&pool, batch1, EntityKind::Business, "osm", al_noor_osm()).await;
    orchestrator
        .execute(batch1, BuildType::Businesses, Some(batch1))
        .await
        .unwrap();

    let id = businesses::find_by_identity(&pool, "CO", "Al-Noor Market", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let before = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert!(before.phone.is_none());

    let batch2 = Uuid::new_v4();
    stage(
        &pool,
        batch2,
        EntityKind::Business,
        "csv",
        json!({
            "name": "Al-Noor Market",
            "category": "grocery",
            "address_city": "Denver",
            "address_state": "CO",
            "phone": "(303) 555-0142",
            "region": "CO"
        }),
    )
    .await;
    orchestrator
        .execute(batch2, BuildType::Businesses, Some(batch2))
        .await
        .unwrap();

    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);

    let after = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert_eq!(after.phone.as_deref(), Some("+13035550142"));
    assert!(after.updated_at >= before.updated_at);

    let merged = provenance::count_entries(
        &pool,
        EntityKind::Business,
        id,
        Some(ProvenanceAction::Merged),
    )
    .await
    .unwrap();
    assert_eq!(merged, 1);
}

#[tokio::test]
async fn test_idempotent_replay() {
    // A second orchestrator pass over an already-processed batch is a
    // no-op: same row count, same values, no extra provenance
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();
    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;

    orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    let id = businesses::find_by_identity(&pool, "CO", "Al-Noor Market", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let first = businesses::load_business(&pool, id).await.unwrap().unwrap();
    let prov_before = provenance::count_entries(&pool, EntityKind::Business, id, None)
        .await
        .unwrap();

    // Replay: the batch is fully processed, nothing is claimable
    let replay_id = Uuid::new_v4();
    let replay = orchestrator
        .execute(replay_id, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    assert_eq!(replay.records_processed, 0);
    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);

    let second = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert_eq!(second.updated_at, first.updated_at);

    let prov_after = provenance::count_entries(&pool, EntityKind::Business, id, None)
        .await
        .unwrap();
    assert_eq!(prov_after, prov_before);
}

#[tokio::test]
async fn test_reingesting_identical_payload_adds_no_provenance() {
    // The same payload staged a second time merges as a no-op
    let (pool, orchestrator) = setup(Some(denver())).await;

    let batch1 = Uuid::new_v4();
    stage(&pool, batch1, EntityKind::Business, "osm", al_noor_osm()).await;
    orchestrator
        .execute(batch1, BuildType::Businesses, Some(batch1))
        .await
        .unwrap();

    let id = businesses::find_by_identity(&pool, "CO", "Al-Noor Market", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let prov_before = provenance::count_entries(&pool, EntityKind::Business, id, None)
        .await
        .unwrap();

    let batch2 = Uuid::new_v4();
    stage(&pool, batch2, EntityKind::Business, "osm", al_noor_osm()).await;
    orchestrator
        .execute(batch2, BuildType::Businesses, Some(batch2))
        .await
        .unwrap();

    let prov_after = provenance::count_entries(&pool, EntityKind::Business, id, None)
        .await
        .unwrap();
    assert_eq!(prov_after, prov_before);
    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_dedup_within_one_run() {
    // Two candidates with the same identity key in one batch end up in
    // exactly one canonical row
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();

    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;
    stage(
        &pool,
        batch,
        EntityKind::Business,
        "csv",
        json!({
            "name": "AL-NOOR MARKET",
            "address_city": "denver",
            "address_state": "co",
            "region": "CO"
        }),
    )
    .await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    assert_eq!(run.records_processed, 2);
    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_event_flagged_but_preserved() {
    // An event 45 days in the past gets a staleness warning and stays in
    // the canonical store
    let (pool, orchestrator) = setup(None).await;
    let batch = Uuid::new_v4();

    let start = chrono::Utc::now() - chrono::Duration::days(45);
    let end = start + chrono::Duration::hours(2);
    stage(
        &pool,
        batch,
        EntityKind::Event,
        "csv",
        json!({
            "title": "Eid Bazaar",
            "start_time": start.to_rfc3339(),
            "end_time": end.to_rfc3339(),
            "address_city": "Denver",
            "address_state": "CO",
            "latitude": 39.74,
            "longitude": -104.98,
            "region": "CO"
        }),
    )
    .await;

    orchestrator
        .execute(batch, BuildType::Events, Some(batch))
        .await
        .unwrap();

    let id = events::find_by_identity(&pool, "CO", "Eid Bazaar", "Denver", "CO")
        .await
        .unwrap()
        .expect("event preserved despite warning");
    let row = events::load_event(&pool, id).await.unwrap().unwrap();

    assert_eq!(row.dq_status, DqStatus::Warning);
    assert!(row.dq_issues.iter().any(|i| i.code == "event_stale"));

    let flagged = provenance::count_entries(
        &pool,
        EntityKind::Event,
        id,
        Some(ProvenanceAction::DqFlagged),
    )
    .await
    .unwrap();
    assert_eq!(flagged, 1);
}

#[tokio::test]
async fn test_incomplete_business_preserved_with_error_status() {
    // Missing name: dq_status=error, but the record is written anyway
    // (preserve-and-flag, not reject)
    let (pool, orchestrator) = setup(None).await;
    let batch = Uuid::new_v4();

    stage(
        &pool,
        batch,
        EntityKind::Business,
        "csv",
        json!({
            "address_city": "Denver",
            "address_state": "CO",
            "region": "CO"
        }),
    )
    .await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    // DQ error is not a record failure
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 0);
    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);

    let id = businesses::find_by_identity(&pool, "CO", "", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.dq_status, DqStatus::Error);
}

#[tokio::test]
async fn test_mapping_failure_isolated() {
    // One malformed record does not abort the run; the good record in the
    // same batch still lands
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();

    let bad_id = stage(
        &pool,
        batch,
        EntityKind::Business,
        "csv",
        json!(["not", "an", "object"]),
    )
    .await;
    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 1);

    let bad = staging::load_record(&pool, bad_id).await.unwrap();
    assert!(bad.processed);
    assert!(bad.error_message.is_some());
}

#[tokio::test]
async fn test_unknown_source_recorded_as_failure() {
    let (pool, orchestrator) = setup(None).await;
    let batch = Uuid::new_v4();

    let staging_id = stage(
        &pool,
        batch,
        EntityKind::Business,
        "scraper9000",
        json!({"name": "X"}),
    )
    .await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    assert_eq!(run.records_failed, 1);
    let record = staging::load_record(&pool, staging_id).await.unwrap();
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .contains("scraper9000"));
}

#[tokio::test]
async fn test_claim_outranks_scraped_import() {
    // An approved self-service claim overwrites an osm-sourced field;
    // a later osm record cannot overwrite the claim's value
    let (pool, orchestrator) = setup(None).await;

    let osm_payload = json!({
        "type": "node",
        "id": 1,
        "tags": {
            "name": "Crescent Halal Meats",
            "shop": "butcher",
            "addr:city": "Aurora",
            "addr:state": "CO",
            "phone": "(303) 555-1111"
        },
        "region": "CO"
    });

    let batch1 = Uuid::new_v4();
    stage(&pool, batch1, EntityKind::Business, "osm", osm_payload.clone()).await;
    orchestrator
        .execute(batch1, BuildType::Businesses, Some(batch1))
        .await
        .unwrap();

    let id = businesses::find_by_identity(&pool, "CO", "Crescent Halal Meats", "Aurora", "CO")
        .await
        .unwrap()
        .unwrap();

    // Owner claims the listing and corrects the phone
    let batch2 = Uuid::new_v4();
    stage(
        &pool,
        batch2,
        EntityKind::Business,
        "claim",
        json!({
            "business_name": "Crescent Halal Meats",
            "business_city": "Aurora",
            "business_state": "CO",
            "phone": "(303) 555-2222",
            "region": "CO"
        }),
    )
    .await;
    orchestrator
        .execute(batch2, BuildType::Businesses, Some(batch2))
        .await
        .unwrap();

    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.phone.as_deref(), Some("+13035552222"));
    assert_eq!(row.source, "claim");

    // The scraped import comes around again: the claim's phone stays
    let batch3 = Uuid::new_v4();
    stage(&pool, batch3, EntityKind::Business, "osm", osm_payload).await;
    orchestrator
        .execute(batch3, BuildType::Businesses, Some(batch3))
        .await
        .unwrap();

    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.phone.as_deref(), Some("+13035552222"));
    assert_eq!(row.source, "claim");
}

#[tokio::test]
async fn test_placekey_identifies_record_across_name_variants() {
    // Records sharing a placekey reconcile into one row even when the
    // composite key differs
    let (pool, orchestrator) = setup(None).await;

    let batch1 = Uuid::new_v4();
    stage(
        &pool,
        batch1,
        EntityKind::Business,
        "csv",
        json!({
            "name": "Al-Noor Market",
            "address_city": "Denver",
            "address_state": "CO",
            "placekey": "227-223@627-wbz-tsq",
            "region": "CO"
        }),
    )
    .await;
    orchestrator
        .execute(batch1, BuildType::Businesses, Some(batch1))
        .await
        .unwrap();

    let batch2 = Uuid::new_v4();
    stage(
        &pool,
        batch2,
        EntityKind::Business,
        "csv",
        json!({
            "name": "Al Noor Market & Deli",
            "address_city": "Denver",
            "address_state": "CO",
            "placekey": "227-223@627-wbz-tsq",
            "region": "CO"
        }),
    )
    .await;
    orchestrator
        .execute(batch2, BuildType::Businesses, Some(batch2))
        .await
        .unwrap();

    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_coordinates_outside_region_warn() {
    // Payload carries New York coordinates on a Colorado record: bbox
    // check warns, record stays
    let (pool, orchestrator) = setup(None).await;
    let batch = Uuid::new_v4();

    stage(
        &pool,
        batch,
        EntityKind::Business,
        "csv",
        json!({
            "name": "Misplaced Market",
            "address_city": "Denver",
            "address_state": "CO",
            "latitude": 40.71,
            "longitude": -74.0,
            "region": "CO"
        }),
    )
    .await;

    orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    let id = businesses::find_by_identity(&pool, "CO", "Misplaced Market", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();

    assert_eq!(row.dq_status, DqStatus::Warning);
    assert!(row
        .dq_issues
        .iter()
        .any(|i| i.code == "coordinates_outside_region"));
}

#[tokio::test]
async fn test_geocoder_exhaustion_yields_warning_not_failure() {
    // No geocoding result at all: the record proceeds without
    // coordinates and the DQ evaluator flags it
    let (pool, orchestrator) = setup(None).await;
    let batch = Uuid::new_v4();
    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;

    let run = orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();
    assert_eq!(run.records_failed, 0);

    let id = businesses::find_by_identity(&pool, "CO", "Al-Noor Market", "Denver", "CO")
        .await
        .unwrap()
        .unwrap();
    let row = businesses::load_business(&pool, id).await.unwrap().unwrap();
    assert!(row.latitude.is_none());
    assert_eq!(row.dq_status, DqStatus::Warning);
    assert!(row.dq_issues.iter().any(|i| i.code == "missing_coordinates"));
}

#[tokio::test]
async fn test_run_row_records_outcome() {
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();
    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;

    orchestrator
        .execute(batch, BuildType::Businesses, Some(batch))
        .await
        .unwrap();

    let run = runs::load_run(&pool, batch).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_processed, 1);
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_event_and_business_pipelines_share_a_run() {
    // BuildType::All sweeps both entity kinds
    let (pool, orchestrator) = setup(Some(denver())).await;
    let batch = Uuid::new_v4();

    stage(&pool, batch, EntityKind::Business, "osm", al_noor_osm()).await;
    let start = chrono::Utc::now() + chrono::Duration::days(3);
    stage(
        &pool,
        batch,
        EntityKind::Event,
        "ics",
        json!({
            "uid": "evt-1",
            "summary": "Community Iftar",
            "dtstart": start.to_rfc3339(),
            "dtend": (start + chrono::Duration::hours(3)).to_rfc3339(),
            "city": "Denver",
            "state": "CO",
            "region": "CO"
        }),
    )
    .await;

    let run = orchestrator
        .execute(batch, BuildType::All, Some(batch))
        .await
        .unwrap();

    assert_eq!(run.records_processed, 2);
    assert_eq!(businesses::count_businesses(&pool).await.unwrap(), 1);
    assert_eq!(events::count_events(&pool).await.unwrap(), 1);
}
