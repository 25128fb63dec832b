//! Canonical writer
//!
//! Performs the idempotent upsert of a validated candidate into the
//! canonical store and appends the provenance trail. Merge policy:
//! an incoming non-empty field wins when the existing value is empty or
//! the incoming source outranks the source recorded on the row (the
//! authority order is configuration, not a hardcoded table).
//!
//! Idempotency: re-running with an unchanged candidate produces no new
//! provenance entries — an empty merge diff skips the write entirely,
//! and `dq_flagged` entries are deduplicated against the latest one.
//!
//! Concurrency: same-key writes are serialized through a per-key async
//! lock; a unique-index conflict on insert (two workers racing a brand
//! new key) is absorbed by re-resolving identity and retrying as a merge.

use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use cdb_common::config::PipelineSettings;
use cdb_common::models::{DqStatus, EntityKind, ProvenanceAction};
use cdb_common::{Error, Result};

use crate::db;
use crate::db::businesses::CanonicalBusiness;
use crate::db::events::CanonicalEvent;
use crate::dq::DqReport;
use crate::identity::{self, ResolvedIdentity};
use crate::types::{BusinessCategory, NormalizedBusiness, NormalizedCandidate, NormalizedEvent};

/// Retries after an insert lost a unique-index race
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Canonical writer
pub struct CanonicalWriter {
    db: SqlitePool,
    settings: Arc<PipelineSettings>,
    /// Per-identity-key locks serializing same-key merges
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CanonicalWriter {
    pub fn new(db: SqlitePool, settings: Arc<PipelineSettings>) -> Self {
        Self {
            db,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Upsert a candidate. Returns the canonical id it landed in.
    pub async fn upsert(
        &self,
        candidate: &NormalizedCandidate,
        dq: &DqReport,
        identity: &ResolvedIdentity,
    ) -> Result<Uuid> {
        let key_lock = self.lock_for(identity.key.as_str());
        let _guard = key_lock.lock().await;

        let mut existing_id = identity.existing_id;

        for attempt in 0..=MAX_CONFLICT_RETRIES {
            if let Some(id) = existing_id {
                return match candidate {
                    NormalizedCandidate::Event(event) => self.merge_event(event, dq, id).await,
                    NormalizedCandidate::Business(business) => {
                        self.merge_business(business, dq, id).await
                    }
                };
            }

            let inserted = match candidate {
                NormalizedCandidate::Event(event) => self.insert_event(event, dq).await,
                NormalizedCandidate::Business(business) => {
                    self.insert_business(business, dq).await
                }
            };

            match inserted {
                Ok(id) => return Ok(id),
                Err(e) if is_unique_violation(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    // Lost the insert race: another record with the same
                    // identity key landed first. Re-resolve and merge.
                    debug!(
                        key = identity.key.as_str(),
                        attempt = attempt + 1,
                        "Insert conflict, re-resolving identity"
                    );
                    existing_id = identity::resolve_identity(&self.db, candidate)
                        .await?
                        .existing_id;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Internal(format!(
            "Identity conflict unresolved after {} retries for key '{}'",
            MAX_CONFLICT_RETRIES,
            identity.key.as_str()
        )))
    }

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------

    async fn insert_event(&self, event: &NormalizedEvent, dq: &DqReport) -> Result<Uuid> {
        let now = Utc::now();
        let row = CanonicalEvent {
            event_id: Uuid::new_v4(),
            title: event.title.clone().unwrap_or_default(),
            description: event.description.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            all_day: event.all_day,
            venue_name: event.venue_name.clone(),
            address_street: event.address_street.clone(),
            address_city: event.address_city.clone().unwrap_or_default(),
            address_state: event.address_state.clone().unwrap_or_default(),
            address_zip: event.address_zip.clone(),
            latitude: event.coordinates.map(|c| c.latitude),
            longitude: event.coordinates.map(|c| c.longitude),
            url: event.url.clone(),
            organizer_name: event.organizer_name.clone(),
            organizer_contact: event.organizer_contact.clone(),
            source: event.source.clone(),
            source_ref: event.source_ref.clone(),
            region: event.region.clone(),
            dq_status: dq.status,
            dq_issues: dq.issues.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        db::events::insert_event(&mut *tx, &row).await?;
        db::provenance::append_entry(
            &mut *tx,
            EntityKind::Event,
            row.event_id,
            ProvenanceAction::Created,
            &created_details(&row.source, &row.source_ref),
        )
        .await?;
        if dq.status != DqStatus::Ok {
            db::provenance::append_entry(
                &mut *tx,
                EntityKind::Event,
                row.event_id,
                ProvenanceAction::DqFlagged,
                &dq_details(dq)?,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            event_id = %row.event_id,
            title = %row.title,
            dq_status = dq.status.as_str(),
            "Created canonical event"
        );

        Ok(row.event_id)
    }

    async fn insert_business(&self, business: &NormalizedBusiness, dq: &DqReport) -> Result<Uuid> {
        let now = Utc::now();
        let row = CanonicalBusiness {
            business_id: Uuid::new_v4(),
            name: business.name.clone().unwrap_or_default(),
            category: business.category,
            address_street: business.address_street.clone(),
            address_city: business.address_city.clone().unwrap_or_default(),
            address_state: business.address_state.clone().unwrap_or_default(),
            address_zip: business.address_zip.clone(),
            latitude: business.coordinates.map(|c| c.latitude),
            longitude: business.coordinates.map(|c| c.longitude),
            website: business.website.clone(),
            phone: business.phone.clone(),
            email: business.email.clone(),
            certified: business.certified,
            certifier_name: business.certifier_name.clone(),
            certifier_ref: business.certifier_ref.clone(),
            placekey: business.placekey.clone(),
            source: business.source.clone(),
            source_ref: business.source_ref.clone(),
            region: business.region.clone(),
            dq_status: dq.status,
            dq_issues: dq.issues.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        db::businesses::insert_business(&mut *tx, &row).await?;
        db::provenance::append_entry(
            &mut *tx,
            EntityKind::Business,
            row.business_id,
            ProvenanceAction::Created,
            &created_details(&row.source, &row.source_ref),
        )
        .await?;
        if dq.status != DqStatus::Ok {
            db::provenance::append_entry(
                &mut *tx,
                EntityKind::Business,
                row.business_id,
                ProvenanceAction::DqFlagged,
                &dq_details(dq)?,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            business_id = %row.business_id,
            name = %row.name,
            dq_status = dq.status.as_str(),
            "Created canonical business"
        );

        Ok(row.business_id)
    }

    // ------------------------------------------------------------------
    // Merges
    // ------------------------------------------------------------------

    async fn merge_event(
        &self,
        event: &NormalizedEvent,
        dq: &DqReport,
        event_id: Uuid,
    ) -> Result<Uuid> {
        let mut row = db::events::load_event(&self.db, event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Canonical event {}", event_id)))?;

        // Incoming source may overwrite when it outranks the recorded one
        let overwrite = self.settings.source_rank(EntityKind::Event, &event.source)
            < self.settings.source_rank(EntityKind::Event, &row.source);

        let mut diff = FieldDiff::new();
        diff.merge_text("title", &mut row.title, event.title.as_deref(), overwrite);
        diff.merge_opt(
            "description",
            &mut row.description,
            event.description.as_deref(),
            overwrite,
        );
        diff.merge_ts("start_time", &mut row.start_time, event.start_time, overwrite);
        diff.merge_ts("end_time", &mut row.end_time, event.end_time, overwrite);
        if overwrite && row.all_day != event.all_day {
            diff.record("all_day", json!(row.all_day), json!(event.all_day));
            row.all_day = event.all_day;
        }
        diff.merge_opt(
            "venue_name",
            &mut row.venue_name,
            event.venue_name.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "address_street",
            &mut row.address_street,
            event.address_street.as_deref(),
            overwrite,
        );
        diff.merge_text(
            "address_city",
            &mut row.address_city,
            event.address_city.as_deref(),
            overwrite,
        );
        diff.merge_text(
            "address_state",
            &mut row.address_state,
            event.address_state.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "address_zip",
            &mut row.address_zip,
            event.address_zip.as_deref(),
            overwrite,
        );
        diff.merge_coords(
            &mut row.latitude,
            &mut row.longitude,
            event.coordinates,
            overwrite,
        );
        diff.merge_opt("url", &mut row.url, event.url.as_deref(), overwrite);
        diff.merge_opt(
            "organizer_name",
            &mut row.organizer_name,
            event.organizer_name.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "organizer_contact",
            &mut row.organizer_contact,
            event.organizer_contact.as_deref(),
            overwrite,
        );

        if !diff.is_empty() && overwrite {
            diff.record("source", json!(row.source), json!(event.source));
            row.source = event.source.clone();
            row.source_ref = event.source_ref.clone();
        }

        let dq_changed = row.dq_status != dq.status || row.dq_issues != dq.issues;
        if dq_changed {
            row.dq_status = dq.status;
            row.dq_issues = dq.issues.clone();
        }

        self.finish_merge(
            EntityKind::Event,
            event_id,
            diff,
            dq,
            dq_changed,
            &event.source,
            MergedRow::Event(row),
        )
        .await?;

        Ok(event_id)
    }

    async fn merge_business(
        &self,
        business: &NormalizedBusiness,
        dq: &DqReport,
        business_id: Uuid,
    ) -> Result<Uuid> {
        let mut row = db::businesses::load_business(&self.db, business_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Canonical business {}", business_id)))?;

        let overwrite = self
            .settings
            .source_rank(EntityKind::Business, &business.source)
            < self.settings.source_rank(EntityKind::Business, &row.source);

        let mut diff = FieldDiff::new();
        diff.merge_text("name", &mut row.name, business.name.as_deref(), overwrite);
        if business.category != BusinessCategory::Other
            && (row.category == BusinessCategory::Other || overwrite)
            && row.category != business.category
        {
            diff.record(
                "category",
                json!(row.category.as_str()),
                json!(business.category.as_str()),
            );
            row.category = business.category;
        }
        diff.merge_opt(
            "address_street",
            &mut row.address_street,
            business.address_street.as_deref(),
            overwrite,
        );
        diff.merge_text(
            "address_city",
            &mut row.address_city,
            business.address_city.as_deref(),
            overwrite,
        );
        diff.merge_text(
            "address_state",
            &mut row.address_state,
            business.address_state.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "address_zip",
            &mut row.address_zip,
            business.address_zip.as_deref(),
            overwrite,
        );
        diff.merge_coords(
            &mut row.latitude,
            &mut row.longitude,
            business.coordinates,
            overwrite,
        );
        diff.merge_opt("website", &mut row.website, business.website.as_deref(), overwrite);
        diff.merge_opt("phone", &mut row.phone, business.phone.as_deref(), overwrite);
        diff.merge_opt("email", &mut row.email, business.email.as_deref(), overwrite);

        // Certification accrues: any source may set it, only an
        // outranking source may clear it
        if business.certified && !row.certified {
            diff.record("certified", json!(false), json!(true));
            row.certified = true;
        } else if !business.certified && row.certified && overwrite {
            diff.record("certified", json!(true), json!(false));
            row.certified = false;
        }
        diff.merge_opt(
            "certifier_name",
            &mut row.certifier_name,
            business.certifier_name.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "certifier_ref",
            &mut row.certifier_ref,
            business.certifier_ref.as_deref(),
            overwrite,
        );
        diff.merge_opt(
            "placekey",
            &mut row.placekey,
            business.placekey.as_deref(),
            overwrite,
        );

        if !diff.is_empty() && overwrite {
            diff.record("source", json!(row.source), json!(business.source));
            row.source = business.source.clone();
            row.source_ref = business.source_ref.clone();
        }

        let dq_changed = row.dq_status != dq.status || row.dq_issues != dq.issues;
        if dq_changed {
            row.dq_status = dq.status;
            row.dq_issues = dq.issues.clone();
        }

        self.finish_merge(
            EntityKind::Business,
            business_id,
            diff,
            dq,
            dq_changed,
            &business.source,
            MergedRow::Business(row),
        )
        .await?;

        Ok(business_id)
    }

    /// Shared merge tail: write the row and provenance in one
    /// transaction, skipping everything when nothing changed.
    #[allow(clippy::too_many_arguments)]
    async fn finish_merge(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        diff: FieldDiff,
        dq: &DqReport,
        dq_changed: bool,
        incoming_source: &str,
        mut row: MergedRow,
    ) -> Result<()> {
        if diff.is_empty() && !dq_changed {
            // Unchanged candidate: idempotent replay, no write, no provenance
            debug!(entity_id = %entity_id, "Merge is a no-op");
            return Ok(());
        }

        // Append dq_flagged only when the finding differs from the last one
        let mut flag_dq = false;
        if dq.status != DqStatus::Ok {
            let latest = db::provenance::latest_entry(
                &self.db,
                kind,
                entity_id,
                Some(ProvenanceAction::DqFlagged),
            )
            .await?;
            let new_details = dq_details(dq)?;
            flag_dq = latest.map(|e| e.details) != Some(new_details);
        }

        let merged_details = if diff.is_empty() {
            None
        } else {
            Some(json!({
                "source": incoming_source,
                "fields": Value::Object(diff.fields),
            }))
        };

        let mut tx = self.db.begin().await?;
        match &mut row {
            MergedRow::Event(event) => {
                event.updated_at = Utc::now();
                db::events::update_event(&mut *tx, event).await?;
            }
            MergedRow::Business(business) => {
                business.updated_at = Utc::now();
                db::businesses::update_business(&mut *tx, business).await?;
            }
        }
        if let Some(details) = &merged_details {
            db::provenance::append_entry(
                &mut *tx,
                kind,
                entity_id,
                ProvenanceAction::Merged,
                details,
            )
            .await?;
        }
        if flag_dq {
            db::provenance::append_entry(
                &mut *tx,
                kind,
                entity_id,
                ProvenanceAction::DqFlagged,
                &dq_details(dq)?,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            entity_id = %entity_id,
            merged = merged_details.is_some(),
            dq_flagged = flag_dq,
            "Merged canonical record"
        );

        Ok(())
    }
}

/// Merged row ready to write back, either entity kind
enum MergedRow {
    Event(CanonicalEvent),
    Business(CanonicalBusiness),
}

fn is_unique_violation(error: &Error) -> bool {
    match error {
        Error::Database(sqlx::Error::Database(db_err)) => {
            db_err.kind() == sqlx::error::ErrorKind::UniqueViolation
        }
        _ => false,
    }
}

fn created_details(source: &str, source_ref: &Option<String>) -> Value {
    json!({
        "source": source,
        "source_ref": source_ref,
    })
}

fn dq_details(dq: &DqReport) -> Result<Value> {
    let issues = serde_json::to_value(&dq.issues)
        .map_err(|e| Error::Internal(format!("Failed to serialize issues: {}", e)))?;
    Ok(json!({
        "status": dq.status.as_str(),
        "issues": issues,
    }))
}

/// Field-by-field merge bookkeeping: applies the merge policy and records
/// a `{field: {from, to}}` map for the provenance entry
struct FieldDiff {
    fields: Map<String, Value>,
}

impl FieldDiff {
    fn new() -> Self {
        Self { fields: Map::new() }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn record(&mut self, field: &str, from: Value, to: Value) {
        self.fields
            .insert(field.to_string(), json!({"from": from, "to": to}));
    }

    /// Optional text column: incoming non-empty wins when existing is
    /// empty or the source outranks
    fn merge_opt(
        &mut self,
        field: &str,
        existing: &mut Option<String>,
        incoming: Option<&str>,
        overwrite: bool,
    ) {
        let Some(incoming) = incoming.filter(|v| !v.is_empty()) else {
            return;
        };
        let may_set = existing.as_deref().map_or(true, |e| e.is_empty()) || overwrite;
        if may_set && existing.as_deref() != Some(incoming) {
            self.record(field, json!(existing), json!(incoming));
            *existing = Some(incoming.to_string());
        }
    }

    /// Required text column (stored as empty string when absent)
    fn merge_text(
        &mut self,
        field: &str,
        existing: &mut String,
        incoming: Option<&str>,
        overwrite: bool,
    ) {
        let Some(incoming) = incoming.filter(|v| !v.is_empty()) else {
            return;
        };
        let may_set = existing.is_empty() || overwrite;
        if may_set && existing != incoming {
            self.record(field, json!(existing), json!(incoming));
            *existing = incoming.to_string();
        }
    }

    /// Timestamp column
    fn merge_ts(
        &mut self,
        field: &str,
        existing: &mut Option<chrono::DateTime<Utc>>,
        incoming: Option<chrono::DateTime<Utc>>,
        overwrite: bool,
    ) {
        let Some(incoming) = incoming else { return };
        let may_set = existing.is_none() || overwrite;
        if may_set && *existing != Some(incoming) {
            self.record(
                field,
                json!(existing.map(|t| t.to_rfc3339())),
                json!(incoming.to_rfc3339()),
            );
            *existing = Some(incoming);
        }
    }

    /// Coordinates move as a pair
    fn merge_coords(
        &mut self,
        latitude: &mut Option<f64>,
        longitude: &mut Option<f64>,
        incoming: Option<crate::types::Coordinates>,
        overwrite: bool,
    ) {
        let Some(coords) = incoming else { return };
        let may_set = latitude.is_none() || longitude.is_none() || overwrite;
        let changed = *latitude != Some(coords.latitude) || *longitude != Some(coords.longitude);
        if may_set && changed {
            self.record(
                "coordinates",
                json!({"latitude": latitude, "longitude": longitude}),
                json!({"latitude": coords.latitude, "longitude": coords.longitude}),
            );
            *latitude = Some(coords.latitude);
            *longitude = Some(coords.longitude);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_opt_fills_empty() {
        let mut diff = FieldDiff::new();
        let mut existing = None;
        diff.merge_opt("phone", &mut existing, Some("+13035550142"), false);
        assert_eq!(existing.as_deref(), Some("+13035550142"));
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_merge_opt_keeps_existing_without_authority() {
        let mut diff = FieldDiff::new();
        let mut existing = Some("+13035550142".to_string());
        diff.merge_opt("phone", &mut existing, Some("+13035559999"), false);
        assert_eq!(existing.as_deref(), Some("+13035550142"));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_merge_opt_overwrites_with_authority() {
        let mut diff = FieldDiff::new();
        let mut existing = Some("+13035550142".to_string());
        diff.merge_opt("phone", &mut existing, Some("+13035559999"), true);
        assert_eq!(existing.as_deref(), Some("+13035559999"));
    }

    #[test]
    fn test_merge_opt_identical_is_no_diff() {
        let mut diff = FieldDiff::new();
        let mut existing = Some("+13035550142".to_string());
        diff.merge_opt("phone", &mut existing, Some("+13035550142"), true);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_merge_coords_pairwise() {
        let mut diff = FieldDiff::new();
        let (mut lat, mut lon) = (None, None);
        diff.merge_coords(
            &mut lat,
            &mut lon,
            Some(crate::types::Coordinates {
                latitude: 39.74,
                longitude: -104.98,
            }),
            false,
        );
        assert_eq!(lat, Some(39.74));
        assert_eq!(lon, Some(-104.98));
        assert!(diff.fields.contains_key("coordinates"));
    }
}
