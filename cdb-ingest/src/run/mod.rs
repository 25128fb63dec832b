//! Run orchestration
//!
//! Drives one pipeline execution over a batch of staging records:
//! claim → map → resolve identity → geocode (only when coordinates are
//! missing) → evaluate DQ → write canonical, with per-record error
//! isolation. One bad record never aborts the run; only a systemic
//! storage failure does.
//!
//! Records are processed by a bounded worker pool. All geocoding calls
//! funnel through the single shared provider chain, so worker
//! concurrency never multiplies outbound request rate. Re-running over
//! an already-processed batch is a no-op: the orchestrator only claims
//! `processed = 0` rows, and the claim is an atomic conditional update.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cdb_common::config::{PipelineSettings, RegionConfig};
use cdb_common::models::{BuildType, EntityKind, IngestRun};

use crate::db;
use crate::dq::DqEvaluator;
use crate::geocode::GeocoderChain;
use crate::identity;
use crate::mappers;
use crate::types::{MappingError, PipelineError};
use crate::writer::CanonicalWriter;

/// Staging rows pulled per claim sweep
const CLAIM_BATCH: i64 = 64;

/// Outcome of one record's trip through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    /// Written to the canonical store
    Processed,
    /// Absorbed per-record failure, recorded on the staging row
    Failed,
    /// Another run claimed the record first
    Skipped,
}

/// Run orchestrator
pub struct RunOrchestrator {
    db: SqlitePool,
    geocoder: Arc<GeocoderChain>,
    writer: Arc<CanonicalWriter>,
    evaluator: Arc<DqEvaluator>,
    settings: Arc<PipelineSettings>,
}

impl RunOrchestrator {
    pub fn new(
        db: SqlitePool,
        geocoder: Arc<GeocoderChain>,
        settings: Arc<PipelineSettings>,
        regions: Arc<HashMap<String, RegionConfig>>,
    ) -> Self {
        let writer = Arc::new(CanonicalWriter::new(db.clone(), settings.clone()));
        let evaluator = Arc::new(DqEvaluator::new(settings.staleness_days, regions));

        Self {
            db,
            geocoder,
            writer,
            evaluator,
            settings,
        }
    }

    /// Execute one ingest run. `batch` restricts the sweep to one
    /// staging batch; `None` sweeps every unprocessed record of the
    /// covered entity kinds.
    ///
    /// Per-record failures are absorbed and counted; the run itself only
    /// fails on systemic errors, which propagate to the caller after the
    /// run row is marked `failed`.
    pub async fn execute(
        &self,
        ingest_run_id: Uuid,
        build_type: BuildType,
        batch: Option<Uuid>,
    ) -> Result<IngestRun, PipelineError> {
        let mut run = IngestRun::start(ingest_run_id, build_type);
        db::runs::insert_run(&self.db, &run).await?;

        info!(
            ingest_run_id = %ingest_run_id,
            build_type = build_type.as_str(),
            "Starting ingest run"
        );

        let mut processed: u64 = 0;
        let mut failed: u64 = 0;

        let result = self
            .process_batches(build_type, batch, &mut processed, &mut failed)
            .await;

        match result {
            Ok(()) => {
                run.finish(processed, failed);
                db::runs::update_run(&self.db, &run).await?;
                info!(
                    ingest_run_id = %ingest_run_id,
                    records_processed = processed,
                    records_failed = failed,
                    "Ingest run completed"
                );
                Ok(run)
            }
            Err(e) => {
                error!(
                    ingest_run_id = %ingest_run_id,
                    error = %e,
                    "Ingest run aborted by systemic error"
                );
                run.fail(processed, failed, e.to_string());
                // Best effort: if the store is down this write fails too
                if let Err(update_err) = db::runs::update_run(&self.db, &run).await {
                    error!(
                        ingest_run_id = %ingest_run_id,
                        error = %update_err,
                        "Failed to record run failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Claim-and-process loop. Sweeps until no unprocessed records remain
    /// for the covered entity kinds.
    async fn process_batches(
        &self,
        build_type: BuildType,
        batch: Option<Uuid>,
        processed: &mut u64,
        failed: &mut u64,
    ) -> Result<(), PipelineError> {
        let kind_filter = match build_type {
            BuildType::Events => Some(EntityKind::Event),
            BuildType::Businesses => Some(EntityKind::Business),
            BuildType::All => None,
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.worker_count.max(1)));

        loop {
            let staging_ids =
                db::staging::fetch_unprocessed_ids(&self.db, kind_filter, batch, CLAIM_BATCH)
                    .await?;

            if staging_ids.is_empty() {
                break;
            }

            debug!(count = staging_ids.len(), "Dispatching staging records");

            let mut join_set: JoinSet<Result<RecordOutcome, PipelineError>> = JoinSet::new();

            for staging_id in staging_ids {
                let db = self.db.clone();
                let geocoder = self.geocoder.clone();
                let writer = self.writer.clone();
                let evaluator = self.evaluator.clone();
                let settings = self.settings.clone();
                let semaphore = semaphore.clone();

                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| PipelineError::Worker(e.to_string()))?;
                    process_record(&db, &geocoder, &writer, &evaluator, &settings, staging_id)
                        .await
                });
            }

            let mut systemic: Option<PipelineError> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(RecordOutcome::Processed)) => *processed += 1,
                    Ok(Ok(RecordOutcome::Failed)) => *failed += 1,
                    Ok(Ok(RecordOutcome::Skipped)) => {}
                    Ok(Err(e)) => {
                        // Drain remaining workers, then abort the run
                        if systemic.is_none() {
                            systemic = Some(e);
                        }
                    }
                    Err(join_err) => {
                        if systemic.is_none() {
                            systemic = Some(PipelineError::Worker(join_err.to_string()));
                        }
                    }
                }
            }

            if let Some(e) = systemic {
                return Err(e);
            }
        }

        Ok(())
    }
}

/// One record's trip through the pipeline stages. Every error class
/// except systemic storage failure is absorbed here and recorded on the
/// staging row.
async fn process_record(
    db: &SqlitePool,
    geocoder: &GeocoderChain,
    writer: &CanonicalWriter,
    evaluator: &DqEvaluator,
    settings: &PipelineSettings,
    staging_id: Uuid,
) -> Result<RecordOutcome, PipelineError> {
    // Atomic claim: exactly one run processes a staging row
    if !db::staging::claim_record(db, staging_id).await? {
        return Ok(RecordOutcome::Skipped);
    }

    let record = db::staging::load_record(db, staging_id).await?;

    // Stage 1: field mapping
    let Some(mapper) = mappers::mapper_for(record.entity_kind, &record.source) else {
        let error = MappingError::UnknownSource(record.source.clone());
        warn!(staging_id = %staging_id, source = %record.source, "{}", error);
        db::staging::mark_failed(db, staging_id, &error.to_string()).await?;
        return Ok(RecordOutcome::Failed);
    };

    let mut candidate = match mapper.map(&record.raw_payload) {
        Ok(candidate) => candidate,
        Err(e) => {
            warn!(
                staging_id = %staging_id,
                source = %record.source,
                error = %e,
                "Mapping failed"
            );
            db::staging::mark_failed(db, staging_id, &e.to_string()).await?;
            return Ok(RecordOutcome::Failed);
        }
    };

    if candidate.region().trim().is_empty() {
        candidate.set_region(settings.default_region.clone());
    }

    // Stage 2: identity resolution
    let resolved = identity::resolve_identity(db, &candidate).await?;

    // Stage 3: geocoding, only when coordinates are missing (replay skips
    // this stage entirely for already-coordinated records)
    if candidate.coordinates().is_none() {
        if let Some(query) = candidate.address_query() {
            if let Some(coords) = geocoder.resolve(&query).await {
                candidate.set_coordinates(coords);
            }
        }
    }

    // Stage 4: data quality
    let dq = evaluator.evaluate(&candidate);

    // Stage 5: canonical write
    let canonical_id = writer.upsert(&candidate, &dq, &resolved).await?;

    debug!(
        staging_id = %staging_id,
        canonical_id = %canonical_id,
        dq_status = dq.status.as_str(),
        "Record reconciled"
    );

    Ok(RecordOutcome::Processed)
}
