//! Shared models: entity kinds, run metadata, provenance actions
//!
//! Enums are persisted as lowercase text columns; the `as_str`/`parse`
//! pairs below are the single point of truth for that encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// The two entity kinds the backbone reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Event,
    Business,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Business => "business",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "event" => Ok(EntityKind::Event),
            "business" => Ok(EntityKind::Business),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {}", other))),
        }
    }
}

/// Data quality status assigned by the DQ evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DqStatus {
    Ok,
    Warning,
    Error,
}

impl DqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DqStatus::Ok => "ok",
            DqStatus::Warning => "warning",
            DqStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(DqStatus::Ok),
            "warning" => Ok(DqStatus::Warning),
            "error" => Ok(DqStatus::Error),
            other => Err(Error::InvalidInput(format!("Unknown DQ status: {}", other))),
        }
    }
}

/// Provenance log entry action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceAction {
    Created,
    Merged,
    Updated,
    DqFlagged,
}

impl ProvenanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceAction::Created => "created",
            ProvenanceAction::Merged => "merged",
            ProvenanceAction::Updated => "updated",
            ProvenanceAction::DqFlagged => "dq_flagged",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ProvenanceAction::Created),
            "merged" => Ok(ProvenanceAction::Merged),
            "updated" => Ok(ProvenanceAction::Updated),
            "dq_flagged" => Ok(ProvenanceAction::DqFlagged),
            other => Err(Error::InvalidInput(format!(
                "Unknown provenance action: {}",
                other
            ))),
        }
    }
}

/// Terminal + running states of one ingest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown run status: {}", other))),
        }
    }
}

/// Which pipelines a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Events,
    Businesses,
    All,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Events => "events",
            BuildType::Businesses => "businesses",
            BuildType::All => "all",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "events" => Ok(BuildType::Events),
            "businesses" => Ok(BuildType::Businesses),
            "all" => Ok(BuildType::All),
            other => Err(Error::InvalidInput(format!("Unknown build type: {}", other))),
        }
    }

    /// Entity kinds covered by this build type
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            BuildType::Events => &[EntityKind::Event],
            BuildType::Businesses => &[EntityKind::Business],
            BuildType::All => &[EntityKind::Event, EntityKind::Business],
        }
    }
}

/// Run metadata row, created at orchestration start and terminal once
/// `completed_at` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub ingest_run_id: Uuid,
    pub build_type: BuildType,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_processed: u64,
    pub records_failed: u64,
    pub error_log: Option<String>,
}

impl IngestRun {
    /// Fresh run in the `running` state
    pub fn start(ingest_run_id: Uuid, build_type: BuildType) -> Self {
        Self {
            ingest_run_id,
            build_type,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            records_processed: 0,
            records_failed: 0,
            error_log: None,
        }
    }

    /// Mark the run complete. Per-record failures do not fail the run;
    /// only a systemic abort does (see `fail`).
    pub fn finish(&mut self, processed: u64, failed: u64) {
        self.records_processed = processed;
        self.records_failed = failed;
        self.completed_at = Some(Utc::now());
        self.status = RunStatus::Success;
    }

    /// Mark the run failed after a systemic error
    pub fn fail(&mut self, processed: u64, failed: u64, error: String) {
        self.records_processed = processed;
        self.records_failed = failed;
        self.completed_at = Some(Utc::now());
        self.status = RunStatus::Failed;
        self.error_log = Some(error);
    }
}
