//! Core types and trait definitions for the reconciliation pipeline
//!
//! Defines the seams between the pipeline stages:
//! - `RawMapper` — per-source payload → normalized candidate (one impl per source tag)
//! - `NormalizedCandidate` — the shape every mapper converges on
//! - Typed errors per concern (`MappingError`, `GeocodeError`, `PipelineError`)
//!
//! The geocoding provider seam lives in `crate::geocode` next to its
//! implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cdb_common::models::EntityKind;

// ============================================================================
// Common Types
// ============================================================================

/// WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Fixed business category set; unknown strings resolve to `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessCategory {
    Restaurant,
    Grocery,
    Butcher,
    Retail,
    Service,
    Other,
}

impl BusinessCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessCategory::Restaurant => "restaurant",
            BusinessCategory::Grocery => "grocery",
            BusinessCategory::Butcher => "butcher",
            BusinessCategory::Retail => "retail",
            BusinessCategory::Service => "service",
            BusinessCategory::Other => "other",
        }
    }

    /// Lossy resolution from free text. Category strings come from
    /// heterogeneous sources, so anything unrecognized maps to `Other`
    /// rather than failing the record.
    pub fn resolve(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "restaurant" => BusinessCategory::Restaurant,
            "grocery" => BusinessCategory::Grocery,
            "butcher" => BusinessCategory::Butcher,
            "retail" => BusinessCategory::Retail,
            "service" => BusinessCategory::Service,
            _ => BusinessCategory::Other,
        }
    }
}

// ============================================================================
// Normalized Candidates
// ============================================================================

/// Normalized event candidate produced by the field mappers.
///
/// Required-field presence is deliberately NOT enforced here — every
/// field the DQ evaluator checks is optional at this stage so incomplete
/// records flow through and get flagged instead of dropped.
#[derive(Debug, Clone, Default)]
pub struct NormalizedEvent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub venue_name: Option<String>,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub url: Option<String>,
    pub organizer_name: Option<String>,
    pub organizer_contact: Option<String>,
    pub source: String,
    pub source_ref: Option<String>,
    pub region: String,
}

/// Normalized business candidate produced by the field mappers
#[derive(Debug, Clone)]
pub struct NormalizedBusiness {
    pub name: Option<String>,
    pub category: BusinessCategory,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub coordinates: Option<Coordinates>,
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
}

impl Default for NormalizedBusiness {
    fn default() -> Self {
        Self {
            name: None,
            category: BusinessCategory::Other,
            address_street: None,
            address_city: None,
            address_state: None,
            address_zip: None,
            coordinates: None,
            website: None,
            phone: None,
            email: None,
            certified: false,
            certifier_name: None,
            certifier_ref: None,
            placekey: None,
            source: String::new(),
            source_ref: None,
            region: String::new(),
        }
    }
}

/// Tagged union over the two candidate shapes. The pipeline stages after
/// the mapper (identity, geocoding, DQ, writer) operate on this.
#[derive(Debug, Clone)]
pub enum NormalizedCandidate {
    Event(NormalizedEvent),
    Business(NormalizedBusiness),
}

impl NormalizedCandidate {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            NormalizedCandidate::Event(_) => EntityKind::Event,
            NormalizedCandidate::Business(_) => EntityKind::Business,
        }
    }

    /// Identity name: event title or business name
    pub fn display_name(&self) -> Option<&str> {
        match self {
            NormalizedCandidate::Event(e) => e.title.as_deref(),
            NormalizedCandidate::Business(b) => b.name.as_deref(),
        }
    }

    pub fn city(&self) -> Option<&str> {
        match self {
            NormalizedCandidate::Event(e) => e.address_city.as_deref(),
            NormalizedCandidate::Business(b) => b.address_city.as_deref(),
        }
    }

    pub fn state(&self) -> Option<&str> {
        match self {
            NormalizedCandidate::Event(e) => e.address_state.as_deref(),
            NormalizedCandidate::Business(b) => b.address_state.as_deref(),
        }
    }

    pub fn region(&self) -> &str {
        match self {
            NormalizedCandidate::Event(e) => &e.region,
            NormalizedCandidate::Business(b) => &b.region,
        }
    }

    /// Assign the default region when the payload carried none
    pub fn set_region(&mut self, region: String) {
        match self {
            NormalizedCandidate::Event(e) => e.region = region,
            NormalizedCandidate::Business(b) => b.region = region,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            NormalizedCandidate::Event(e) => &e.source,
            NormalizedCandidate::Business(b) => &b.source,
        }
    }

    /// External stable place identifier (businesses only)
    pub fn placekey(&self) -> Option<&str> {
        match self {
            NormalizedCandidate::Event(_) => None,
            NormalizedCandidate::Business(b) => b.placekey.as_deref(),
        }
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            NormalizedCandidate::Event(e) => e.coordinates,
            NormalizedCandidate::Business(b) => b.coordinates,
        }
    }

    pub fn set_coordinates(&mut self, coords: Coordinates) {
        match self {
            NormalizedCandidate::Event(e) => e.coordinates = Some(coords),
            NormalizedCandidate::Business(b) => b.coordinates = Some(coords),
        }
    }

    /// Address text for geocoding: "street, city, state, zip" with empty
    /// parts omitted. `None` when there is nothing locatable at all.
    pub fn address_query(&self) -> Option<String> {
        let (street, city, state, zip) = match self {
            NormalizedCandidate::Event(e) => (
                e.address_street.as_deref(),
                e.address_city.as_deref(),
                e.address_state.as_deref(),
                e.address_zip.as_deref(),
            ),
            NormalizedCandidate::Business(b) => (
                b.address_street.as_deref(),
                b.address_city.as_deref(),
                b.address_state.as_deref(),
                b.address_zip.as_deref(),
            ),
        };

        let parts: Vec<&str> = [street, city, state, zip]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

// ============================================================================
// Mapper Seam
// ============================================================================

/// Per-source field mapper: raw payload → normalized candidate.
///
/// One implementation per source tag, all converging on the same
/// candidate shape. Mappers do shape/type conversion only and must not
/// fail because an optional field is missing; they fail only on
/// structurally malformed payloads.
pub trait RawMapper: Send + Sync {
    /// Source tag this mapper handles (the staging row's `source` column)
    fn source_tag(&self) -> &'static str;

    /// Entity kind this mapper produces
    fn entity_kind(&self) -> EntityKind;

    /// Convert a raw payload to a normalized candidate
    fn map(&self, payload: &serde_json::Value) -> Result<NormalizedCandidate, MappingError>;
}

/// Mapping failure: the payload is structurally malformed for its source.
/// Recorded on the staging row; never retried automatically.
#[derive(Debug, Error)]
pub enum MappingError {
    /// No mapper registered for this (entity kind, source) pair
    #[error("Unknown source tag: {0}")]
    UnknownSource(String),

    /// Payload root is not a JSON object
    #[error("Payload is not an object")]
    NotAnObject,

    /// A required discriminator field is absent or of the wrong type
    #[error("Malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },

    /// A timestamp field is present but unparseable
    #[error("Unparseable timestamp in '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

// ============================================================================
// Geocoding Errors
// ============================================================================

/// Provider-level geocoding failure. `NotFound` is NOT an error — the
/// provider seam returns `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a non-success status
    #[error("Provider error {0}: {1}")]
    Api(u16, String),

    /// Response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that escape the per-record isolation boundary. Everything else
/// (mapping failures, provider errors, DQ findings) is absorbed and
/// recorded on the staging row or the provenance trail; only systemic
/// storage failures abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage unavailable or otherwise broken — aborts the run
    #[error("Systemic failure: {0}")]
    Systemic(#[from] cdb_common::Error),

    /// Worker task panicked or was cancelled
    #[error("Worker failure: {0}")]
    Worker(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Systemic(cdb_common::Error::Database(e))
    }
}

// ============================================================================
// Tests
// ============================================================================
