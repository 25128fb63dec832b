//! Dedup key construction and place resolution
//!
//! Deliberately exact-match only: an external stable place identifier
//! when the source carries one, otherwise the normalized
//! `name|city|state` composite. No fuzzy matching — source data is
//! assumed to carry stable names, and approximate clustering is out of
//! scope (a known limitation, not an oversight).

use sqlx::SqlitePool;
use uuid::Uuid;

use cdb_common::Result;

use crate::db;
use crate::types::NormalizedCandidate;

/// Stable identity key for a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// External stable place identifier from the source's own dedup system
    Placekey(String),
    /// `lower(name)|lower(city)|lower(state)` composite
    Composite(String),
}

impl IdentityKey {
    /// Build the key for a candidate. Missing parts participate as empty
    /// strings so incomplete records still get a deterministic key.
    pub fn for_candidate(candidate: &NormalizedCandidate) -> Self {
        if let Some(placekey) = candidate.placekey() {
            return IdentityKey::Placekey(placekey.to_string());
        }

        let part = |s: Option<&str>| s.unwrap_or("").trim().to_lowercase();
        IdentityKey::Composite(format!(
            "{}|{}|{}",
            part(candidate.display_name()),
            part(candidate.city()),
            part(candidate.state()),
        ))
    }

    pub fn as_str(&self) -> &str {
        match self {
            IdentityKey::Placekey(key) => key,
            IdentityKey::Composite(key) => key,
        }
    }
}

/// Identity resolution result: the key plus the canonical row it matched,
/// if one exists
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub key: IdentityKey,
    pub existing_id: Option<Uuid>,
}

/// Resolve a candidate's identity against canonical storage. One indexed
/// read scoped to the candidate's region; for businesses carrying a
/// placekey, the placekey lookup runs first and the composite lookup
/// backstops it (the matched row may predate the source that supplied
/// the placekey).
pub async fn resolve_identity(
    pool: &SqlitePool,
    candidate: &NormalizedCandidate,
) -> Result<ResolvedIdentity> {
    let key = IdentityKey::for_candidate(candidate);

    if let IdentityKey::Placekey(placekey) = &key {
        if let Some(id) = db::businesses::find_by_placekey(pool, placekey).await? {
            return Ok(ResolvedIdentity {
                key,
                existing_id: Some(id),
            });
        }
    }

    let name = candidate.display_name().unwrap_or("");
    let city = candidate.city().unwrap_or("");
    let state = candidate.state().unwrap_or("");
    let region = candidate.region();

    let existing_id = match candidate {
        NormalizedCandidate::Event(_) => {
            db::events::find_by_identity(pool, region, name, city, state).await?
        }
        NormalizedCandidate::Business(_) => {
            db::businesses::find_by_identity(pool, region, name, city, state).await?
        }
    };

    Ok(ResolvedIdentity { key, existing_id })
}
