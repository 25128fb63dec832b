//! Database access for the reconciliation pipeline
//!
//! One module per table, bind-heavy sqlx queries, RFC 3339 text
//! timestamps. Schema creation lives in `cdb_common::db::init`.

pub mod businesses;
pub mod events;
pub mod provenance;
pub mod runs;
pub mod staging;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cdb_common::{Error, Result};

/// Parse a TEXT uuid column
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Failed to parse uuid '{}': {}", s, e)))
}

/// Parse a TEXT RFC 3339 timestamp column
pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", s, e)))
}

/// Parse an optional TEXT RFC 3339 timestamp column
pub(crate) fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}
