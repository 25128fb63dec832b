//! Per-source field mappers
//!
//! Each ingest source has its own raw payload shape; one `RawMapper`
//! implementation per source tag converts it to the shared candidate
//! shape. Dispatch is a tagged lookup on (entity kind, source) so the
//! rest of the pipeline never branches on source names.
//!
//! Mapping is shape/type conversion only. Required-field presence is the
//! DQ evaluator's job — a mapper fails only on structurally malformed
//! payloads (non-object root, unparseable timestamp, wrong type on a
//! discriminator field).

pub mod businesses;
pub mod events;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{MappingError, RawMapper};
use cdb_common::models::EntityKind;

static ICS_EVENTS: events::IcsEventMapper = events::IcsEventMapper;
static CSV_EVENTS: events::CsvEventMapper = events::CsvEventMapper;
static OSM_BUSINESSES: businesses::OsmBusinessMapper = businesses::OsmBusinessMapper;
static CERTIFIER_BUSINESSES: businesses::CertifierBusinessMapper =
    businesses::CertifierBusinessMapper;
static CSV_BUSINESSES: businesses::CsvBusinessMapper = businesses::CsvBusinessMapper;
static CLAIM_BUSINESSES: businesses::ClaimBusinessMapper = businesses::ClaimBusinessMapper;

/// Resolve the mapper for a staging row's (entity kind, source) pair
pub fn mapper_for(kind: EntityKind, source: &str) -> Option<&'static dyn RawMapper> {
    match (kind, source) {
        (EntityKind::Event, "ics") => Some(&ICS_EVENTS),
        (EntityKind::Event, "csv") => Some(&CSV_EVENTS),
        (EntityKind::Business, "osm") => Some(&OSM_BUSINESSES),
        (EntityKind::Business, "certifier") => Some(&CERTIFIER_BUSINESSES),
        (EntityKind::Business, "csv") => Some(&CSV_BUSINESSES),
        (EntityKind::Business, "claim") => Some(&CLAIM_BUSINESSES),
        _ => None,
    }
}

// ============================================================================
// Shared payload helpers
// ============================================================================

/// Payload root must be a JSON object
pub(crate) fn as_object(payload: &Value) -> Result<&Map<String, Value>, MappingError> {
    payload.as_object().ok_or(MappingError::NotAnObject)
}

/// Optional cleaned string field. Non-string, non-null values are
/// ignored rather than failing the record.
pub(crate) fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.as_str())
        .and_then(crate::normalize::clean_text)
}

/// String field that, when present, must actually be a string
/// (discriminator fields get the strict treatment).
pub(crate) fn required_str_type(
    map: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, MappingError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(crate::normalize::clean_text(s)),
        Some(other) => Err(MappingError::MalformedField {
            field: key,
            reason: format!("expected string, got {}", json_type_name(other)),
        }),
    }
}

/// Boolean field accepting JSON booleans plus the usual text/number spellings
pub(crate) fn bool_field(map: &Map<String, Value>, key: &str, default: bool) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|i| i != 0),
        _ => default,
    }
}

/// Numeric field accepting JSON numbers and numeric strings
pub(crate) fn f64_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Optional timestamp field. Absent/null is fine; a present value that
/// cannot be parsed is a structural failure.
pub(crate) fn timestamp_field(
    map: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<DateTime<Utc>>, MappingError> {
    let value = match map.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim(),
        Some(other) => {
            return Err(MappingError::MalformedField {
                field: key,
                reason: format!("expected timestamp string, got {}", json_type_name(other)),
            })
        }
    };

    if value.is_empty() {
        return Ok(None);
    }

    parse_timestamp(value)
        .map(Some)
        .ok_or_else(|| MappingError::InvalidTimestamp {
            field: key,
            value: value.to_string(),
        })
}

/// Parse the timestamp spellings the sources actually produce:
/// RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS`
/// (assumed UTC), and bare dates (midnight UTC, all-day events).
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    None
}

pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mapper_registry() {
        assert!(mapper_for(EntityKind::Event, "ics").is_some());
        assert!(mapper_for(EntityKind::Business, "claim").is_some());
        // Event sources and business sources don't cross
        assert!(mapper_for(EntityKind::Event, "osm").is_none());
        assert!(mapper_for(EntityKind::Business, "ics").is_none());
        assert!(mapper_for(EntityKind::Business, "scraper9000").is_none());
    }

    #[test]
    fn test_parse_timestamp_spellings() {
        assert!(parse_timestamp("2026-08-01T18:00:00Z").is_some());
        assert!(parse_timestamp("2026-08-01T18:00:00-06:00").is_some());
        assert!(parse_timestamp("2026-08-01T18:00:00").is_some());
        assert!(parse_timestamp("2026-08-01 18:00:00").is_some());
        assert!(parse_timestamp("2026-08-01").is_some());
        assert!(parse_timestamp("next tuesday").is_none());
    }

    #[test]
    fn test_timestamp_field_structural_failure() {
        let map = json!({"start_time": 1722535200})
            .as_object()
            .cloned()
            .unwrap();
        assert!(timestamp_field(&map, "start_time").is_err());

        let map = json!({"start_time": "not a date"}).as_object().cloned().unwrap();
        assert!(matches!(
            timestamp_field(&map, "start_time"),
            Err(MappingError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_f64_field_accepts_strings() {
        let map = json!({"latitude": "39.74", "longitude": -104.98})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(f64_field(&map, "latitude"), Some(39.74));
        assert_eq!(f64_field(&map, "longitude"), Some(-104.98));
        assert_eq!(f64_field(&map, "altitude"), None);
    }

    #[test]
    fn test_bool_field_spellings() {
        let map = json!({"a": true, "b": "yes", "c": 1, "d": "no"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(bool_field(&map, "a", false));
        assert!(bool_field(&map, "b", false));
        assert!(bool_field(&map, "c", false));
        assert!(!bool_field(&map, "d", true));
        assert!(bool_field(&map, "missing", true));
    }
}
