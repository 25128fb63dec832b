//! Event mappers: ICS calendar feeds and CSV flat files

use serde_json::Value;

use super::{as_object, bool_field, f64_field, required_str_type, str_field, timestamp_field};
use crate::normalize::{clean_city, clean_street, normalize_state};
use crate::types::{Coordinates, MappingError, NormalizedCandidate, NormalizedEvent, RawMapper};
use cdb_common::models::EntityKind;

/// ICS/iCalendar feed events. The poller flattens each VEVENT into an
/// object keyed by the component property names.
///
/// Payload shape: `{ uid, summary, description, dtstart, dtend, all_day,
/// location, url, venue_name, city, state, zip, region }`
pub struct IcsEventMapper;

impl RawMapper for IcsEventMapper {
    fn source_tag(&self) -> &'static str {
        "ics"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Event
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let title = required_str_type(map, "summary")?;
        let start_time = timestamp_field(map, "dtstart")?;
        let mut end_time = timestamp_field(map, "dtend")?;

        // Feeds omit DTEND for instantaneous entries; mirror DTSTART so
        // downstream ordering checks see a zero-length interval
        if end_time.is_none() {
            end_time = start_time;
        }

        let event = NormalizedEvent {
            title,
            description: str_field(map, "description"),
            start_time,
            end_time,
            all_day: bool_field(map, "all_day", false),
            venue_name: str_field(map, "venue_name"),
            address_street: str_field(map, "location").and_then(|l| clean_street(&l)),
            address_city: str_field(map, "city").and_then(|c| clean_city(&c)),
            address_state: str_field(map, "state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(map, "zip"),
            coordinates: None,
            url: str_field(map, "url"),
            organizer_name: str_field(map, "organizer_name"),
            organizer_contact: str_field(map, "organizer_contact"),
            source: self.source_tag().to_string(),
            source_ref: str_field(map, "uid"),
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Event(event))
    }
}

/// CSV flat-file events, one object per row keyed by the canonical-ish
/// column headers the seed files use.
pub struct CsvEventMapper;

impl RawMapper for CsvEventMapper {
    fn source_tag(&self) -> &'static str {
        "csv"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Event
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let coordinates = match (f64_field(map, "latitude"), f64_field(map, "longitude")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        };

        let event = NormalizedEvent {
            title: required_str_type(map, "title")?,
            description: str_field(map, "description"),
            start_time: timestamp_field(map, "start_time")?,
            end_time: timestamp_field(map, "end_time")?,
            all_day: bool_field(map, "all_day", false),
            venue_name: str_field(map, "venue_name"),
            address_street: str_field(map, "address_street").and_then(|s| clean_street(&s)),
            address_city: str_field(map, "address_city").and_then(|c| clean_city(&c)),
            address_state: str_field(map, "address_state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(map, "address_zip"),
            coordinates,
            url: str_field(map, "url"),
            organizer_name: str_field(map, "organizer_name"),
            organizer_contact: str_field(map, "organizer_contact"),
            source: self.source_tag().to_string(),
            source_ref: str_field(map, "source_ref"),
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Event(event))
    }
}
