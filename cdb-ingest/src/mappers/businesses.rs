//! Business mappers: OSM map data, certifier files, CSV seeds, and
//! approved self-service claims

use serde_json::{Map, Value};

use super::{as_object, bool_field, f64_field, required_str_type, str_field};
use crate::normalize::{clean_city, clean_street, normalize_phone, normalize_state};
use crate::types::{
    BusinessCategory, Coordinates, MappingError, NormalizedBusiness, NormalizedCandidate,
    RawMapper,
};
use cdb_common::models::EntityKind;

/// OpenStreetMap/Overpass elements. The raw payload is the element as the
/// Overpass API returns it: `{ type, id, lat, lon, center, tags: {...} }`
/// with all the interesting fields inside `tags`.
pub struct OsmBusinessMapper;

impl OsmBusinessMapper {
    /// Category from OSM `amenity`/`shop` tags
    fn category_from_tags(tags: &Map<String, Value>) -> BusinessCategory {
        let amenity = tags.get("amenity").and_then(|v| v.as_str()).unwrap_or("");
        let shop = tags.get("shop").and_then(|v| v.as_str()).unwrap_or("");

        if amenity == "restaurant" {
            BusinessCategory::Restaurant
        } else if shop == "butcher" {
            BusinessCategory::Butcher
        } else if matches!(shop, "supermarket" | "convenience" | "grocery") {
            BusinessCategory::Grocery
        } else if !shop.is_empty() {
            BusinessCategory::Retail
        } else {
            BusinessCategory::Other
        }
    }

    /// Coordinates: nodes carry lat/lon directly, ways/relations carry a
    /// computed center
    fn coordinates(map: &Map<String, Value>) -> Option<Coordinates> {
        if let (Some(latitude), Some(longitude)) = (f64_field(map, "lat"), f64_field(map, "lon")) {
            return Some(Coordinates { latitude, longitude });
        }
        let center = map.get("center")?.as_object()?;
        match (f64_field(center, "lat"), f64_field(center, "lon")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

impl RawMapper for OsmBusinessMapper {
    fn source_tag(&self) -> &'static str {
        "osm"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Business
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let tags = match map.get("tags") {
            None | Some(Value::Null) => None,
            Some(Value::Object(tags)) => Some(tags),
            Some(other) => {
                return Err(MappingError::MalformedField {
                    field: "tags",
                    reason: format!("expected object, got {}", super::json_type_name(other)),
                })
            }
        };

        let empty = Map::new();
        let tags = tags.unwrap_or(&empty);

        let source_ref = match (map.get("type").and_then(|v| v.as_str()), map.get("id")) {
            (Some(element_type), Some(id)) => Some(format!("osm_{}_{}", element_type, id)),
            _ => str_field(map, "source_ref"),
        };

        let business = NormalizedBusiness {
            name: required_str_type(tags, "name")?,
            category: Self::category_from_tags(tags),
            address_street: str_field(tags, "addr:street").and_then(|s| clean_street(&s)),
            address_city: str_field(tags, "addr:city").and_then(|c| clean_city(&c)),
            address_state: str_field(tags, "addr:state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(tags, "addr:postcode"),
            coordinates: Self::coordinates(map),
            website: str_field(tags, "website").or_else(|| str_field(tags, "contact:website")),
            phone: str_field(tags, "phone")
                .or_else(|| str_field(tags, "contact:phone"))
                .and_then(|p| normalize_phone(&p)),
            email: str_field(tags, "email").or_else(|| str_field(tags, "contact:email")),
            certified: false,
            certifier_name: None,
            certifier_ref: None,
            placekey: None,
            source: self.source_tag().to_string(),
            source_ref,
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Business(business))
    }
}

/// Certifier list files: businesses vouched for by a certifying body.
/// Rows carry the certifier's own identifiers, which become the
/// certification provenance on the canonical record.
pub struct CertifierBusinessMapper;

impl RawMapper for CertifierBusinessMapper {
    fn source_tag(&self) -> &'static str {
        "certifier"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Business
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let business = NormalizedBusiness {
            name: required_str_type(map, "name")?,
            category: str_field(map, "category")
                .map(|c| BusinessCategory::resolve(&c))
                .unwrap_or(BusinessCategory::Other),
            address_street: str_field(map, "address").and_then(|s| clean_street(&s)),
            address_city: str_field(map, "city").and_then(|c| clean_city(&c)),
            address_state: str_field(map, "state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(map, "zip"),
            coordinates: None,
            website: str_field(map, "website"),
            phone: str_field(map, "phone").and_then(|p| normalize_phone(&p)),
            email: str_field(map, "email"),
            certified: true,
            certifier_name: str_field(map, "certifier"),
            certifier_ref: str_field(map, "certificate_id"),
            placekey: None,
            source: self.source_tag().to_string(),
            source_ref: str_field(map, "certificate_id"),
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Business(business))
    }
}

/// CSV flat-file businesses keyed by the canonical column headers
pub struct CsvBusinessMapper;

impl RawMapper for CsvBusinessMapper {
    fn source_tag(&self) -> &'static str {
        "csv"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Business
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let coordinates = match (f64_field(map, "latitude"), f64_field(map, "longitude")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        };

        let business = NormalizedBusiness {
            name: required_str_type(map, "name")?,
            category: str_field(map, "category")
                .map(|c| BusinessCategory::resolve(&c))
                .unwrap_or(BusinessCategory::Other),
            address_street: str_field(map, "address_street").and_then(|s| clean_street(&s)),
            address_city: str_field(map, "address_city").and_then(|c| clean_city(&c)),
            address_state: str_field(map, "address_state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(map, "address_zip"),
            coordinates,
            website: str_field(map, "website"),
            phone: str_field(map, "phone").and_then(|p| normalize_phone(&p)),
            email: str_field(map, "email"),
            certified: bool_field(map, "certified", false),
            certifier_name: str_field(map, "certifier_name"),
            certifier_ref: str_field(map, "certifier_ref"),
            placekey: str_field(map, "placekey"),
            source: self.source_tag().to_string(),
            source_ref: str_field(map, "source_ref"),
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Business(business))
    }
}

/// Approved self-service claims, submitted by the business owner through
/// the web form and approved by a reviewer. Field names follow the claim
/// submission form.
pub struct ClaimBusinessMapper;

impl RawMapper for ClaimBusinessMapper {
    fn source_tag(&self) -> &'static str {
        "claim"
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Business
    }

    fn map(&self, payload: &Value) -> Result<NormalizedCandidate, MappingError> {
        let map = as_object(payload)?;

        let coordinates = match (f64_field(map, "latitude"), f64_field(map, "longitude")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        };

        let business = NormalizedBusiness {
            name: required_str_type(map, "business_name")?,
            category: str_field(map, "category")
                .map(|c| BusinessCategory::resolve(&c))
                .unwrap_or(BusinessCategory::Other),
            address_street: str_field(map, "business_street_address")
                .and_then(|s| clean_street(&s)),
            address_city: str_field(map, "business_city").and_then(|c| clean_city(&c)),
            address_state: str_field(map, "business_state").and_then(|s| normalize_state(&s)),
            address_zip: str_field(map, "business_zip"),
            coordinates,
            website: str_field(map, "website"),
            phone: str_field(map, "phone").and_then(|p| normalize_phone(&p)),
            email: str_field(map, "email"),
            certified: bool_field(map, "certified", false),
            certifier_name: str_field(map, "certifier_name"),
            certifier_ref: None,
            placekey: str_field(map, "placekey"),
            source: self.source_tag().to_string(),
            source_ref: str_field(map, "claim_id"),
            region: str_field(map, "region").unwrap_or_default(),
        };

        Ok(NormalizedCandidate::Business(business))
    }
}
