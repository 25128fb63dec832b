//! Data quality evaluation
//!
//! Applies the rule set (required fields, geographic plausibility,
//! staleness) to a normalized candidate and assigns a status. The
//! evaluator never aborts pipeline flow: it always returns a status plus
//! a structured issue list, and the writer persists both. Incomplete
//! records are preserved and flagged, never rejected.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use cdb_common::config::RegionConfig;
use cdb_common::models::DqStatus;

use crate::normalize::phone::is_valid_nanp;
use crate::types::NormalizedCandidate;

/// One finding from the rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqIssue {
    /// Stable machine-readable code ("missing_required_field", ...)
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Severity this issue contributes to the overall status
    pub severity: DqStatus,
}

impl DqIssue {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: DqStatus::Error,
        }
    }

    fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: DqStatus::Warning,
        }
    }
}

/// Evaluation result: overall status plus the issue list behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DqReport {
    pub status: DqStatus,
    pub issues: Vec<DqIssue>,
}

impl DqReport {
    /// Status is the worst severity present: any error ⇒ `error`, else
    /// any warning ⇒ `warning`, else `ok`
    pub fn from_issues(issues: Vec<DqIssue>) -> Self {
        let status = if issues.iter().any(|i| i.severity == DqStatus::Error) {
            DqStatus::Error
        } else if issues.iter().any(|i| i.severity == DqStatus::Warning) {
            DqStatus::Warning
        } else {
            DqStatus::Ok
        };
        Self { status, issues }
    }
}

/// Data quality evaluator
pub struct DqEvaluator {
    /// Events starting more than this many days ago get flagged stale
    staleness_days: i64,
    /// Region bounding boxes for plausibility checks
    regions: Arc<HashMap<String, RegionConfig>>,
}

impl DqEvaluator {
    pub fn new(staleness_days: i64, regions: Arc<HashMap<String, RegionConfig>>) -> Self {
        Self {
            staleness_days,
            regions,
        }
    }

    /// Evaluate a candidate after mapping, identity resolution, and
    /// geocoding. Infallible by design.
    pub fn evaluate(&self, candidate: &NormalizedCandidate) -> DqReport {
        let mut issues = Vec::new();

        match candidate {
            NormalizedCandidate::Event(event) => self.check_event(event, &mut issues),
            NormalizedCandidate::Business(business) => self.check_business(business, &mut issues),
        }

        self.check_coordinates(candidate, &mut issues);

        DqReport::from_issues(issues)
    }

    fn check_event(&self, event: &crate::types::NormalizedEvent, issues: &mut Vec<DqIssue>) {
        let mut require = |present: bool, field: &str| {
            if !present {
                issues.push(DqIssue::error(
                    "missing_required_field",
                    format!("missing required field: {}", field),
                ));
            }
        };

        require(event.title.as_deref().is_some_and(|t| !t.is_empty()), "title");
        require(event.start_time.is_some(), "start_time");
        require(event.end_time.is_some(), "end_time");
        require(
            event.address_city.as_deref().is_some_and(|c| !c.is_empty()),
            "city",
        );
        require(!event.region.trim().is_empty(), "region");

        if let (Some(start), Some(end)) = (event.start_time, event.end_time) {
            if end <= start {
                issues.push(DqIssue::error(
                    "end_before_start",
                    "end_time must be after start_time",
                ));
            }

            // Staleness only applies to well-ordered intervals
            if start < Utc::now() - Duration::days(self.staleness_days) {
                issues.push(DqIssue::warning(
                    "event_stale",
                    format!("event is old: started more than {} days ago", self.staleness_days),
                ));
            }
        }
    }

    fn check_business(
        &self,
        business: &crate::types::NormalizedBusiness,
        issues: &mut Vec<DqIssue>,
    ) {
        let mut require = |present: bool, field: &str| {
            if !present {
                issues.push(DqIssue::error(
                    "missing_required_field",
                    format!("missing required field: {}", field),
                ));
            }
        };

        require(business.name.as_deref().is_some_and(|n| !n.is_empty()), "name");
        require(
            business
                .address_city
                .as_deref()
                .is_some_and(|c| !c.is_empty()),
            "city",
        );
        require(!business.region.trim().is_empty(), "region");

        if let Some(phone) = &business.phone {
            if !is_valid_nanp(phone) {
                issues.push(DqIssue::warning(
                    "invalid_phone",
                    format!("phone does not look like a NANP number: {}", phone),
                ));
            }
        }
    }

    fn check_coordinates(&self, candidate: &NormalizedCandidate, issues: &mut Vec<DqIssue>) {
        match candidate.coordinates() {
            None => {
                // Still useful without coordinates; the record stays served
                issues.push(DqIssue::warning(
                    "missing_coordinates",
                    "no coordinates after geocoding",
                ));
            }
            Some(coords) => {
                // Unknown regions skip the check rather than failing it
                if let Some(region) = self.regions.get(candidate.region()) {
                    if !region.bbox.contains(coords.latitude, coords.longitude) {
                        issues.push(DqIssue::warning(
                            "coordinates_outside_region",
                            format!(
                                "coordinates outside region {} bounding box",
                                candidate.region()
                            ),
                        ));
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, NormalizedBusiness, NormalizedEvent};
    use cdb_common::config::TomlConfig;

    fn evaluator() -> DqEvaluator {
        let config = TomlConfig::default();
        DqEvaluator::new(30, Arc::new(config.regions))
    }

    fn complete_business() -> NormalizedBusiness {
        NormalizedBusiness {
            name: Some("Al-Noor Market".to_string()),
            address_city: Some("Denver".to_string()),
            address_state: Some("CO".to_string()),
            coordinates: Some(Coordinates {
                latitude: 39.74,
                longitude: -104.98,
            }),
            region: "CO".to_string(),
            ..Default::default()
        }
    }

    fn complete_event() -> NormalizedEvent {
        let now = Utc::now();
        NormalizedEvent {
            title: Some("Community Iftar".to_string()),
            start_time: Some(now + Duration::days(7)),
            end_time: Some(now + Duration::days(7) + Duration::hours(3)),
            address_city: Some("Denver".to_string()),
            address_state: Some("CO".to_string()),
            coordinates: Some(Coordinates {
                latitude: 39.74,
                longitude: -104.98,
            }),
            region: "CO".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_business_is_ok() {
        let report =
            evaluator().evaluate(&NormalizedCandidate::Business(complete_business()));
        assert_eq!(report.status, DqStatus::Ok);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_business_missing_required_is_error() {
        // Any of name/city/region missing is always an error, never ok or warning
        for strip in ["name", "city", "region"] {
            let mut business = complete_business();
            match strip {
                "name" => business.name = None,
                "city" => business.address_city = None,
                _ => business.region = String::new(),
            }
            let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
            assert_eq!(report.status, DqStatus::Error, "stripped {}", strip);
            assert!(report
                .issues
                .iter()
                .any(|i| i.code == "missing_required_field"));
        }
    }

    #[test]
    fn test_coordinates_outside_region_is_warning() {
        let mut business = complete_business();
        // New York coordinates on a Colorado record
        business.coordinates = Some(Coordinates {
            latitude: 40.71,
            longitude: -74.0,
        });
        let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
        assert_eq!(report.status, DqStatus::Warning);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == "coordinates_outside_region"));
    }

    #[test]
    fn test_missing_coordinates_is_warning_not_error() {
        let mut business = complete_business();
        business.coordinates = None;
        let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
        assert_eq!(report.status, DqStatus::Warning);
        assert!(report.issues.iter().any(|i| i.code == "missing_coordinates"));
    }

    #[test]
    fn test_stale_event_is_warning() {
        let mut event = complete_event();
        event.start_time = Some(Utc::now() - Duration::days(45));
        event.end_time = Some(Utc::now() - Duration::days(45) + Duration::hours(2));
        let report = evaluator().evaluate(&NormalizedCandidate::Event(event));
        assert_eq!(report.status, DqStatus::Warning);
        assert!(report.issues.iter().any(|i| i.code == "event_stale"));
    }

    #[test]
    fn test_end_before_start_is_error() {
        let mut event = complete_event();
        let start = event.start_time.unwrap();
        event.end_time = Some(start - Duration::hours(1));
        let report = evaluator().evaluate(&NormalizedCandidate::Event(event));
        assert_eq!(report.status, DqStatus::Error);
        assert!(report.issues.iter().any(|i| i.code == "end_before_start"));
    }

    #[test]
    fn test_invalid_phone_is_warning() {
        let mut business = complete_business();
        business.phone = Some("555-0142".to_string());
        let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
        assert_eq!(report.status, DqStatus::Warning);
        assert!(report.issues.iter().any(|i| i.code == "invalid_phone"));
    }

    #[test]
    fn test_unknown_region_skips_bbox_check() {
        let mut business = complete_business();
        business.region = "TX".to_string();
        let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
        // TX is not configured: no bbox finding, and the region field is
        // present so no required-field error either
        assert!(!report
            .issues
            .iter()
            .any(|i| i.code == "coordinates_outside_region"));
    }

    #[test]
    fn test_error_outranks_warning() {
        let mut business = complete_business();
        business.name = None;
        business.coordinates = None;
        let report = evaluator().evaluate(&NormalizedCandidate::Business(business));
        assert_eq!(report.status, DqStatus::Error);
        assert_eq!(report.issues.len(), 2);
    }
}
