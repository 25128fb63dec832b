//! Address fragment cleaning
//!
//! Source data carries the usual mess: suite numbers embedded in street
//! lines, compound city fields ("Boston | Everett"), parenthetical notes,
//! full state names where a code belongs. Everything here is
//! deterministic — the same input always yields the same output, which
//! dedup-key stability depends on.

/// Unit markers that confuse geocoders when left in a street line
const UNIT_MARKERS: &[&str] = &["suite", "ste", "apt", "unit"];

/// Known address typos, matched case-insensitively as whole phrases
const STREET_TYPOS: &[(&str, &str)] = &[
    ("la gange", "la grange"),
    ("lincolnway", "lincoln way"),
    ("bethany dr", "bethany drive"),
    ("college ave", "college avenue"),
];

/// City name corrections (typos, old names, special cases), keyed by the
/// lowercased full city string
const CITY_CORRECTIONS: &[(&str, &str)] = &[
    ("tuscaloosa", "Tucson"),
    ("camden wyoming", "Camden"),
    ("shawnee mission", "Overland Park"),
];

/// Collapse runs of whitespace to single spaces and trim
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean free text: whitespace collapse + trim; empty reduces to `None`
pub fn clean_text(s: &str) -> Option<String> {
    let cleaned = collapse_whitespace(s);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// True when a token marks the start of a unit designator
/// ("Suite", "Ste.", "Apt", "Unit", "#4B")
fn is_unit_marker(token: &str) -> bool {
    if token.starts_with('#') {
        return true;
    }
    let bare = token.trim_end_matches('.').to_lowercase();
    UNIT_MARKERS.contains(&bare.as_str())
}

/// Clean a street line for geocoding and storage:
/// - fix known typos
/// - drop suite/apt/unit/# designators and everything after them within
///   their comma segment
/// - collapse whitespace, trim trailing commas
///
/// A street that reduces to empty is treated as absent, not an error.
pub fn clean_street(street: &str) -> Option<String> {
    let mut s = collapse_whitespace(street);

    // Fix known typos (case-insensitive phrase replacement; byte offsets
    // only line up between the original and its lowercase for ASCII)
    if s.is_ascii() {
        let lower = s.to_lowercase();
        for (typo, fix) in STREET_TYPOS {
            if let Some(pos) = lower.find(typo) {
                let mut fixed = String::with_capacity(s.len());
                fixed.push_str(&s[..pos]);
                fixed.push_str(fix);
                fixed.push_str(&s[pos + typo.len()..]);
                s = fixed;
                break;
            }
        }
    }

    // Drop unit designators: within each comma segment, truncate at the
    // first unit marker token; drop segments that become empty
    let segments: Vec<String> = s
        .split(',')
        .filter_map(|segment| {
            let tokens: Vec<&str> = segment.split_whitespace().collect();
            let cut = tokens
                .iter()
                .position(|t| is_unit_marker(t))
                .unwrap_or(tokens.len());
            if cut == 0 {
                None
            } else {
                Some(tokens[..cut].join(" "))
            }
        })
        .collect();

    let cleaned = segments.join(", ");
    let cleaned = cleaned.trim_matches(&[',', ' '][..]).to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Clean a city name:
/// - known corrections table
/// - strip parenthetical notes: "Medford (Greater Boston)" → "Medford"
/// - compound fields keep the first part: "Boston | Everett" → "Boston"
/// - drop a leading "Suite X," fragment and a trailing "area"
pub fn clean_city(city: &str) -> Option<String> {
    let mut s = collapse_whitespace(city);

    let lower = s.to_lowercase();
    for (wrong, right) in CITY_CORRECTIONS {
        if lower == *wrong {
            return Some(right.to_string());
        }
    }

    // Strip parenthetical notes
    while let (Some(open), Some(close)) = (s.find('('), s.find(')')) {
        if close > open {
            s = format!("{}{}", &s[..open], &s[close + 1..]);
        } else {
            break;
        }
    }

    // Compound fields: take the first part
    for sep in ["|", "/", " & "] {
        if let Some(first) = s.split(sep).next() {
            s = first.to_string();
        }
    }

    // "Suite A, Sacramento" → "Sacramento"
    let lower = s.trim().to_lowercase();
    if lower.starts_with("suite ") {
        if let Some(pos) = s.find(',') {
            s = s[pos + 1..].to_string();
        }
    }

    let mut s = collapse_whitespace(&s);

    // Trailing "area" suffix
    if s.len() >= 5 {
        if let Some(tail) = s.get(s.len() - 5..) {
            if tail.eq_ignore_ascii_case(" area") {
                s.truncate(s.len() - 5);
            }
        }
    }

    let cleaned = s.trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// USPS state abbreviations for full state names
const STATE_MAP: &[(&str, &str)] = &[
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW HAMPSHIRE", "NH"),
    ("NEW JERSEY", "NJ"),
    ("NEW MEXICO", "NM"),
    ("NEW YORK", "NY"),
    ("NORTH CAROLINA", "NC"),
    ("NORTH DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE ISLAND", "RI"),
    ("SOUTH CAROLINA", "SC"),
    ("SOUTH DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
    ("DISTRICT OF COLUMBIA", "DC"),
];

/// Normalize a state to its two-letter USPS code. Codes pass through
/// uppercased; full names go through the table; anything else falls back
/// to the first two letters.
pub fn normalize_state(state: &str) -> Option<String> {
    let s = collapse_whitespace(state).to_uppercase();
    if s.is_empty() {
        return None;
    }

    if s.len() == 2 {
        return Some(s);
    }

    for (full, abbrev) in STATE_MAP {
        if s == *full {
            return Some(abbrev.to_string());
        }
    }

    if s.chars().count() >= 2 {
        Some(s.chars().take(2).collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_street_removes_suite_suffix() {
        assert_eq!(
            clean_street("123 Main St, Suite 200").as_deref(),
            Some("123 Main St")
        );
        assert_eq!(
            clean_street("123 Main St Suite 200").as_deref(),
            Some("123 Main St")
        );
        assert_eq!(clean_street("45 Oak Ave #4B").as_deref(), Some("45 Oak Ave"));
        assert_eq!(
            clean_street("45 Oak Ave, Unit 3, Building C").as_deref(),
            Some("45 Oak Ave")
        );
    }

    #[test]
    fn test_clean_street_fixes_typos() {
        assert_eq!(
            clean_street("100 La Gange Road").as_deref(),
            Some("100 la grange Road")
        );
    }

    #[test]
    fn test_clean_street_empty_is_absent() {
        assert_eq!(clean_street(""), None);
        assert_eq!(clean_street("   "), None);
        assert_eq!(clean_street("Suite 200"), None);
    }

    #[test]
    fn test_clean_city_compounds() {
        assert_eq!(clean_city("Boston | Everett").as_deref(), Some("Boston"));
        assert_eq!(
            clean_city("New Bedford / Fairhaven area").as_deref(),
            Some("New Bedford")
        );
        assert_eq!(clean_city("Okemos & Canton").as_deref(), Some("Okemos"));
    }

    #[test]
    fn test_clean_city_parenthetical_and_suite() {
        assert_eq!(
            clean_city("Medford (Greater Boston)").as_deref(),
            Some("Medford")
        );
        assert_eq!(clean_city("Suite A, Sacramento").as_deref(), Some("Sacramento"));
    }

    #[test]
    fn test_clean_city_corrections() {
        assert_eq!(clean_city("Tuscaloosa").as_deref(), Some("Tucson"));
        assert_eq!(clean_city("Shawnee Mission").as_deref(), Some("Overland Park"));
    }

    #[test]
    fn test_normalize_state() {
        assert_eq!(normalize_state("co").as_deref(), Some("CO"));
        assert_eq!(normalize_state("Colorado").as_deref(), Some("CO"));
        assert_eq!(normalize_state(" new york ").as_deref(), Some("NY"));
        assert_eq!(normalize_state(""), None);
    }

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(
            clean_text("  Al-Noor   Market  ").as_deref(),
            Some("Al-Noor Market")
        );
        assert_eq!(clean_text("   "), None);
    }

    #[test]
    fn test_determinism() {
        let inputs = ["123 Main St, Suite 200", "Boston | Everett", "Colorado"];
        for input in inputs {
            assert_eq!(clean_street(input), clean_street(input));
            assert_eq!(clean_city(input), clean_city(input));
            assert_eq!(normalize_state(input), normalize_state(input));
        }
    }
}
