//! Configuration loading and root folder resolution
//!
//! The pipeline reads one TOML file (geocoding provider selection, worker
//! pool sizing, region definitions, source authority order) plus a small
//! set of environment overrides for secrets that should not live on disk.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CDB_ROOT_FOLDER` environment variable
/// 3. `root_folder` key in the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("CDB_ROOT_FOLDER") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = default_config_path() {
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<TomlConfig>(&content) {
                if let Some(root_folder) = config.root_folder {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get default configuration file path for the platform
pub fn default_config_path() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("cdb").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    let system_config = PathBuf::from("/etc/cdb/config.toml");
    if system_config.exists() {
        return Ok(system_config);
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cdb"))
        .unwrap_or_else(|| PathBuf::from("./cdb_data"))
}

/// Load the TOML configuration, falling back to compiled defaults when no
/// file exists, then apply environment overrides.
pub fn load_config() -> TomlConfig {
    let mut config = match default_config_path() {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<TomlConfig>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} (using defaults)", path.display(), e);
                    TomlConfig::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {} (using defaults)", path.display(), e);
                TomlConfig::default()
            }
        },
        Err(_) => TomlConfig::default(),
    };

    config.apply_env_overrides();
    config
}

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder override (database lives here)
    pub root_folder: Option<String>,
    /// Geocoding provider configuration
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    /// Pipeline tuning and source authority ordering
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Served regions keyed by region code (e.g. "CO")
    #[serde(default = "default_regions")]
    pub regions: HashMap<String, RegionConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            geocoding: GeocodingConfig::default(),
            pipeline: PipelineSettings::default(),
            regions: default_regions(),
        }
    }
}

impl TomlConfig {
    /// Environment overrides for secrets and deploy-time switches:
    /// `CDB_GEOCODING_PROVIDER`, `CDB_GOOGLE_GEOCODING_API_KEY`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("CDB_GEOCODING_PROVIDER") {
            if !provider.trim().is_empty() {
                self.geocoding.provider = provider.trim().to_lowercase();
            }
        }
        if let Ok(key) = std::env::var("CDB_GOOGLE_GEOCODING_API_KEY") {
            if !key.trim().is_empty() {
                self.geocoding.google_api_key = Some(key);
            }
        }
    }

    /// Bounding box for a region code, if the region is configured
    pub fn region_bbox(&self, region: &str) -> Option<&Bbox> {
        self.regions.get(region).map(|r| &r.bbox)
    }
}

/// Geocoding provider selection and rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// Provider strategy: "osm" (free), "google" (paid), "hybrid" (paid then free)
    pub provider: String,
    /// Google Geocoding API key (required for "google"/"hybrid")
    pub google_api_key: Option<String>,
    /// User-Agent sent to Nominatim (required by their usage policy)
    pub user_agent: String,
    /// Minimum interval between requests to the free provider
    pub rate_limit_ms: u64,
    /// Retry attempts per provider before falling through the chain
    pub max_retries: u32,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            provider: "osm".to_string(),
            google_api_key: None,
            user_agent: "cdb/0.1".to_string(),
            rate_limit_ms: 1000,
            max_retries: 2,
        }
    }
}

/// Pipeline tuning knobs and the source authority order used for merges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Bounded worker pool size for per-record processing
    pub worker_count: usize,
    /// Events older than this many days get a staleness warning
    pub staleness_days: i64,
    /// Region assigned when a payload carries none
    pub default_region: String,
    /// Business source authority, most authoritative first
    pub source_priority_businesses: Vec<String>,
    /// Event source authority, most authoritative first
    pub source_priority_events: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            staleness_days: 30,
            default_region: "CO".to_string(),
            source_priority_businesses: vec![
                "claim".to_string(),
                "certifier".to_string(),
                "csv".to_string(),
                "osm".to_string(),
            ],
            source_priority_events: vec!["ics".to_string(), "csv".to_string()],
        }
    }
}

impl PipelineSettings {
    /// Rank of a source in the authority order (0 = most authoritative).
    /// Unknown sources rank below every configured one.
    pub fn source_rank(&self, kind: crate::models::EntityKind, source: &str) -> usize {
        let order = match kind {
            crate::models::EntityKind::Event => &self.source_priority_events,
            crate::models::EntityKind::Business => &self.source_priority_businesses,
        };
        order
            .iter()
            .position(|s| s == source)
            .unwrap_or(order.len())
    }
}

/// One served region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Human-readable name
    pub name: String,
    /// IANA timezone identifier
    pub timezone: String,
    /// Plausibility bounding box for coordinates in this region
    pub bbox: Bbox,
}

/// Geographic bounding box in WGS84 degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bbox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bbox {
    /// True when the point falls inside (or on the edge of) the box
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.west <= longitude
            && longitude <= self.east
            && self.south <= latitude
            && latitude <= self.north
    }
}

/// Compiled default region set: Colorado
fn default_regions() -> HashMap<String, RegionConfig> {
    let mut regions = HashMap::new();
    regions.insert(
        "CO".to_string(),
        RegionConfig {
            name: "Colorado".to_string(),
            timezone: "America/Denver".to_string(),
            bbox: Bbox {
                west: -109.06,
                south: 36.99,
                east: -102.04,
                north: 41.0,
            },
        },
    );
    regions
}
