use std::collections::BTreeMap;

use serde::Deserialize;

use crate::crs::{Crs, EPSG_WEB_MERCATOR};
use crate::error::AuditError;
use crate::model::columns;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Input file paths. Only the CLI reads them; the engine takes loaded data.
    #[serde(default)]
    pub inputs: Option<InputFiles>,
    #[serde(default)]
    pub ranges: RangeConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub overlap: OverlapConfig,
    #[serde(default)]
    pub parcels: ParcelConfig,
}

fn default_name() -> String {
    "audit".into()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            inputs: None,
            ranges: RangeConfig::default(),
            thresholds: ThresholdConfig::default(),
            projection: ProjectionConfig::default(),
            overlap: OverlapConfig::default(),
            parcels: ParcelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputFiles {
    pub producers: String,
    pub plantations: String,
    pub parcels: String,
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Inclusive business range for one numeric column. Written `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f64; 2]")]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl From<[f64; 2]> for ValueRange {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl std::fmt::Display for ValueRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}; {}]", self.min, self.max)
    }
}

pub type RangeTable = BTreeMap<String, ValueRange>;

#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
    #[serde(default = "default_producer_ranges")]
    pub producers: RangeTable,
    #[serde(default = "default_plantation_ranges")]
    pub plantations: RangeTable,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            producers: default_producer_ranges(),
            plantations: default_plantation_ranges(),
        }
    }
}

pub fn default_producer_ranges() -> RangeTable {
    [
        (columns::BIRTH_YEAR, ValueRange::new(1930.0, 2005.0)),
        (columns::FARM_AREA_HA, ValueRange::new(0.1, 100.0)),
        (columns::CACAO_AREA_HA, ValueRange::new(0.1, 50.0)),
        (columns::PLANTATION_COUNT, ValueRange::new(1.0, 20.0)),
        (columns::TOTAL_ESTIMATE_KG, ValueRange::new(50.0, 20_000.0)),
        (columns::HOUSEHOLD_SIZE, ValueRange::new(1.0, 20.0)),
    ]
    .into_iter()
    .map(|(c, r)| (c.to_string(), r))
    .collect()
}

pub fn default_plantation_ranges() -> RangeTable {
    [
        (columns::PLANTATION_AREA_HA, ValueRange::new(0.1, 50.0)),
        (columns::YIELD_KG_HA, ValueRange::new(100.0, 2000.0)),
        (columns::ESTIMATE_KG, ValueRange::new(10.0, 20_000.0)),
        (columns::LATITUDE, ValueRange::new(5.0, 10.0)),
        (columns::LONGITUDE, ValueRange::new(-9.0, -2.0)),
    ]
    .into_iter()
    .map(|(c, r)| (c.to_string(), r))
    .collect()
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdConfig {
    /// Relative deviation above which declared vs aggregated/computed values
    /// are flagged (0.10 = 10 %).
    #[serde(default = "default_deviation")]
    pub deviation: f64,
    /// Overlap ratio above which a parcel pair is reported (0.15 = 15 %).
    #[serde(default = "default_overlap")]
    pub overlap: f64,
}

fn default_deviation() -> f64 {
    0.10
}

fn default_overlap() -> f64 {
    0.15
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            deviation: default_deviation(),
            overlap: default_overlap(),
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// UTM zone of the dataset's mean centroid, `fallback_epsg` if none fits.
    #[default]
    AutoUtm,
    /// Always `epsg`.
    Fixed,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub mode: ProjectionMode,
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default = "default_fallback_epsg")]
    pub fallback_epsg: u32,
}

fn default_fallback_epsg() -> u32 {
    EPSG_WEB_MERCATOR
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            mode: ProjectionMode::AutoUtm,
            epsg: None,
            fallback_epsg: default_fallback_epsg(),
        }
    }
}

// ---------------------------------------------------------------------------
// Overlap + Parcels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    /// Every pair, O(n²) intersection tests.
    Exhaustive,
    /// R-tree bounding-box pre-filter; same output as `Exhaustive`.
    #[default]
    Indexed,
}

impl std::fmt::Display for OverlapStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhaustive => write!(f, "exhaustive"),
            Self::Indexed => write!(f, "indexed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OverlapConfig {
    #[serde(default)]
    pub strategy: OverlapStrategy,
    /// Evaluate candidate pairs on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Keep intersection geometries for export.
    #[serde(default = "default_true")]
    pub keep_geometries: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            strategy: OverlapStrategy::Indexed,
            parallel: true,
            keep_geometries: true,
        }
    }
}

/// Expected envelope for parcel centroids, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ParcelConfig {
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl AuditConfig {
    pub fn from_toml(input: &str) -> Result<Self, AuditError> {
        let config: AuditConfig =
            toml::from_str(input).map_err(|e| AuditError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        for (dataset, table) in [("producers", &self.ranges.producers), ("plantations", &self.ranges.plantations)] {
            for (column, range) in table {
                if !range.min.is_finite() || !range.max.is_finite() {
                    return Err(AuditError::ConfigValidation(format!(
                        "ranges.{dataset}.{column}: bounds must be finite"
                    )));
                }
                if range.min > range.max {
                    return Err(AuditError::ConfigValidation(format!(
                        "ranges.{dataset}.{column}: min {} is greater than max {}",
                        range.min, range.max
                    )));
                }
            }
        }

        for (name, value) in [
            ("deviation", self.thresholds.deviation),
            ("overlap", self.thresholds.overlap),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(AuditError::ConfigValidation(format!(
                    "thresholds.{name} must be in (0, 1], got {value}"
                )));
            }
        }

        let fallback = Crs::from_epsg(self.projection.fallback_epsg)?;
        if !fallback.is_projected() {
            return Err(AuditError::ConfigValidation(format!(
                "projection.fallback_epsg {} is not a projected CRS",
                self.projection.fallback_epsg
            )));
        }

        if self.projection.mode == ProjectionMode::Fixed {
            let epsg = self.projection.epsg.ok_or_else(|| {
                AuditError::ConfigValidation("projection.mode = \"fixed\" requires projection.epsg".into())
            })?;
            if !Crs::from_epsg(epsg)?.is_projected() {
                return Err(AuditError::ConfigValidation(format!(
                    "projection.epsg {epsg} is not a projected CRS"
                )));
            }
        }

        if let Some(bounds) = self.parcels.bounds {
            if bounds.min_lon > bounds.max_lon || bounds.min_lat > bounds.max_lat {
                return Err(AuditError::ConfigValidation(
                    "parcels.bounds: min must not exceed max".into(),
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
