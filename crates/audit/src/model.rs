use std::collections::{BTreeMap, BTreeSet};

use geo::MultiPolygon;
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::consistency::IdCoverage;
use crate::crs::{Crs, ProjectionChoice};
use crate::overlap::OverlapOutput;
use crate::parcels::CleaningAction;
use crate::rollup::Rollups;
use crate::surfaces::SurfaceComparison;
use crate::tolerance::parse_number;

/// Column names of the cleaned producer / plantation / parcel datasets.
pub mod columns {
    pub const PRODUCER_ID: &str = "code_producteur";
    pub const BIRTH_YEAR: &str = "annee_naissance";
    pub const FARM_AREA_HA: &str = "superficie_totale_exploitation_ha";
    pub const CACAO_AREA_HA: &str = "superficie_totale_cacao_ha";
    pub const PLANTATION_COUNT: &str = "nb_plantations_cacao";
    pub const TOTAL_ESTIMATE_KG: &str = "estimation_totale_kg";
    pub const HOUSEHOLD_SIZE: &str = "taille_menage";
    pub const COOPERATIVE: &str = "cooperative";

    pub const PLANTATION_ID: &str = "code_plantation";
    pub const PLANTATION_AREA_HA: &str = "superficie_cacao_ha";
    pub const YIELD_KG_HA: &str = "rendement_kg_ha";
    pub const ESTIMATE_KG: &str = "estimation_kg";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";

    pub const PARCEL_ID: &str = "Farms_ID";
    pub const PARCEL_OWNER: &str = "Farmer_ID";
    pub const PARCEL_DECLARED_AREA: &str = "Superficie";
    pub const GEOMETRY: &str = "geometry";
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Row access shared by every dataset the generic detectors run on.
pub trait Tabular {
    fn id(&self) -> &str;
    /// Numeric value of `column`, `None` when absent or not coercible.
    fn numeric(&self, column: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerRecord {
    pub id: String,
    pub birth_year: Option<f64>,
    pub farm_area_ha: Option<f64>,
    pub cacao_area_ha: Option<f64>,
    pub plantation_count: Option<f64>,
    pub estimated_yield_kg: Option<f64>,
    pub household_size: Option<f64>,
    pub cooperative: Option<String>,
    /// Remaining columns, verbatim.
    pub attributes: BTreeMap<String, String>,
}

impl ProducerRecord {
    pub const COLUMNS: [&'static str; 8] = [
        columns::PRODUCER_ID,
        columns::BIRTH_YEAR,
        columns::FARM_AREA_HA,
        columns::CACAO_AREA_HA,
        columns::PLANTATION_COUNT,
        columns::TOTAL_ESTIMATE_KG,
        columns::HOUSEHOLD_SIZE,
        columns::COOPERATIVE,
    ];

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }
}

impl Tabular for ProducerRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn numeric(&self, column: &str) -> Option<f64> {
        match column {
            columns::BIRTH_YEAR => self.birth_year,
            columns::FARM_AREA_HA => self.farm_area_ha,
            columns::CACAO_AREA_HA => self.cacao_area_ha,
            columns::PLANTATION_COUNT => self.plantation_count,
            columns::TOTAL_ESTIMATE_KG => self.estimated_yield_kg,
            columns::HOUSEHOLD_SIZE => self.household_size,
            other => self.attributes.get(other).and_then(|v| parse_number(v)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlantationRecord {
    pub id: String,
    /// Owning producer; may reference no producer at all.
    pub producer_id: Option<String>,
    pub area_ha: Option<f64>,
    pub yield_kg_ha: Option<f64>,
    pub estimated_kg: Option<f64>,
    pub cooperative: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attributes: BTreeMap<String, String>,
}

impl PlantationRecord {
    pub const COLUMNS: [&'static str; 8] = [
        columns::PLANTATION_ID,
        columns::PRODUCER_ID,
        columns::PLANTATION_AREA_HA,
        columns::YIELD_KG_HA,
        columns::ESTIMATE_KG,
        columns::COOPERATIVE,
        columns::LATITUDE,
        columns::LONGITUDE,
    ];

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }
}

impl Tabular for PlantationRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn numeric(&self, column: &str) -> Option<f64> {
        match column {
            columns::PLANTATION_AREA_HA => self.area_ha,
            columns::YIELD_KG_HA => self.yield_kg_ha,
            columns::ESTIMATE_KG => self.estimated_kg,
            columns::LATITUDE => self.latitude,
            columns::LONGITUDE => self.longitude,
            other => self.attributes.get(other).and_then(|v| parse_number(v)),
        }
    }
}

/// A named dataset: the columns present in its source plus its rows.
#[derive(Debug, Clone)]
pub struct Table<R> {
    pub name: String,
    pub id_column: String,
    pub columns: BTreeSet<String>,
    pub rows: Vec<R>,
}

impl<R> Table<R> {
    pub fn new<I, S>(name: &str, id_column: &str, columns: I, rows: Vec<R>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            id_column: id_column.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Table<ProducerRecord> {
    /// Producer table carrying every standard column.
    pub fn producers(rows: Vec<ProducerRecord>) -> Self {
        Self::new("producers", columns::PRODUCER_ID, ProducerRecord::COLUMNS, rows)
    }
}

impl Table<PlantationRecord> {
    /// Plantation table carrying every standard column.
    pub fn plantations(rows: Vec<PlantationRecord>) -> Self {
        Self::new("plantations", columns::PLANTATION_ID, PlantationRecord::COLUMNS, rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelGeometry {
    pub id: String,
    pub owner_id: Option<String>,
    pub declared_area: Option<f64>,
    pub geometry: MultiPolygon<f64>,
    /// Set by the loader when the source geometry could not be read as a
    /// polygon (unsupported type, malformed position).
    pub defect: Option<String>,
}

impl ParcelGeometry {
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self { id: id.into(), owner_id: None, declared_area: None, geometry, defect: None }
    }
}

#[derive(Debug, Clone)]
pub struct ParcelCollection {
    pub crs: Crs,
    pub parcels: Vec<ParcelGeometry>,
}

/// Pre-loaded, already-typed inputs for one run.
pub struct AuditInput {
    pub producers: Table<ProducerRecord>,
    pub plantations: Table<PlantationRecord>,
    pub parcels: ParcelCollection,
    /// Warnings raised while loading, carried into the report.
    pub warnings: Vec<Warning>,
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    DuplicateIdentifier,
    ValueOutOfRange,
    PlantationWithoutProducer,
    ProducerWithoutPlantation,
    SurfaceDeviationOverThreshold,
    YieldDeviationOverThreshold,
    CooperativeMismatch,
    AreaDeviationOverThreshold,
    EmptyGeometry,
    InvalidGeometry,
    UnprojectableGeometry,
    CentroidOutOfBounds,
    DuplicateGeometry,
    MissingIdentifier,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateIdentifier => write!(f, "duplicate_identifier"),
            Self::ValueOutOfRange => write!(f, "value_out_of_range"),
            Self::PlantationWithoutProducer => write!(f, "plantation_without_producer"),
            Self::ProducerWithoutPlantation => write!(f, "producer_without_plantation"),
            Self::SurfaceDeviationOverThreshold => write!(f, "surface_deviation_over_threshold"),
            Self::YieldDeviationOverThreshold => write!(f, "yield_deviation_over_threshold"),
            Self::CooperativeMismatch => write!(f, "cooperative_mismatch"),
            Self::AreaDeviationOverThreshold => write!(f, "area_deviation_over_threshold"),
            Self::EmptyGeometry => write!(f, "empty_geometry"),
            Self::InvalidGeometry => write!(f, "invalid_geometry"),
            Self::UnprojectableGeometry => write!(f, "unprojectable_geometry"),
            Self::CentroidOutOfBounds => write!(f, "centroid_out_of_bounds"),
            Self::DuplicateGeometry => write!(f, "duplicate_geometry"),
            Self::MissingIdentifier => write!(f, "missing_identifier"),
        }
    }
}

/// Observed value attached to an anomaly. Totally ordered so record sets can
/// be sorted and deduplicated on the full tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum AnomalyValue {
    Number(OrderedFloat<f64>),
    Text(String),
}

impl From<f64> for AnomalyValue {
    fn from(v: f64) -> Self {
        Self::Number(OrderedFloat(v))
    }
}

impl From<&str> for AnomalyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AnomalyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AnomalyRecord {
    pub entity_id: String,
    pub column: String,
    pub kind: AnomalyKind,
    pub value: AnomalyValue,
    /// Zero-based data row in the source dataset, when the anomaly is tied
    /// to one row. Keeps repeated identifiers distinguishable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    pub detail: String,
}

impl AnomalyRecord {
    pub fn new(
        entity_id: impl Into<String>,
        column: impl Into<String>,
        kind: AnomalyKind,
        value: impl Into<AnomalyValue>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            column: column.into(),
            kind,
            value: value.into(),
            row: None,
            detail: String::new(),
        }
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Sort and drop exact duplicates.
pub fn finalize_anomalies(mut records: Vec<AnomalyRecord>) -> Vec<AnomalyRecord> {
    records.sort();
    records.dedup();
    records
}

/// Configuration gap or recovered failure, reported alongside results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Warning {
    pub stage: String,
    pub message: String,
}

impl Warning {
    pub fn new(stage: &str, message: impl Into<String>) -> Self {
        Self { stage: stage.to_string(), message: message.into() }
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub producers: usize,
    pub plantations: usize,
    pub parcels_loaded: usize,
    pub parcels_kept: usize,
    pub parcels_dropped: usize,
    pub projection_epsg: u32,
    pub total_anomalies: usize,
    pub anomaly_counts: BTreeMap<String, usize>,
    pub joined_plantations: usize,
    pub area_anomalies: usize,
    /// Percentage of joined plantations with an area anomaly.
    pub area_anomaly_rate: f64,
    pub overlaps: usize,
    pub cooperatives: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub projection: ProjectionChoice,
    pub deviation_threshold: f64,
    pub overlap_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub meta: AuditMeta,
    pub summary: AuditSummary,
    pub warnings: Vec<Warning>,
    pub producer_anomalies: Vec<AnomalyRecord>,
    pub plantation_anomalies: Vec<AnomalyRecord>,
    pub consistency_anomalies: Vec<AnomalyRecord>,
    pub parcel_anomalies: Vec<AnomalyRecord>,
    pub coverage: IdCoverage,
    pub surfaces: SurfaceComparison,
    pub overlaps: OverlapOutput,
    pub rollups: Rollups,
    pub cleaning_log: Vec<CleaningAction>,
}

impl AuditResult {
    /// Every anomaly record of the run, sorted and deduplicated.
    pub fn all_anomalies(&self) -> Vec<AnomalyRecord> {
        let mut all = Vec::new();
        all.extend(self.producer_anomalies.iter().cloned());
        all.extend(self.plantation_anomalies.iter().cloned());
        all.extend(self.consistency_anomalies.iter().cloned());
        all.extend(self.parcel_anomalies.iter().cloned());
        all.extend(self.surfaces.anomaly_records());
        finalize_anomalies(all)
    }

    pub fn has_findings(&self) -> bool {
        self.summary.total_anomalies > 0 || !self.overlaps.records.is_empty()
    }
}
