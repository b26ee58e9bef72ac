//! Declared plantation area against the area measured on its parcel.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::model::{columns, AnomalyKind, AnomalyRecord, PlantationRecord, Table};
use crate::parcels::PreparedParcel;
use crate::tolerance::{as_percent, exceeds, normalize_id, relative_deviation, round_to};

const M2_PER_HA: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRecord {
    pub plantation_id: String,
    pub producer_id: Option<String>,
    pub cooperative: Option<String>,
    pub declared_area_ha: Option<f64>,
    pub computed_area_ha: f64,
    /// `(computed - declared) / declared`; `None` when declared is zero or absent.
    pub relative_deviation: Option<f64>,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SurfaceComparison {
    pub threshold: f64,
    pub rows: Vec<ReconciliationRecord>,
    pub anomalies: Vec<ReconciliationRecord>,
}

impl SurfaceComparison {
    pub fn joined(&self) -> usize {
        self.rows.len()
    }

    /// Flagged rows as `area_deviation_over_threshold` records.
    pub fn anomaly_records(&self) -> Vec<AnomalyRecord> {
        self.anomalies
            .iter()
            .filter_map(|r| {
                let dev = r.relative_deviation?;
                Some(
                    AnomalyRecord::new(
                        r.plantation_id.as_str(),
                        columns::PLANTATION_AREA_HA,
                        AnomalyKind::AreaDeviationOverThreshold,
                        as_percent(dev),
                    )
                    .with_detail(format!(
                        "computed {} ha, declared {} ha",
                        r.computed_area_ha,
                        r.declared_area_ha.unwrap_or_default()
                    )),
                )
            })
            .collect()
    }
}

/// Inner join of plantations to parcels on the normalized identifier.
pub fn compare_surfaces(
    plantations: &Table<PlantationRecord>,
    parcels: &[PreparedParcel],
    threshold: f64,
) -> SurfaceComparison {
    let mut by_id: HashMap<&str, &PreparedParcel> = HashMap::new();
    for parcel in parcels {
        let id = parcel.id.trim();
        if !id.is_empty() {
            by_id.entry(id).or_insert(parcel);
        }
    }

    let mut rows: Vec<ReconciliationRecord> = plantations
        .rows
        .iter()
        .filter_map(|plantation| {
            let id = normalize_id(&plantation.id)?;
            let parcel = by_id.get(id.as_str())?;
            let computed = parcel.area_m2 / M2_PER_HA;
            let deviation = relative_deviation(computed, plantation.area_ha);
            Some(ReconciliationRecord {
                plantation_id: id,
                producer_id: plantation.producer_id.as_deref().and_then(normalize_id),
                cooperative: plantation.cooperative.clone(),
                declared_area_ha: plantation.area_ha,
                computed_area_ha: round_to(computed, 4),
                relative_deviation: deviation.map(|d| round_to(d, 4)),
                is_anomaly: deviation.is_some_and(|d| exceeds(d, threshold)),
            })
        })
        .collect();
    rows.sort_by(|a, b| a.plantation_id.cmp(&b.plantation_id));

    let anomalies: Vec<ReconciliationRecord> = rows.iter().filter(|r| r.is_anomaly).cloned().collect();
    debug!(joined = rows.len(), anomalies = anomalies.len(), "surface comparison done");

    SurfaceComparison { threshold, rows, anomalies }
}
