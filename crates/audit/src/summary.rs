use std::collections::BTreeMap;

use crate::model::{AnomalyRecord, AuditInput, AuditSummary};
use crate::overlap::OverlapOutput;
use crate::parcels::PreparedParcels;
use crate::rollup::Rollups;
use crate::surfaces::SurfaceComparison;
use crate::tolerance::{round_to, safe_rate};

/// Run-level counters for the report envelope.
pub fn compute_summary(
    input: &AuditInput,
    prepared: &PreparedParcels,
    anomalies: &[AnomalyRecord],
    surfaces: &SurfaceComparison,
    overlaps: &OverlapOutput,
    rollups: &Rollups,
    warnings: usize,
) -> AuditSummary {
    let mut anomaly_counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in anomalies {
        *anomaly_counts.entry(record.kind.to_string()).or_insert(0) += 1;
    }

    let loaded = input.parcels.parcels.len();
    let kept = prepared.parcels.len();
    let joined = surfaces.joined();
    let area_anomalies = surfaces.anomalies.len();

    AuditSummary {
        producers: input.producers.len(),
        plantations: input.plantations.len(),
        parcels_loaded: loaded,
        parcels_kept: kept,
        parcels_dropped: loaded.saturating_sub(kept),
        projection_epsg: prepared.projection.epsg,
        total_anomalies: anomalies.len(),
        anomaly_counts,
        joined_plantations: joined,
        area_anomalies,
        area_anomaly_rate: round_to(safe_rate(area_anomalies as f64, joined as f64) * 100.0, 2),
        overlaps: overlaps.records.len(),
        cooperatives: rollups.cooperatives.len(),
        warnings,
    }
}
