use tracing::info;

use crate::config::AuditConfig;
use crate::consistency::{check_consistency, id_coverage};
use crate::error::AuditError;
use crate::model::{finalize_anomalies, AuditInput, AuditMeta, AuditResult};
use crate::outliers::detect_anomalies;
use crate::overlap::detect_overlaps;
use crate::parcels::prepare_parcels;
use crate::rollup::build_rollups;
use crate::summary::compute_summary;
use crate::surfaces::compare_surfaces;

/// Run the full audit per config. Inputs are borrowed and never modified.
pub fn run(config: &AuditConfig, input: &AuditInput) -> Result<AuditResult, AuditError> {
    config.validate()?;
    let deviation = config.thresholds.deviation;

    info!(
        name = %config.name,
        producers = input.producers.len(),
        plantations = input.plantations.len(),
        parcels = input.parcels.parcels.len(),
        "audit started"
    );

    // Tabular checks
    let producer_out = detect_anomalies(&input.producers, &config.ranges.producers);
    let plantation_out = detect_anomalies(&input.plantations, &config.ranges.plantations);
    let consistency_anomalies = check_consistency(&input.producers, &input.plantations, deviation);
    info!(
        producers = producer_out.anomalies.len(),
        plantations = plantation_out.anomalies.len(),
        consistency = consistency_anomalies.len(),
        "tabular checks done"
    );

    // Geometry
    let prepared = prepare_parcels(&input.parcels, config)?;
    let coverage = id_coverage(&input.plantations, &prepared.parcels);
    let surfaces = compare_surfaces(&input.plantations, &prepared.parcels, deviation);
    info!(joined = surfaces.joined(), anomalies = surfaces.anomalies.len(), "surface comparison done");
    let overlaps = detect_overlaps(
        &prepared.parcels,
        &config.overlap,
        config.thresholds.overlap,
        prepared.projection.epsg,
    );

    let rollups = build_rollups(&input.plantations, &surfaces);

    let mut warnings = input.warnings.clone();
    warnings.extend(producer_out.warnings);
    warnings.extend(plantation_out.warnings);
    warnings.extend(prepared.warnings.iter().cloned());

    let parcel_anomalies = finalize_anomalies(prepared.anomalies.clone());
    let all = finalize_anomalies(
        producer_out
            .anomalies
            .iter()
            .chain(&plantation_out.anomalies)
            .chain(&consistency_anomalies)
            .chain(&parcel_anomalies)
            .cloned()
            .chain(surfaces.anomaly_records())
            .collect(),
    );
    let summary = compute_summary(input, &prepared, &all, &surfaces, &overlaps, &rollups, warnings.len());

    info!(
        anomalies = summary.total_anomalies,
        overlaps = summary.overlaps,
        warnings = summary.warnings,
        "audit finished"
    );

    Ok(AuditResult {
        meta: AuditMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            projection: prepared.projection.clone(),
            deviation_threshold: deviation,
            overlap_threshold: config.thresholds.overlap,
        },
        summary,
        warnings,
        producer_anomalies: producer_out.anomalies,
        plantation_anomalies: plantation_out.anomalies,
        consistency_anomalies,
        parcel_anomalies,
        coverage,
        surfaces,
        overlaps,
        rollups,
        cleaning_log: prepared.log,
    })
}
