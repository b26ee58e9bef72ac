//! Report files written by `plotcheck run --output <dir>`.
//!
//! - `audit.json`: the full result, same document as `--json`
//! - `anomalies.csv`: every anomaly record, sorted
//! - `surfaces.csv`: declared vs computed area per joined plantation
//! - `overlaps.csv` / `overlaps.geojson`: overlapping parcel pairs
//! - `rollup_producers.csv` / `rollup_cooperatives.csv`

use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use plotcheck_audit::crs::{unproject_geometry, Crs};
use plotcheck_audit::model::AnomalyValue;
use plotcheck_audit::overlap::OverlapOutput;
use plotcheck_audit::AuditResult;
use serde::Serialize;

use crate::CliError;

pub fn write_reports(dir: &Path, result: &AuditResult, json: &str) -> Result<Vec<PathBuf>, CliError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CliError::output(format!("cannot create {}: {e}", dir.display())))?;

    let mut written = Vec::new();

    let path = dir.join("audit.json");
    write_file(&path, json)?;
    written.push(path);

    let path = dir.join("anomalies.csv");
    write_file(&path, &anomalies_csv(result)?)?;
    written.push(path);

    for (name, csv) in [
        ("surfaces.csv", rows_csv(&result.surfaces.rows)?),
        ("overlaps.csv", rows_csv(&result.overlaps.records)?),
        ("rollup_producers.csv", rows_csv(&result.rollups.producers)?),
        ("rollup_cooperatives.csv", rows_csv(&result.rollups.cooperatives)?),
    ] {
        let path = dir.join(name);
        write_file(&path, &csv)?;
        written.push(path);
    }

    let path = dir.join("overlaps.geojson");
    write_file(&path, &overlaps_geojson(&result.overlaps)?)?;
    written.push(path);

    Ok(written)
}

fn write_file(path: &Path, contents: &str) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|e| CliError::output(format!("cannot write {}: {e}", path.display())))
}

fn csv_err(e: impl std::fmt::Display) -> CliError {
    CliError::output(format!("CSV write error: {e}"))
}

/// Headers come from the first row; an empty section is an empty file.
fn rows_csv<T: Serialize>(rows: &[T]) -> Result<String, CliError> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
    for row in rows {
        wtr.serialize(row).map_err(csv_err)?;
    }
    if rows.is_empty() {
        return Ok(String::new());
    }
    let bytes = wtr.into_inner().map_err(csv_err)?;
    String::from_utf8(bytes).map_err(csv_err)
}

fn anomalies_csv(result: &AuditResult) -> Result<String, CliError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["entity_id", "column", "kind", "value", "row", "detail"])
        .map_err(csv_err)?;
    for record in result.all_anomalies() {
        let value = match &record.value {
            AnomalyValue::Number(n) => n.to_string(),
            AnomalyValue::Text(t) => t.clone(),
        };
        let row = record.row.map(|r| r.to_string()).unwrap_or_default();
        wtr.write_record([
            record.entity_id.as_str(),
            record.column.as_str(),
            record.kind.to_string().as_str(),
            value.as_str(),
            row.as_str(),
            record.detail.as_str(),
        ])
        .map_err(csv_err)?;
    }
    let bytes = wtr.into_inner().map_err(csv_err)?;
    String::from_utf8(bytes).map_err(csv_err)
}

/// Intersection polygons as an RFC 7946 FeatureCollection: the projected
/// geometries are brought back to longitude/latitude (EPSG:4326).
fn overlaps_geojson(overlaps: &OverlapOutput) -> Result<String, CliError> {
    let measured = Crs::from_epsg(overlaps.epsg)?;
    let mut features = Vec::with_capacity(overlaps.records.len());
    for (i, record) in overlaps.records.iter().enumerate() {
        let geometry = overlaps
            .geometries
            .get(i)
            .map(|g| unproject_geometry(g, measured))
            .transpose()
            .map_err(|e| {
                CliError::output(format!("cannot export overlap {} / {}: {e}", record.id_1, record.id_2))
            })?;

        let mut properties = JsonObject::new();
        properties.insert("id_1".into(), JsonValue::from(record.id_1.clone()));
        properties.insert("id_2".into(), JsonValue::from(record.id_2.clone()));
        properties.insert("overlap_ratio".into(), JsonValue::from(record.overlap_ratio));
        properties.insert("intersection_area_m2".into(), JsonValue::from(record.intersection_area_m2));
        features.push(Feature {
            bbox: None,
            geometry: geometry.map(|g| Geometry::new(geojson::Value::from(&g))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    let collection = FeatureCollection { bbox: None, features, foreign_members: None };
    serde_json::to_string_pretty(&collection).map_err(|e| CliError::output(format!("GeoJSON error: {e}")))
}
