//! Parcel verification and cleaning: every geometry that reaches area or
//! overlap computation is non-empty, valid, unique and projected.

use std::borrow::Cow;
use std::collections::HashMap;

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BoundingRect, Centroid, Line, LineString, MultiPolygon, Rect};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::AuditConfig;
use crate::crs::{choose_projection, project_geometry, unproject_geometry, Crs, ProjectionChoice};
use crate::error::AuditError;
use crate::model::{columns, AnomalyKind, AnomalyRecord, ParcelCollection, ParcelGeometry, Warning};

/// A cleaned parcel in the measurement CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedParcel {
    pub id: String,
    pub owner_id: Option<String>,
    pub declared_area: Option<f64>,
    /// Projected coordinates, metres.
    pub geometry: MultiPolygon<f64>,
    pub area_m2: f64,
    pub bbox: Rect<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningKind {
    Dropped,
    Flagged,
    Projection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningAction {
    pub entity_id: String,
    pub action: CleaningKind,
    pub details: String,
}

impl CleaningAction {
    fn new(entity_id: impl Into<String>, action: CleaningKind, details: impl Into<String>) -> Self {
        Self { entity_id: entity_id.into(), action, details: details.into() }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedParcels {
    pub projection: ProjectionChoice,
    pub parcels: Vec<PreparedParcel>,
    pub anomalies: Vec<AnomalyRecord>,
    pub log: Vec<CleaningAction>,
    pub warnings: Vec<Warning>,
}

/// A parcel still in play, with its geometry in the working CRS.
struct Candidate<'a> {
    row: usize,
    label: String,
    parcel: &'a ParcelGeometry,
    geometry: Cow<'a, MultiPolygon<f64>>,
}

/// Verify, deduplicate and project a parcel collection.
pub fn prepare_parcels(
    collection: &ParcelCollection,
    config: &AuditConfig,
) -> Result<PreparedParcels, AuditError> {
    // Web Mercator input is brought back to lon/lat and goes through the
    // same projection policy as geographic input.
    let source = collection.crs;
    let working = match source {
        Crs::WebMercator => Crs::Geographic,
        other => other,
    };
    let geographic = !working.is_projected();
    let mut anomalies = Vec::new();
    let mut log = Vec::new();
    let mut warnings = Vec::new();

    let mut kept: Vec<Candidate<'_>> = Vec::new();

    for (row, parcel) in collection.parcels.iter().enumerate() {
        let label = parcel_label(row, parcel);

        if parcel.id.trim().is_empty() {
            anomalies.push(
                AnomalyRecord::new(label.as_str(), columns::PARCEL_ID, AnomalyKind::MissingIdentifier, "")
                    .at_row(row),
            );
            log.push(CleaningAction::new(label, CleaningKind::Dropped, format!("no {}", columns::PARCEL_ID)));
            continue;
        }

        if let Some(defect) = &parcel.defect {
            anomalies.push(
                AnomalyRecord::new(label.as_str(), columns::GEOMETRY, AnomalyKind::InvalidGeometry, defect.as_str())
                    .at_row(row),
            );
            log.push(CleaningAction::new(label, CleaningKind::Dropped, format!("invalid geometry: {defect}")));
            continue;
        }

        if is_empty(&parcel.geometry) {
            anomalies.push(
                AnomalyRecord::new(label.as_str(), columns::GEOMETRY, AnomalyKind::EmptyGeometry, "")
                    .at_row(row),
            );
            log.push(CleaningAction::new(label, CleaningKind::Dropped, "empty geometry"));
            continue;
        }

        if let Err(reason) = validate_geometry(&parcel.geometry, source == Crs::Geographic) {
            anomalies.push(
                AnomalyRecord::new(label.as_str(), columns::GEOMETRY, AnomalyKind::InvalidGeometry, reason.as_str())
                    .at_row(row),
            );
            log.push(CleaningAction::new(label, CleaningKind::Dropped, format!("invalid geometry: {reason}")));
            continue;
        }

        let geometry = if source == working {
            Cow::Borrowed(&parcel.geometry)
        } else {
            match unproject_geometry(&parcel.geometry, source) {
                Ok(g) => Cow::Owned(g),
                Err(e) => {
                    anomalies.push(
                        AnomalyRecord::new(
                            label.as_str(),
                            columns::GEOMETRY,
                            AnomalyKind::UnprojectableGeometry,
                            e.to_string(),
                        )
                        .at_row(row),
                    );
                    log.push(CleaningAction::new(label, CleaningKind::Dropped, format!("unprojection failed: {e}")));
                    continue;
                }
            }
        };

        kept.push(Candidate { row, label, parcel, geometry });
    }

    if let Some(bounds) = config.parcels.bounds {
        for candidate in &kept {
            let Some(centroid) = candidate.geometry.centroid() else {
                continue;
            };
            let c = match working.unproject(centroid.0) {
                Ok(c) => c,
                Err(e) => {
                    debug!(parcel = %candidate.label, error = %e, "centroid not checked against bounds");
                    continue;
                }
            };
            if !bounds.contains(c.x, c.y) {
                let value = format!("({:.6}, {:.6})", c.x, c.y);
                anomalies.push(
                    AnomalyRecord::new(
                        candidate.label.as_str(),
                        columns::GEOMETRY,
                        AnomalyKind::CentroidOutOfBounds,
                        value,
                    )
                    .at_row(candidate.row)
                    .with_detail(format!(
                        "expected lon [{}; {}], lat [{}; {}]",
                        bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat
                    )),
                );
                log.push(CleaningAction::new(
                    candidate.label.as_str(),
                    CleaningKind::Flagged,
                    "centroid out of bounds",
                ));
            }
        }
    }

    // duplicate identifiers: every occurrence flagged, first kept
    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    for candidate in &kept {
        *id_counts.entry(candidate.parcel.id.trim()).or_insert(0) += 1;
    }
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut unique = Vec::with_capacity(kept.len());
    for candidate in kept {
        let parcel = candidate.parcel;
        let id = parcel.id.trim();
        let occurrences = id_counts.get(id).copied().unwrap_or(0);
        if occurrences > 1 {
            anomalies.push(
                AnomalyRecord::new(id, columns::PARCEL_ID, AnomalyKind::DuplicateIdentifier, id)
                    .at_row(candidate.row)
                    .with_detail(format!("{occurrences} occurrences")),
            );
            if let Some(first) = first_seen.get(id) {
                log.push(CleaningAction::new(
                    candidate.label,
                    CleaningKind::Dropped,
                    format!("duplicate {} (first kept at row {first})", columns::PARCEL_ID),
                ));
                continue;
            }
            first_seen.insert(id, candidate.row);
        }
        unique.push(candidate);
    }

    // exact duplicate geometries, first kept
    let mut hashes: HashMap<String, String> = HashMap::new();
    let mut distinct = Vec::with_capacity(unique.len());
    for candidate in unique {
        let hash = geometry_hash(&candidate.parcel.geometry);
        if let Some(first) = hashes.get(&hash) {
            anomalies.push(
                AnomalyRecord::new(
                    candidate.label.as_str(),
                    columns::GEOMETRY,
                    AnomalyKind::DuplicateGeometry,
                    hash.as_str(),
                )
                .at_row(candidate.row)
                .with_detail(format!("same geometry as {first}")),
            );
            log.push(CleaningAction::new(
                hash,
                CleaningKind::Dropped,
                format!("duplicate geometry of {first}: {}", candidate.label),
            ));
            continue;
        }
        hashes.insert(hash, candidate.label.clone());
        distinct.push(candidate);
    }

    let projection = choose_projection(
        &config.projection,
        source,
        distinct.iter().map(|c| &*c.geometry),
    )?;
    let projection_note = if projection.fallback_used {
        format!("fallback:{}", projection.target)
    } else {
        projection.target.to_string()
    };
    if let Some(reason) = &projection.reason {
        if projection.fallback_used {
            warn!(target_crs = %projection.target, %reason, "UTM selection failed, using fallback");
            warnings.push(Warning::new("parcels", format!("{reason}; areas computed in {}", projection.target)));
        }
    }
    log.push(CleaningAction::new("all", CleaningKind::Projection, projection_note));

    let mut parcels = Vec::with_capacity(distinct.len());
    for Candidate { row, label, parcel, geometry } in distinct {
        let geometry = if geographic {
            match project_geometry(&geometry, projection.target) {
                Ok(g) => g,
                Err(e) => {
                    anomalies.push(
                        AnomalyRecord::new(
                            label.as_str(),
                            columns::GEOMETRY,
                            AnomalyKind::UnprojectableGeometry,
                            e.to_string(),
                        )
                        .at_row(row),
                    );
                    log.push(CleaningAction::new(label, CleaningKind::Dropped, format!("projection failed: {e}")));
                    continue;
                }
            }
        } else {
            geometry.into_owned()
        };

        let Some(bbox) = geometry.bounding_rect() else {
            continue;
        };
        parcels.push(PreparedParcel {
            id: parcel.id.trim().to_string(),
            owner_id: parcel.owner_id.clone(),
            declared_area: parcel.declared_area,
            area_m2: geometry.unsigned_area(),
            geometry,
            bbox,
        });
    }

    let dropped = collection.parcels.len() - parcels.len();
    if dropped > 0 {
        warn!(dropped, kept = parcels.len(), "parcels removed during cleaning");
    }
    info!(
        kept = parcels.len(),
        epsg = projection.epsg,
        fallback = projection.fallback_used,
        "parcels prepared"
    );

    Ok(PreparedParcels { projection, parcels, anomalies, log, warnings })
}

fn parcel_label(row: usize, parcel: &ParcelGeometry) -> String {
    let id = parcel.id.trim();
    if id.is_empty() {
        format!("feature#{row}")
    } else {
        id.to_string()
    }
}

fn is_empty(geometry: &MultiPolygon<f64>) -> bool {
    geometry.0.iter().all(|p| p.exterior().0.is_empty())
}

fn validate_geometry(geometry: &MultiPolygon<f64>, geographic: bool) -> Result<(), String> {
    for polygon in geometry {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            validate_ring(ring, geographic)?;
        }
    }
    let area = geometry.unsigned_area();
    if !area.is_finite() || area == 0.0 {
        return Err("zero area".into());
    }
    Ok(())
}

fn validate_ring(ring: &LineString<f64>, geographic: bool) -> Result<(), String> {
    if ring.0.len() < 4 {
        return Err(format!("ring with {} positions", ring.0.len()));
    }
    for c in ring.coords() {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err("non-finite coordinate".into());
        }
        if geographic && (c.x.abs() > 180.0 || c.y.abs() > 90.0) {
            return Err(format!("coordinate ({}, {}) outside lon/lat range", c.x, c.y));
        }
    }
    if ring_self_intersects(ring) {
        return Err("self-intersecting ring".into());
    }
    Ok(())
}

/// Non-adjacent edges of a closed ring may not meet at all; adjacent edges
/// may only share their common vertex.
fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let edges: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = edges.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return true,
                Some(LineIntersection::SinglePoint { .. }) if !adjacent => return true,
                Some(LineIntersection::SinglePoint { .. }) => {}
            }
        }
    }
    false
}

/// `hash:<16 hex>` over the exact coordinate sequence.
pub fn geometry_hash(geometry: &MultiPolygon<f64>) -> String {
    let mut hasher = Sha256::new();
    for polygon in geometry {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for c in ring.coords() {
                hasher.update(c.x.to_le_bytes());
                hasher.update(c.y.to_le_bytes());
            }
            hasher.update(b"|");
        }
        hasher.update(b"#");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("hash:{}", &digest[..16])
}
