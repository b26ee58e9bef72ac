//! Pairwise overlap between projected parcels.
//!
//! A pair is reported when the intersection covers more than `threshold` of
//! either parcel: `max(inter / area_i, inter / area_j) > threshold`. The
//! `indexed` strategy only evaluates pairs whose bounding boxes intersect; a
//! pair with disjoint boxes has no intersection area, so both strategies
//! return the same records.

use geo::{Area, BooleanOps, MultiPolygon};
use rayon::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{OverlapConfig, OverlapStrategy};
use crate::parcels::PreparedParcel;
use crate::tolerance::round_to;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapRecord {
    pub id_1: String,
    pub id_2: String,
    /// Larger of the two covered fractions, two decimals.
    pub overlap_ratio: f64,
    pub intersection_area_m2: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OverlapOutput {
    pub strategy: OverlapStrategy,
    pub threshold: f64,
    /// EPSG code of the coordinates in `geometries`.
    pub epsg: u32,
    pub parcels: usize,
    pub candidate_pairs: usize,
    pub records: Vec<OverlapRecord>,
    /// Intersection geometry per record, same order. Empty unless kept.
    #[serde(skip)]
    pub geometries: Vec<MultiPolygon<f64>>,
}

struct Hit {
    i: usize,
    j: usize,
    record: OverlapRecord,
    geometry: MultiPolygon<f64>,
}

/// Find every parcel pair overlapping above `threshold`.
pub fn detect_overlaps(
    parcels: &[PreparedParcel],
    config: &OverlapConfig,
    threshold: f64,
    epsg: u32,
) -> OverlapOutput {
    let pairs = candidate_pairs(parcels, config.strategy);
    debug!(strategy = %config.strategy, candidates = pairs.len(), "overlap candidates");

    let evaluate = |&(i, j): &(usize, usize)| evaluate_pair(parcels, i, j, threshold);
    let mut hits: Vec<Hit> = if config.parallel {
        pairs.par_iter().filter_map(evaluate).collect()
    } else {
        pairs.iter().filter_map(evaluate).collect()
    };
    hits.sort_by(|a, b| {
        a.record
            .id_1
            .cmp(&b.record.id_1)
            .then_with(|| a.record.id_2.cmp(&b.record.id_2))
            .then_with(|| (a.i, a.j).cmp(&(b.i, b.j)))
    });

    let mut records = Vec::with_capacity(hits.len());
    let mut geometries = Vec::new();
    for hit in hits {
        records.push(hit.record);
        if config.keep_geometries {
            geometries.push(hit.geometry);
        }
    }

    info!(parcels = parcels.len(), overlaps = records.len(), "overlap detection done");
    OverlapOutput {
        strategy: config.strategy,
        threshold,
        epsg,
        parcels: parcels.len(),
        candidate_pairs: pairs.len(),
        records,
        geometries,
    }
}

/// Index pairs `(i, j)` with `i < j`, sorted.
pub fn candidate_pairs(parcels: &[PreparedParcel], strategy: OverlapStrategy) -> Vec<(usize, usize)> {
    let n = parcels.len();
    match strategy {
        OverlapStrategy::Exhaustive => (0..n).flat_map(|i| (i + 1..n).map(move |j| (i, j))).collect(),
        OverlapStrategy::Indexed => {
            let boxes: Vec<GeomWithData<Rectangle<[f64; 2]>, usize>> = parcels
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let (min, max) = (p.bbox.min(), p.bbox.max());
                    GeomWithData::new(Rectangle::from_corners([min.x, min.y], [max.x, max.y]), i)
                })
                .collect();
            let tree = RTree::bulk_load(boxes);
            let mut pairs: Vec<(usize, usize)> = tree
                .intersection_candidates_with_other_tree(&tree)
                .filter(|(a, b)| a.data < b.data)
                .map(|(a, b)| (a.data, b.data))
                .collect();
            pairs.sort_unstable();
            pairs.dedup();
            pairs
        }
    }
}

fn evaluate_pair(parcels: &[PreparedParcel], i: usize, j: usize, threshold: f64) -> Option<Hit> {
    // lower id first, so the intersection is computed the same way whatever the input order
    let (a, b) = if parcels[j].id < parcels[i].id {
        (&parcels[j], &parcels[i])
    } else {
        (&parcels[i], &parcels[j])
    };
    if !usable_area(a.area_m2) || !usable_area(b.area_m2) {
        return None;
    }

    let geometry = a.geometry.intersection(&b.geometry);
    if geometry.0.is_empty() {
        return None;
    }
    let inter = geometry.unsigned_area();
    if !usable_area(inter) {
        return None;
    }

    let ratio = (inter / a.area_m2).max(inter / b.area_m2).min(1.0);
    if ratio <= threshold {
        return None;
    }

    Some(Hit {
        i,
        j,
        record: OverlapRecord {
            id_1: a.id.clone(),
            id_2: b.id.clone(),
            overlap_ratio: round_to(ratio, 2),
            intersection_area_m2: round_to(inter, 2),
        },
        geometry,
    })
}

fn usable_area(area: f64) -> bool {
    area.is_finite() && area > 0.0
}
