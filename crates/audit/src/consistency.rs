//! Cross-dataset checks between producers, plantations and parcels.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::model::{
    columns, finalize_anomalies, AnomalyKind, AnomalyRecord, PlantationRecord, ProducerRecord, Table,
};
use crate::parcels::PreparedParcel;
use crate::tolerance::{as_percent, base_id, exceeds, normalize_id, relative_deviation};

const UNKNOWN: &str = "unknown";

// ---------------------------------------------------------------------------
// Referential + aggregate checks
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PlantationTotals<'a> {
    count: usize,
    area_ha: f64,
    estimate_kg: f64,
    /// First non-null cooperative, input order.
    cooperative: Option<&'a str>,
}

/// Referential breaks, aggregate surface / yield deviations and cooperative
/// mismatches between the producer and plantation tables.
pub fn check_consistency(
    producers: &Table<ProducerRecord>,
    plantations: &Table<PlantationRecord>,
    threshold: f64,
) -> Vec<AnomalyRecord> {
    let producer_ids: HashSet<String> =
        producers.rows.iter().filter_map(|p| normalize_id(&p.id)).collect();

    let mut totals: HashMap<String, PlantationTotals<'_>> = HashMap::new();
    let mut records = Vec::new();

    for (i, plantation) in plantations.rows.iter().enumerate() {
        let owner = plantation.producer_id.as_deref().and_then(normalize_id);
        match owner {
            Some(ref owner) if producer_ids.contains(owner) => {}
            _ => records.push(
                AnomalyRecord::new(
                    plantation.id.trim(),
                    columns::PRODUCER_ID,
                    AnomalyKind::PlantationWithoutProducer,
                    owner.clone().unwrap_or_default(),
                )
                .at_row(i)
                .with_detail("no producer with this code"),
            ),
        }

        let Some(owner) = owner else {
            continue;
        };
        let entry = totals.entry(owner).or_default();
        entry.count += 1;
        entry.area_ha += plantation.area_ha.unwrap_or(0.0);
        entry.estimate_kg += plantation.estimated_kg.unwrap_or(0.0);
        if entry.cooperative.is_none() {
            entry.cooperative = plantation.cooperative.as_deref();
        }
    }

    for (i, producer) in producers.rows.iter().enumerate() {
        let Some(id) = normalize_id(&producer.id) else {
            continue;
        };
        let Some(agg) = totals.get(&id).filter(|t| t.count > 0) else {
            records.push(
                AnomalyRecord::new(id.as_str(), columns::PRODUCER_ID, AnomalyKind::ProducerWithoutPlantation, id.as_str())
                    .at_row(i)
                    .with_detail("no plantation references this producer"),
            );
            continue;
        };

        if let Some(dev) = relative_deviation(agg.area_ha, producer.cacao_area_ha) {
            if exceeds(dev, threshold) {
                records.push(
                    AnomalyRecord::new(
                        id.as_str(),
                        columns::CACAO_AREA_HA,
                        AnomalyKind::SurfaceDeviationOverThreshold,
                        as_percent(dev),
                    )
                    .at_row(i)
                    .with_detail(format!(
                        "plantations sum to {:.2} ha, declared {} ha",
                        agg.area_ha,
                        producer.cacao_area_ha.unwrap_or_default()
                    )),
                );
            }
        }

        if let Some(dev) = relative_deviation(agg.estimate_kg, producer.estimated_yield_kg) {
            if exceeds(dev, threshold) {
                records.push(
                    AnomalyRecord::new(
                        id.as_str(),
                        columns::TOTAL_ESTIMATE_KG,
                        AnomalyKind::YieldDeviationOverThreshold,
                        as_percent(dev),
                    )
                    .at_row(i)
                    .with_detail(format!(
                        "plantations sum to {:.2} kg, declared {} kg",
                        agg.estimate_kg,
                        producer.estimated_yield_kg.unwrap_or_default()
                    )),
                );
            }
        }

        if let Some(plantation_coop) = agg.cooperative {
            if producer.cooperative.as_deref() != Some(plantation_coop) {
                let producer_coop = producer.cooperative.as_deref().unwrap_or(UNKNOWN);
                records.push(
                    AnomalyRecord::new(
                        id.as_str(),
                        columns::COOPERATIVE,
                        AnomalyKind::CooperativeMismatch,
                        format!("{producer_coop} ≠ {plantation_coop}"),
                    )
                    .at_row(i),
                );
            }
        }
    }

    let records = finalize_anomalies(records);
    debug!(anomalies = records.len(), "consistency checks done");
    records
}

// ---------------------------------------------------------------------------
// Id coverage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedParcel {
    pub id: String,
    pub owner_id: Option<String>,
    pub declared_area: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub key: String,
    pub count: usize,
}

/// Unmatched plantation whose base id matches the base id of a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseIdMatch {
    pub plantation_id: String,
    pub base_id: String,
    pub parcel_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdCoverage {
    pub plantation_ids: usize,
    pub parcel_ids: usize,
    pub matched: usize,
    pub plantations_without_parcel: Vec<String>,
    pub parcels_without_plantation: Vec<UnmatchedParcel>,
    pub unmatched_by_cooperative: Vec<GroupCount>,
    pub unmatched_by_producer: Vec<GroupCount>,
    pub base_id_matches: Vec<BaseIdMatch>,
}

/// Set comparison of plantation codes against parcel identifiers.
pub fn id_coverage(plantations: &Table<PlantationRecord>, parcels: &[PreparedParcel]) -> IdCoverage {
    let plantation_set: BTreeSet<String> =
        plantations.rows.iter().filter_map(|p| normalize_id(&p.id)).collect();
    let parcel_set: BTreeSet<String> = parcels.iter().filter_map(|p| normalize_id(&p.id)).collect();

    let plantations_without_parcel: Vec<String> =
        plantation_set.difference(&parcel_set).cloned().collect();
    let missing: HashSet<&str> = plantations_without_parcel.iter().map(String::as_str).collect();

    let mut parcels_without_plantation: Vec<UnmatchedParcel> = parcels
        .iter()
        .filter_map(|p| {
            let id = normalize_id(&p.id)?;
            (!plantation_set.contains(&id)).then(|| UnmatchedParcel {
                id,
                owner_id: p.owner_id.clone(),
                declared_area: p.declared_area,
            })
        })
        .collect();
    parcels_without_plantation.sort_by(|a, b| a.id.cmp(&b.id));

    let unmatched_rows: Vec<&PlantationRecord> = plantations
        .rows
        .iter()
        .filter(|p| missing.contains(p.id.trim()))
        .collect();
    let unmatched_by_cooperative = count_by(unmatched_rows.iter().map(|p| p.cooperative.as_deref()));
    let unmatched_by_producer =
        count_by(unmatched_rows.iter().map(|p| p.producer_id.as_deref().map(str::trim)));

    // first parcel per base id
    let mut parcel_bases: BTreeMap<&str, &str> = BTreeMap::new();
    for id in parcels.iter().map(|p| p.id.trim()).filter(|id| !id.is_empty()) {
        parcel_bases.entry(base_id(id)).or_insert(id);
    }
    let base_id_matches = plantations_without_parcel
        .iter()
        .filter_map(|plantation_id| {
            let base = base_id(plantation_id);
            parcel_bases.get(base).map(|parcel_id| BaseIdMatch {
                plantation_id: plantation_id.clone(),
                base_id: base.to_string(),
                parcel_id: parcel_id.to_string(),
            })
        })
        .collect();

    let coverage = IdCoverage {
        plantation_ids: plantation_set.len(),
        parcel_ids: parcel_set.len(),
        matched: plantation_set.intersection(&parcel_set).count(),
        plantations_without_parcel,
        parcels_without_plantation,
        unmatched_by_cooperative,
        unmatched_by_producer,
        base_id_matches,
    };
    debug!(
        matched = coverage.matched,
        plantations_only = coverage.plantations_without_parcel.len(),
        parcels_only = coverage.parcels_without_plantation.len(),
        "id coverage computed"
    );
    coverage
}

/// Occurrence counts, most frequent first. Absent keys count under "NA".
fn count_by<'a>(keys: impl Iterator<Item = Option<&'a str>>) -> Vec<GroupCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        let key = key.map(str::trim).filter(|k| !k.is_empty()).unwrap_or("NA");
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    let mut out: Vec<GroupCount> =
        counts.into_iter().map(|(key, count)| GroupCount { key, count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    out
}
