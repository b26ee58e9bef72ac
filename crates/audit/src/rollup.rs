//! Producer and cooperative rollups over the surface comparison.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{PlantationRecord, Table};
use crate::surfaces::SurfaceComparison;
use crate::tolerance::{finite_or_zero, normalize_id, round_to, safe_rate};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerRollup {
    /// `None` groups plantations without a producer code.
    pub producer_id: Option<String>,
    pub cooperative: Option<String>,
    pub plantations: usize,
    pub joined: usize,
    pub anomalous: usize,
    /// Percent of plantations joined to a parcel.
    pub coverage_rate: f64,
    /// Percent of joined plantations with an area anomaly.
    pub anomaly_rate: f64,
    pub declared_area_ha: f64,
    pub computed_area_ha: f64,
    /// Declared minus computed.
    pub area_gap_ha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooperativeRollup {
    pub cooperative: Option<String>,
    pub producers: usize,
    pub mean_coverage_rate: f64,
    pub mean_anomaly_rate: f64,
    pub mean_area_gap_ha: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Rollups {
    pub producers: Vec<ProducerRollup>,
    pub cooperatives: Vec<CooperativeRollup>,
}

#[derive(Default)]
struct ProducerAcc {
    cooperative: Option<String>,
    plantations: usize,
    joined: usize,
    anomalous: usize,
    declared: f64,
    computed: f64,
}

pub fn build_rollups(plantations: &Table<PlantationRecord>, surfaces: &SurfaceComparison) -> Rollups {
    let mut by_producer: BTreeMap<Option<String>, ProducerAcc> = BTreeMap::new();

    for plantation in &plantations.rows {
        let key = plantation.producer_id.as_deref().and_then(normalize_id);
        let acc = by_producer.entry(key).or_default();
        acc.plantations += 1;
        acc.declared += plantation.area_ha.unwrap_or(0.0);
        if acc.cooperative.is_none() {
            acc.cooperative = plantation.cooperative.clone();
        }
    }

    for row in &surfaces.rows {
        let acc = by_producer.entry(row.producer_id.clone()).or_default();
        acc.joined += 1;
        acc.computed += row.computed_area_ha;
        if row.is_anomaly {
            acc.anomalous += 1;
        }
    }

    let producers: Vec<ProducerRollup> = by_producer
        .into_iter()
        .map(|(producer_id, acc)| ProducerRollup {
            producer_id,
            cooperative: acc.cooperative,
            plantations: acc.plantations,
            joined: acc.joined,
            anomalous: acc.anomalous,
            coverage_rate: percent(acc.joined, acc.plantations),
            anomaly_rate: percent(acc.anomalous, acc.joined),
            declared_area_ha: round_to(acc.declared, 2),
            computed_area_ha: round_to(acc.computed, 2),
            area_gap_ha: round_to(acc.declared - acc.computed, 2),
        })
        .collect();

    let cooperatives = cooperative_rollups(&producers);
    Rollups { producers, cooperatives }
}

fn cooperative_rollups(producers: &[ProducerRollup]) -> Vec<CooperativeRollup> {
    let mut groups: BTreeMap<Option<&str>, Vec<&ProducerRollup>> = BTreeMap::new();
    for p in producers {
        groups.entry(p.cooperative.as_deref()).or_default().push(p);
    }

    let mut out: Vec<CooperativeRollup> = groups
        .into_iter()
        .map(|(cooperative, members)| CooperativeRollup {
            cooperative: cooperative.map(String::from),
            producers: members.len(),
            mean_coverage_rate: mean(members.iter().map(|p| p.coverage_rate)),
            mean_anomaly_rate: mean(members.iter().map(|p| p.anomaly_rate)),
            mean_area_gap_ha: mean(members.iter().map(|p| p.area_gap_ha)),
        })
        .collect();
    out.sort_by(|a, b| {
        b.mean_coverage_rate
            .partial_cmp(&a.mean_coverage_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cooperative.cmp(&b.cooperative))
    });
    out
}

fn percent(part: usize, whole: usize) -> f64 {
    round_to(safe_rate(part as f64, whole as f64) * 100.0, 2)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    round_to(finite_or_zero(safe_rate(sum, n as f64)), 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surfaces::ReconciliationRecord;

    fn plantation(id: &str, owner: Option<&str>, area: f64, coop: Option<&str>) -> PlantationRecord {
        let mut p = PlantationRecord::new(id);
        p.producer_id = owner.map(String::from);
        p.area_ha = Some(area);
        p.cooperative = coop.map(String::from);
        p
    }

    fn joined(id: &str, owner: &str, computed: f64, is_anomaly: bool) -> ReconciliationRecord {
        ReconciliationRecord {
            plantation_id: id.into(),
            producer_id: Some(owner.into()),
            cooperative: None,
            declared_area_ha: None,
            computed_area_ha: computed,
            relative_deviation: None,
            is_anomaly,
        }
    }

    #[test]
    fn producer_rates_and_gap() {
        let plantations = Table::plantations(vec![
            plantation("C001-P001", Some("C001"), 2.0, Some("COOP A")),
            plantation("C001-P002", Some("C001"), 3.0, Some("COOP A")),
            plantation("C001-P003", Some("C001"), 1.0, Some("COOP A")),
            plantation("C001-P004", Some("C001"), 1.0, Some("COOP A")),
        ]);
        let surfaces = SurfaceComparison {
            threshold: 0.10,
            rows: vec![
                joined("C001-P001", "C001", 2.5, true),
                joined("C001-P002", "C001", 3.0, false),
            ],
            anomalies: vec![],
        };
        let rollups = build_rollups(&plantations, &surfaces);
        assert_eq!(rollups.producers.len(), 1);
        let p = &rollups.producers[0];
        assert_eq!(p.plantations, 4);
        assert_eq!(p.joined, 2);
        assert_eq!(p.anomalous, 1);
        assert_eq!(p.coverage_rate, 50.0);
        assert_eq!(p.anomaly_rate, 50.0);
        assert_eq!(p.declared_area_ha, 7.0);
        assert_eq!(p.computed_area_ha, 5.5);
        assert_eq!(p.area_gap_ha, 1.5);
    }

    #[test]
    fn zero_joined_yields_zero_rates() {
        let plantations = Table::plantations(vec![plantation("C001-P001", Some("C001"), 2.0, None)]);
        let rollups = build_rollups(&plantations, &SurfaceComparison::default());
        let p = &rollups.producers[0];
        assert_eq!(p.joined, 0);
        assert_eq!(p.coverage_rate, 0.0);
        assert_eq!(p.anomaly_rate, 0.0);
        assert!(p.anomaly_rate.is_finite());
    }

    #[test]
    fn unknown_producer_and_cooperative_are_groups() {
        let plantations = Table::plantations(vec![
            plantation("X-P001", None, 1.0, None),
            plantation("C001-P001", Some("C001"), 1.0, Some("COOP A")),
        ]);
        let rollups = build_rollups(&plantations, &SurfaceComparison::default());
        assert_eq!(rollups.producers[0].producer_id, None);
        assert_eq!(rollups.producers[1].producer_id.as_deref(), Some("C001"));
        assert_eq!(rollups.cooperatives.len(), 2);
        assert!(rollups.cooperatives.iter().any(|c| c.cooperative.is_none()));
    }

    #[test]
    fn cooperatives_sorted_by_mean_coverage() {
        let plantations = Table::plantations(vec![
            plantation("C001-P001", Some("C001"), 1.0, Some("COOP A")),
            plantation("C002-P001", Some("C002"), 1.0, Some("COOP B")),
            plantation("C003-P001", Some("C003"), 1.0, Some("COOP B")),
        ]);
        let surfaces = SurfaceComparison {
            threshold: 0.10,
            rows: vec![joined("C002-P001", "C002", 1.0, false)],
            anomalies: vec![],
        };
        let rollups = build_rollups(&plantations, &surfaces);
        let coops: Vec<(&str, f64)> = rollups
            .cooperatives
            .iter()
            .map(|c| (c.cooperative.as_deref().unwrap_or("-"), c.mean_coverage_rate))
            .collect();
        assert_eq!(coops, vec![("COOP B", 50.0), ("COOP A", 0.0)]);
        assert_eq!(rollups.cooperatives[0].producers, 2);
    }
}
