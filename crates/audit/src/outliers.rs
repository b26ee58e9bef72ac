//! Duplicate-identifier and business-range detection, generic over any
//! [`Tabular`] dataset.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{RangeTable, ValueRange};
use crate::model::{finalize_anomalies, AnomalyKind, AnomalyRecord, Table, Tabular, Warning};

#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub anomalies: Vec<AnomalyRecord>,
    pub warnings: Vec<Warning>,
}

/// Duplicate identifiers plus out-of-range values, deduplicated and sorted.
pub fn detect_anomalies<R: Tabular>(table: &Table<R>, ranges: &RangeTable) -> DetectionOutput {
    let mut anomalies = detect_duplicates(table);
    let (range_anomalies, warnings) = detect_out_of_range(table, ranges);
    anomalies.extend(range_anomalies);
    let anomalies = finalize_anomalies(anomalies);

    debug!(
        dataset = %table.name,
        rows = table.len(),
        anomalies = anomalies.len(),
        "outlier detection done"
    );
    DetectionOutput { anomalies, warnings }
}

/// Every row whose identifier occurs more than once. All occurrences are
/// flagged, blank identifiers are ignored.
pub fn detect_duplicates<R: Tabular>(table: &Table<R>) -> Vec<AnomalyRecord> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in &table.rows {
        let id = row.id().trim();
        if !id.is_empty() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let id = row.id().trim();
            let n = *counts.get(id)?;
            (n > 1).then(|| {
                AnomalyRecord::new(id, table.id_column.as_str(), AnomalyKind::DuplicateIdentifier, id)
                    .at_row(i)
                    .with_detail(format!("{n} occurrences"))
            })
        })
        .collect()
}

/// Every present numeric value outside its inclusive range. Configured
/// columns the table does not carry produce a warning and are skipped.
pub fn detect_out_of_range<R: Tabular>(
    table: &Table<R>,
    ranges: &RangeTable,
) -> (Vec<AnomalyRecord>, Vec<Warning>) {
    let mut anomalies = Vec::new();
    let mut warnings = Vec::new();

    for (column, range) in ranges {
        if !table.has_column(column) {
            warn!(dataset = %table.name, column = %column, "range column missing, check skipped");
            warnings.push(Warning::new(
                "outliers",
                format!("{}: column '{column}' not found, range check skipped", table.name),
            ));
            continue;
        }

        for (i, row) in table.rows.iter().enumerate() {
            let Some(value) = row.numeric(column) else {
                continue;
            };
            if let Some(detail) = violated_bound(value, range) {
                anomalies.push(
                    AnomalyRecord::new(row.id().trim(), column.as_str(), AnomalyKind::ValueOutOfRange, value)
                        .at_row(i)
                        .with_detail(detail),
                );
            }
        }
    }

    (anomalies, warnings)
}

fn violated_bound(value: f64, range: &ValueRange) -> Option<String> {
    if value < range.min {
        Some(format!("below min {} (range {range})", range.min))
    } else if value > range.max {
        Some(format!("above max {} (range {range})", range.max))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_producer_ranges;
    use crate::model::{columns, PlantationRecord, ProducerRecord};

    fn producer(id: &str, birth_year: Option<f64>, household: Option<f64>) -> ProducerRecord {
        let mut p = ProducerRecord::new(id);
        p.birth_year = birth_year;
        p.household_size = household;
        p
    }

    #[test]
    fn duplicate_identifier_flags_every_occurrence() {
        let table = Table::producers(vec![
            producer("C042", Some(1970.0), Some(5.0)),
            producer("C001", Some(1970.0), Some(5.0)),
            producer("C042", Some(1980.0), Some(6.0)),
        ]);
        let out = detect_anomalies(&table, &RangeTable::new());
        assert_eq!(out.anomalies.len(), 2);
        assert!(out.anomalies.iter().all(|a| a.kind == AnomalyKind::DuplicateIdentifier));
        assert!(out.anomalies.iter().all(|a| a.entity_id == "C042"));
        assert_eq!(out.anomalies[0].row, Some(0));
        assert_eq!(out.anomalies[1].row, Some(2));
        assert_eq!(out.anomalies[0].column, columns::PRODUCER_ID);
    }

    #[test]
    fn blank_ids_are_not_duplicates() {
        let table = Table::producers(vec![producer("", None, None), producer("  ", None, None)]);
        assert!(detect_duplicates(&table).is_empty());
    }

    #[test]
    fn range_violations_name_the_bound() {
        let table = Table::producers(vec![
            producer("C001", Some(1925.0), Some(5.0)),
            producer("C002", Some(1970.0), Some(25.0)),
            producer("C003", Some(2005.0), Some(1.0)),
        ]);
        let out = detect_anomalies(&table, &default_producer_ranges());
        assert_eq!(out.anomalies.len(), 2);
        let low = &out.anomalies[0];
        assert_eq!(low.entity_id, "C001");
        assert_eq!(low.column, columns::BIRTH_YEAR);
        assert!(low.detail.starts_with("below min 1930"));
        let high = &out.anomalies[1];
        assert_eq!(high.entity_id, "C002");
        assert_eq!(high.column, columns::HOUSEHOLD_SIZE);
        assert!(high.detail.starts_with("above max 20"));
    }

    #[test]
    fn absent_values_are_not_anomalies() {
        let table = Table::producers(vec![producer("C001", None, None)]);
        let out = detect_anomalies(&table, &default_producer_ranges());
        assert!(out.anomalies.is_empty());
    }

    #[test]
    fn missing_column_warns_and_skips() {
        let mut p = PlantationRecord::new("C001-P001");
        p.area_ha = Some(500.0);
        let table = Table::new(
            "plantations",
            columns::PLANTATION_ID,
            [columns::PLANTATION_ID, columns::PRODUCER_ID],
            vec![p],
        );
        let mut ranges = RangeTable::new();
        ranges.insert(columns::PLANTATION_AREA_HA.into(), ValueRange::new(0.1, 50.0));
        let out = detect_anomalies(&table, &ranges);
        assert!(out.anomalies.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("superficie_cacao_ha"));
    }

    #[test]
    fn only_configured_columns_are_reported() {
        let mut p = PlantationRecord::new("C001-P001");
        p.area_ha = Some(500.0);
        p.yield_kg_ha = Some(99_999.0);
        let table = Table::plantations(vec![p]);
        let mut ranges = RangeTable::new();
        ranges.insert(columns::PLANTATION_AREA_HA.into(), ValueRange::new(0.1, 50.0));
        let out = detect_anomalies(&table, &ranges);
        assert_eq!(out.anomalies.len(), 1);
        assert!(out.anomalies.iter().all(|a| ranges.contains_key(&a.column)));
    }
}
