//! CSV and GeoJSON sources into typed tables. Input is passed as strings;
//! reading files is the caller's job.

use std::collections::BTreeMap;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geojson::{Feature, GeoJson, Value};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::crs::Crs;
use crate::error::AuditError;
use crate::model::{
    columns, AuditInput, ParcelCollection, ParcelGeometry, PlantationRecord, ProducerRecord, Table, Warning,
};
use crate::tolerance::{parse_number, parse_text};

/// One CSV source: trimmed headers and raw rows.
struct CsvSheet {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl CsvSheet {
    fn parse(dataset: &str, data: &str) -> Result<Self, AuditError> {
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(sniff_delimiter(data))
            .from_reader(data.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AuditError::Csv { dataset: dataset.into(), message: e.to_string() })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| AuditError::Csv { dataset: dataset.into(), message: e.to_string() })?;
            rows.push(record);
        }
        Ok(Self { headers, rows })
    }

    fn index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    fn require(&self, dataset: &str, column: &str) -> Result<usize, AuditError> {
        self.index(column).ok_or_else(|| AuditError::MissingColumn {
            dataset: dataset.into(),
            column: column.into(),
        })
    }

    /// Cells of one row keyed by header, standard columns excluded.
    fn attributes(&self, record: &csv::StringRecord, standard: &[&str]) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !standard.contains(&h.as_str()))
            .filter_map(|(i, h)| record.get(i).map(|v| (h.clone(), v.to_string())))
            .collect()
    }
}

/// `;` when the header line has semicolons but no commas, `,` otherwise.
fn sniff_delimiter(data: &str) -> u8 {
    let header = data.lines().next().unwrap_or("");
    if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    }
}

fn cell<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).unwrap_or("")
}

fn number(record: &csv::StringRecord, idx: Option<usize>) -> Option<f64> {
    parse_number(cell(record, idx))
}

fn text(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    parse_text(cell(record, idx))
}

fn blank_id_warning(dataset: &str, blank: usize) -> Option<Warning> {
    (blank > 0).then(|| {
        warn!(dataset, blank, "rows without identifier");
        Warning::new("load", format!("{dataset}: {blank} row(s) without identifier"))
    })
}

// ---------------------------------------------------------------------------
// Producers / Plantations
// ---------------------------------------------------------------------------

pub fn load_producers_csv(data: &str) -> Result<(Table<ProducerRecord>, Vec<Warning>), AuditError> {
    const DATASET: &str = "producers";
    let sheet = CsvSheet::parse(DATASET, data)?;
    let id_idx = sheet.require(DATASET, columns::PRODUCER_ID)?;
    let birth_idx = sheet.index(columns::BIRTH_YEAR);
    let farm_idx = sheet.index(columns::FARM_AREA_HA);
    let cacao_idx = sheet.index(columns::CACAO_AREA_HA);
    let count_idx = sheet.index(columns::PLANTATION_COUNT);
    let estimate_idx = sheet.index(columns::TOTAL_ESTIMATE_KG);
    let household_idx = sheet.index(columns::HOUSEHOLD_SIZE);
    let coop_idx = sheet.index(columns::COOPERATIVE);

    let mut blank = 0;
    let rows: Vec<ProducerRecord> = sheet
        .rows
        .iter()
        .map(|record| {
            let id = cell(record, Some(id_idx)).trim().to_string();
            if id.is_empty() {
                blank += 1;
            }
            ProducerRecord {
                id,
                birth_year: number(record, birth_idx),
                farm_area_ha: number(record, farm_idx),
                cacao_area_ha: number(record, cacao_idx),
                plantation_count: number(record, count_idx),
                estimated_yield_kg: number(record, estimate_idx),
                household_size: number(record, household_idx),
                cooperative: text(record, coop_idx),
                attributes: sheet.attributes(record, &ProducerRecord::COLUMNS),
            }
        })
        .collect();

    debug!(rows = rows.len(), columns = sheet.headers.len(), "producers loaded");
    let warnings = blank_id_warning(DATASET, blank).into_iter().collect();
    Ok((Table::new(DATASET, columns::PRODUCER_ID, sheet.headers, rows), warnings))
}

pub fn load_plantations_csv(data: &str) -> Result<(Table<PlantationRecord>, Vec<Warning>), AuditError> {
    const DATASET: &str = "plantations";
    let sheet = CsvSheet::parse(DATASET, data)?;
    let id_idx = sheet.require(DATASET, columns::PLANTATION_ID)?;
    let owner_idx = sheet.index(columns::PRODUCER_ID);
    let area_idx = sheet.index(columns::PLANTATION_AREA_HA);
    let yield_idx = sheet.index(columns::YIELD_KG_HA);
    let estimate_idx = sheet.index(columns::ESTIMATE_KG);
    let coop_idx = sheet.index(columns::COOPERATIVE);
    let lat_idx = sheet.index(columns::LATITUDE);
    let lon_idx = sheet.index(columns::LONGITUDE);

    let mut warnings = Vec::new();
    if owner_idx.is_none() {
        warn!(column = columns::PRODUCER_ID, "plantations carry no producer column");
        warnings.push(Warning::new(
            "load",
            format!("plantations: column '{}' not found, no plantation has a producer", columns::PRODUCER_ID),
        ));
    }

    let mut blank = 0;
    let rows: Vec<PlantationRecord> = sheet
        .rows
        .iter()
        .map(|record| {
            let id = cell(record, Some(id_idx)).trim().to_string();
            if id.is_empty() {
                blank += 1;
            }
            PlantationRecord {
                id,
                producer_id: text(record, owner_idx),
                area_ha: number(record, area_idx),
                yield_kg_ha: number(record, yield_idx),
                estimated_kg: number(record, estimate_idx),
                cooperative: text(record, coop_idx),
                latitude: number(record, lat_idx),
                longitude: number(record, lon_idx),
                attributes: sheet.attributes(record, &PlantationRecord::COLUMNS),
            }
        })
        .collect();

    debug!(rows = rows.len(), columns = sheet.headers.len(), "plantations loaded");
    warnings.extend(blank_id_warning(DATASET, blank));
    Ok((Table::new(DATASET, columns::PLANTATION_ID, sheet.headers, rows), warnings))
}

// ---------------------------------------------------------------------------
// Parcels
// ---------------------------------------------------------------------------

/// Parse a GeoJSON FeatureCollection of parcel polygons. A document without
/// a `crs` member is taken as WGS84 longitude/latitude, with a warning.
pub fn load_parcels_geojson(data: &str) -> Result<(ParcelCollection, Vec<Warning>), AuditError> {
    let geojson: GeoJson = data.parse().map_err(|e: geojson::Error| AuditError::GeoJson(e.to_string()))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(AuditError::GeoJson("expected a FeatureCollection".into()));
    };

    let mut warnings = Vec::new();
    let crs = match declared_crs(collection.foreign_members.as_ref()) {
        Some(name) => Crs::parse(&name)?,
        None => {
            warn!("parcel collection has no CRS, assuming EPSG:4326");
            warnings.push(Warning::new("load", "parcels: no CRS declared, EPSG:4326 assumed"));
            Crs::Geographic
        }
    };

    let parcels: Vec<ParcelGeometry> = collection.features.iter().map(parcel_from_feature).collect();
    if parcels.iter().all(|p| p.id.is_empty()) && !parcels.is_empty() {
        warnings.push(Warning::new(
            "load",
            format!("parcels: no feature carries '{}'", columns::PARCEL_ID),
        ));
    }

    debug!(features = parcels.len(), crs = %crs, "parcels loaded");
    Ok((ParcelCollection { crs, parcels }, warnings))
}

/// Name of a legacy `{"crs": {"type": "name", "properties": {"name": ...}}}` member.
fn declared_crs(foreign: Option<&serde_json::Map<String, JsonValue>>) -> Option<String> {
    foreign?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(String::from)
}

fn parcel_from_feature(feature: &Feature) -> ParcelGeometry {
    let property_text = |name: &str| -> Option<String> {
        match feature.property(name)? {
            JsonValue::String(s) => parse_text(s),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let declared_area = match feature.property(columns::PARCEL_DECLARED_AREA) {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => parse_number(s),
        _ => None,
    };

    let (geometry, defect) = match feature.geometry.as_ref().map(|g| &g.value) {
        None => (MultiPolygon(vec![]), None),
        Some(Value::Polygon(rings)) => (MultiPolygon(vec![polygon_from_rings(rings)]), None),
        Some(Value::MultiPolygon(polygons)) => {
            (MultiPolygon(polygons.iter().map(|rings| polygon_from_rings(rings)).collect()), None)
        }
        Some(other) => (MultiPolygon(vec![]), Some(format!("unsupported geometry type {}", type_name(other)))),
    };

    ParcelGeometry {
        id: property_text(columns::PARCEL_ID).unwrap_or_default(),
        owner_id: property_text(columns::PARCEL_OWNER),
        declared_area,
        geometry,
        defect,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Polygon<f64> {
    let mut rings = rings.iter().map(|ring| {
        LineString::from(
            ring.iter()
                .map(|p| Coord {
                    x: p.first().copied().unwrap_or(f64::NAN),
                    y: p.get(1).copied().unwrap_or(f64::NAN),
                })
                .collect::<Vec<_>>(),
        )
    });
    let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
    Polygon::new(exterior, rings.collect())
}

// ---------------------------------------------------------------------------
// All sources
// ---------------------------------------------------------------------------

/// Load the three sources of a run.
pub fn load_input(producers_csv: &str, plantations_csv: &str, parcels_geojson: &str) -> Result<AuditInput, AuditError> {
    let (producers, mut warnings) = load_producers_csv(producers_csv)?;
    let (plantations, plantation_warnings) = load_plantations_csv(plantations_csv)?;
    let (parcels, parcel_warnings) = load_parcels_geojson(parcels_geojson)?;
    warnings.extend(plantation_warnings);
    warnings.extend(parcel_warnings);
    Ok(AuditInput { producers, plantations, parcels, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tabular;

    const PRODUCERS: &str = "\
code_producteur,annee_naissance,superficie_totale_cacao_ha,estimation_totale_kg,taille_menage,cooperative,village
C001,1970,10,\"4,5\",6,COOP A,Daloa
C002,Non disponible,abc,800,,COOP B,Soubre
";

    #[test]
    fn producers_parse_with_lenient_numbers() {
        let (table, warnings) = load_producers_csv(PRODUCERS).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(table.len(), 2);
        assert!(table.has_column("village"));
        assert!(!table.has_column(columns::FARM_AREA_HA));

        let c001 = &table.rows[0];
        assert_eq!(c001.id, "C001");
        assert_eq!(c001.birth_year, Some(1970.0));
        assert_eq!(c001.estimated_yield_kg, Some(4.5));
        assert_eq!(c001.cooperative.as_deref(), Some("COOP A"));
        assert_eq!(c001.attributes.get("village").map(String::as_str), Some("Daloa"));
        assert!(!c001.attributes.contains_key(columns::PRODUCER_ID));

        let c002 = &table.rows[1];
        assert_eq!(c002.birth_year, None);
        assert_eq!(c002.cacao_area_ha, None);
        assert_eq!(c002.household_size, None);
        assert_eq!(c002.numeric(columns::TOTAL_ESTIMATE_KG), Some(800.0));
    }

    #[test]
    fn semicolon_files_are_detected() {
        let data = "code_plantation;code_producteur;superficie_cacao_ha\nC001-P001;C001;2,5\n";
        let (table, _) = load_plantations_csv(data).unwrap();
        assert_eq!(table.rows[0].producer_id.as_deref(), Some("C001"));
        assert_eq!(table.rows[0].area_ha, Some(2.5));
    }

    #[test]
    fn missing_identifier_column_is_fatal() {
        let err = load_producers_csv("nom,cooperative\nA,B\n").unwrap_err();
        assert!(matches!(err, AuditError::MissingColumn { ref column, .. } if column == "code_producteur"));
    }

    #[test]
    fn missing_producer_column_warns() {
        let (table, warnings) = load_plantations_csv("code_plantation,superficie_cacao_ha\nP1,2\n").unwrap();
        assert_eq!(table.rows[0].producer_id, None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn blank_ids_are_reported() {
        let (_, warnings) = load_producers_csv("code_producteur,cooperative\n,A\nC1,B\n").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("1 row(s)"));
    }

    const PARCELS: &str = r#"{
  "type": "FeatureCollection",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
  "features": [
    { "type": "Feature",
      "properties": { "Farms_ID": "C001-P001", "Farmer_ID": "C001", "Superficie": "4,9" },
      "geometry": { "type": "Polygon", "coordinates": [[[-5.0,7.0],[-4.998,7.0],[-4.998,7.002],[-5.0,7.002],[-5.0,7.0]]] } },
    { "type": "Feature",
      "properties": { "Farms_ID": 42, "Superficie": 1.5 },
      "geometry": { "type": "MultiPolygon", "coordinates": [[[[-5.1,7.0],[-5.09,7.0],[-5.09,7.01],[-5.1,7.0]]]] } },
    { "type": "Feature", "properties": { "Farms_ID": "PT" },
      "geometry": { "type": "Point", "coordinates": [-5.0, 7.0] } },
    { "type": "Feature", "properties": { "Farms_ID": "NOGEOM" }, "geometry": null }
  ]
}"#;

    #[test]
    fn parcels_parse_polygons_and_properties() {
        let (collection, warnings) = load_parcels_geojson(PARCELS).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(collection.crs, Crs::Geographic);
        assert_eq!(collection.parcels.len(), 4);

        let first = &collection.parcels[0];
        assert_eq!(first.id, "C001-P001");
        assert_eq!(first.owner_id.as_deref(), Some("C001"));
        assert_eq!(first.declared_area, Some(4.9));
        assert_eq!(first.geometry.0.len(), 1);
        assert_eq!(first.geometry.0[0].exterior().0.len(), 5);

        assert_eq!(collection.parcels[1].id, "42");
        assert_eq!(collection.parcels[1].declared_area, Some(1.5));

        assert!(collection.parcels[2].defect.as_deref().unwrap().contains("Point"));
        assert!(collection.parcels[3].geometry.0.is_empty());
        assert!(collection.parcels[3].defect.is_none());
    }

    #[test]
    fn missing_crs_defaults_to_wgs84_with_warning() {
        let data = r#"{"type":"FeatureCollection","features":[]}"#;
        let (collection, warnings) = load_parcels_geojson(data).unwrap();
        assert_eq!(collection.crs, Crs::Geographic);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("EPSG:4326"));
    }

    #[test]
    fn projected_crs_is_recognised() {
        let data = r#"{"type":"FeatureCollection","crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::32630"}},"features":[]}"#;
        let (collection, _) = load_parcels_geojson(data).unwrap();
        assert_eq!(collection.crs, Crs::Utm { zone: 30, north: true });
    }

    #[test]
    fn non_collection_is_rejected() {
        let data = r#"{"type":"Point","coordinates":[0,0]}"#;
        assert!(matches!(load_parcels_geojson(data), Err(AuditError::GeoJson(_))));
        assert!(matches!(load_parcels_geojson("not json"), Err(AuditError::GeoJson(_))));
    }
}
