//! Coordinate reference systems and the projection policy used before any
//! area or overlap computation.
//!
//! Parcels arrive in geographic WGS84 (EPSG:4326), in UTM, or in Web
//! Mercator. Areas are only ever computed in one of:
//! - UTM, WGS84 ellipsoid (EPSG:326zz north / 327zz south), via the Krüger
//!   series for the transverse Mercator;
//! - spherical Web Mercator (EPSG:3857), the fallback.
//!
//! Both projections have an inverse, used to bring Web Mercator input back
//! to longitude/latitude and to export results in EPSG:4326.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

use geo::{Centroid, Coord, MapCoords, MultiPolygon};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ProjectionConfig, ProjectionMode};
use crate::error::AuditError;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// UTM is defined between 80°S and 84°N.
const UTM_MIN_LAT: f64 = -80.0;
const UTM_MAX_LAT: f64 = 84.0;
/// Beyond this distance from the central meridian the series is unusable.
const UTM_MAX_LON_OFFSET: f64 = 45.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

pub const EPSG_WGS84: u32 = 4326;
pub const EPSG_WEB_MERCATOR: u32 = 3857;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crs {
    /// Longitude/latitude degrees on WGS84. Never used for measurement.
    Geographic,
    Utm { zone: u8, north: bool },
    WebMercator,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    #[error("non-finite coordinate")]
    NonFinite,
    #[error("coordinate ({lon}, {lat}) outside the domain of {target}")]
    OutOfDomain { lon: f64, lat: f64, target: Crs },
    #[error("cannot project into {0}")]
    NotProjected(Crs),
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, AuditError> {
        match code {
            EPSG_WGS84 => Ok(Self::Geographic),
            EPSG_WEB_MERCATOR => Ok(Self::WebMercator),
            32601..=32660 => Ok(Self::Utm { zone: (code - 32600) as u8, north: true }),
            32701..=32760 => Ok(Self::Utm { zone: (code - 32700) as u8, north: false }),
            other => Err(AuditError::UnsupportedCrs(format!("EPSG:{other}"))),
        }
    }

    /// Parse a CRS name as found in legacy GeoJSON `crs` members or config:
    /// `urn:ogc:def:crs:OGC:1.3:CRS84`, `urn:ogc:def:crs:EPSG::32630`,
    /// `EPSG:4326`, or a bare code.
    pub fn parse(name: &str) -> Result<Self, AuditError> {
        let name = name.trim();
        if name.to_ascii_uppercase().ends_with("CRS84") {
            return Ok(Self::Geographic);
        }
        let code = name
            .rsplit(':')
            .next()
            .and_then(|tail| tail.trim().parse::<u32>().ok())
            .ok_or_else(|| AuditError::UnsupportedCrs(name.to_string()))?;
        Self::from_epsg(code)
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Self::Geographic => EPSG_WGS84,
            Self::WebMercator => EPSG_WEB_MERCATOR,
            Self::Utm { zone, north: true } => 32600 + u32::from(*zone),
            Self::Utm { zone, north: false } => 32700 + u32::from(*zone),
        }
    }

    pub fn is_projected(&self) -> bool {
        !matches!(self, Self::Geographic)
    }

    /// Project one geographic coordinate (x = longitude, y = latitude) into
    /// this CRS. Coordinates are in metres afterwards.
    pub fn project(&self, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let (lon, lat) = (coord.x, coord.y);
        if !lon.is_finite() || !lat.is_finite() {
            return Err(ProjectionError::NonFinite);
        }
        match *self {
            Self::Geographic => Err(ProjectionError::NotProjected(*self)),
            Self::WebMercator => {
                if lat.abs() > WEB_MERCATOR_MAX_LAT || lon.abs() > 180.0 {
                    return Err(ProjectionError::OutOfDomain { lon, lat, target: *self });
                }
                let x = WGS84_A * lon.to_radians();
                let y = WGS84_A * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
                Ok(Coord { x, y })
            }
            Self::Utm { zone, north } => {
                let central = utm_central_meridian(zone);
                if !(UTM_MIN_LAT..=UTM_MAX_LAT).contains(&lat)
                    || (lon - central).abs() > UTM_MAX_LON_OFFSET
                {
                    return Err(ProjectionError::OutOfDomain { lon, lat, target: *self });
                }
                let (easting, northing) = transverse_mercator(lon, lat, central);
                let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
                Ok(Coord {
                    x: UTM_FALSE_EASTING + UTM_K0 * easting,
                    y: false_northing + UTM_K0 * northing,
                })
            }
        }
    }

    /// Inverse of [`Crs::project`]: metres in this CRS back to longitude and
    /// latitude. Geographic coordinates are returned unchanged.
    pub fn unproject(&self, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let (x, y) = (coord.x, coord.y);
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::NonFinite);
        }
        let (lon, lat) = match *self {
            Self::Geographic => return Ok(coord),
            Self::WebMercator => {
                let lon = (x / WGS84_A).to_degrees();
                let lat = (2.0 * (y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
                if lon.abs() > 180.0 {
                    return Err(ProjectionError::OutOfDomain { lon, lat, target: *self });
                }
                (lon, lat)
            }
            Self::Utm { zone, north } => {
                let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
                let (offset, lat) = inverse_transverse_mercator(
                    (x - UTM_FALSE_EASTING) / UTM_K0,
                    (y - false_northing) / UTM_K0,
                );
                let lon = utm_central_meridian(zone) + offset;
                if offset.abs() > UTM_MAX_LON_OFFSET || !lat.is_finite() {
                    return Err(ProjectionError::OutOfDomain { lon, lat, target: *self });
                }
                (normalize_lon(lon), lat)
            }
        };
        Ok(Coord { x: lon, y: lat })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

fn utm_central_meridian(zone: u8) -> f64 {
    f64::from(zone) * 6.0 - 183.0
}

fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Third flattening of WGS84 and its rectifying radius.
fn krueger_constants() -> (f64, f64) {
    let n = WGS84_F / (2.0 - WGS84_F);
    let n2 = n * n;
    (n, WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0))
}

/// Ellipsoidal transverse Mercator (Krüger, third order), unscaled, relative
/// to `central` meridian. Returns (easting, northing) before k0 and false
/// origin are applied.
fn transverse_mercator(lon: f64, lat: f64, central: f64) -> (f64, f64) {
    let (n, rectifying_radius) = krueger_constants();
    let n2 = n * n;
    let n3 = n2 * n;
    let alpha = [
        n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
        13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
        61.0 * n3 / 240.0,
    ];

    let phi = lat.to_radians();
    let dlambda = (lon - central).to_radians();
    let c = 2.0 * n.sqrt() / (1.0 + n);
    let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();
    let xi = t.atan2(dlambda.cos());
    let eta = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut x = eta;
    let mut y = xi;
    for (j, a) in alpha.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        x += a * (k * xi).cos() * (k * eta).sinh();
        y += a * (k * xi).sin() * (k * eta).cosh();
    }
    (rectifying_radius * x, rectifying_radius * y)
}

/// Inverse of [`transverse_mercator`] for unscaled (easting, northing).
/// Returns (longitude offset from the central meridian, latitude), degrees.
fn inverse_transverse_mercator(easting: f64, northing: f64) -> (f64, f64) {
    let (n, rectifying_radius) = krueger_constants();
    let n2 = n * n;
    let n3 = n2 * n;
    let beta = [
        n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
        n2 / 48.0 + n3 / 15.0,
        17.0 * n3 / 480.0,
    ];
    let delta = [
        2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
        7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
        56.0 * n3 / 15.0,
    ];

    let xi = northing / rectifying_radius;
    let eta = easting / rectifying_radius;
    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, b) in beta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        xi_p -= b * (k * xi).sin() * (k * eta).cosh();
        eta_p -= b * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, d) in delta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        phi += d * (k * chi).sin();
    }
    let lambda = eta_p.sinh().atan2(xi_p.cos());
    (lambda.to_degrees(), phi.to_degrees())
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// UTM zone for a longitude/latitude, `None` outside the UTM domain.
pub fn utm_for(lon: f64, lat: f64) -> Option<Crs> {
    if !lon.is_finite() || !lat.is_finite() || !(UTM_MIN_LAT..=UTM_MAX_LAT).contains(&lat) {
        return None;
    }
    let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
    Some(Crs::Utm { zone, north: lat >= 0.0 })
}

/// Mean of the per-geometry centroids (geographic degrees).
pub fn mean_centroid<'a>(geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Option<Coord<f64>> {
    let mut sum = Coord { x: 0.0, y: 0.0 };
    let mut count = 0usize;
    for geometry in geometries {
        if let Some(c) = geometry.centroid() {
            sum.x += c.x();
            sum.y += c.y();
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let mean = Coord { x: sum.x / count as f64, y: sum.y / count as f64 };
    (mean.x.is_finite() && mean.y.is_finite()).then_some(mean)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectionChoice {
    pub source: Crs,
    pub target: Crs,
    pub epsg: u32,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decide the measurement CRS for a parcel collection.
///
/// UTM sources are used as is. For any other source `geometries` are in
/// longitude/latitude (Web Mercator input already unprojected): `auto_utm`
/// picks the zone of the mean centroid and falls back to `fallback_epsg`
/// when no zone can be selected, `fixed` uses the configured code.
pub fn choose_projection<'a>(
    config: &ProjectionConfig,
    source: Crs,
    geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>,
) -> Result<ProjectionChoice, AuditError> {
    if let Crs::Utm { .. } = source {
        return Ok(ProjectionChoice {
            source,
            target: source,
            epsg: source.epsg(),
            fallback_used: false,
            reason: Some("source already projected".into()),
        });
    }

    let fallback = Crs::from_epsg(config.fallback_epsg)?;
    let (target, fallback_used, reason) = match config.mode {
        ProjectionMode::Fixed => {
            let epsg = config.epsg.ok_or_else(|| {
                AuditError::ConfigValidation("projection.mode = \"fixed\" requires projection.epsg".into())
            })?;
            (Crs::from_epsg(epsg)?, false, None)
        }
        ProjectionMode::AutoUtm => match mean_centroid(geometries) {
            Some(mean) => match utm_for(mean.x, mean.y) {
                Some(utm) => (utm, false, None),
                None => (
                    fallback,
                    true,
                    Some(format!("mean centroid ({:.6}, {:.6}) outside UTM domain", mean.x, mean.y)),
                ),
            },
            None => (fallback, true, Some("no centroid available for UTM selection".into())),
        },
    };

    if !target.is_projected() {
        return Err(AuditError::UnsupportedCrs(format!(
            "{target} is geographic; areas require a projected CRS"
        )));
    }

    Ok(ProjectionChoice { source, target, epsg: target.epsg(), fallback_used, reason })
}

/// Reproject a geometry from geographic coordinates into `target`.
pub fn project_geometry(
    geometry: &MultiPolygon<f64>,
    target: Crs,
) -> Result<MultiPolygon<f64>, ProjectionError> {
    geometry.try_map_coords(move |c| target.project(c))
}

/// Bring a geometry in `source` back to longitude/latitude.
pub fn unproject_geometry(
    geometry: &MultiPolygon<f64>,
    source: Crs,
) -> Result<MultiPolygon<f64>, ProjectionError> {
    geometry.try_map_coords(move |c| source.unproject(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectionConfig;
    use geo::{polygon, Area};

    #[test]
    fn epsg_round_trip() {
        for code in [4326, 3857, 32630, 32601, 32660, 32729] {
            assert_eq!(Crs::from_epsg(code).unwrap().epsg(), code);
        }
        assert!(Crs::from_epsg(2154).is_err());
        assert!(Crs::from_epsg(32661).is_err());
    }

    #[test]
    fn parse_names() {
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84").unwrap(), Crs::Geographic);
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::Geographic);
        assert_eq!(
            Crs::parse("urn:ogc:def:crs:EPSG::32630").unwrap(),
            Crs::Utm { zone: 30, north: true }
        );
        assert_eq!(Crs::parse("3857").unwrap(), Crs::WebMercator);
        assert!(Crs::parse("not a crs").is_err());
    }

    #[test]
    fn utm_zone_selection() {
        // Côte d'Ivoire
        assert_eq!(utm_for(-5.0, 7.0), Some(Crs::Utm { zone: 30, north: true }));
        assert_eq!(utm_for(-5.0, -7.0), Some(Crs::Utm { zone: 30, north: false }));
        assert_eq!(utm_for(-180.0, 0.0), Some(Crs::Utm { zone: 1, north: true }));
        assert_eq!(utm_for(180.0, 0.0), Some(Crs::Utm { zone: 60, north: true }));
        assert_eq!(utm_for(10.0, 85.0), None);
        assert_eq!(utm_for(f64::NAN, 0.0), None);
    }

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let utm = Crs::Utm { zone: 30, north: true };
        let p = utm.project(Coord { x: -3.0, y: 0.0 }).unwrap();
        assert!((p.x - 500_000.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
    }

    #[test]
    fn meridian_arc_at_45_degrees() {
        // Meridian distance to 45°N on WGS84 is 4 984 944.378 m, scaled by k0.
        let utm = Crs::Utm { zone: 31, north: true };
        let p = utm.project(Coord { x: 3.0, y: 45.0 }).unwrap();
        assert!((p.y - 4_984_944.378 * UTM_K0).abs() < 1.0, "northing {}", p.y);
    }

    #[test]
    fn southern_false_northing() {
        let utm = Crs::Utm { zone: 30, north: false };
        let p = utm.project(Coord { x: -3.0, y: 0.0 }).unwrap();
        assert!((p.y - UTM_FALSE_NORTHING_SOUTH).abs() < 1e-6);
    }

    #[test]
    fn small_parcel_area_in_utm() {
        // 0.002° square near (-5, 7): roughly 221 m x 221 m.
        let square = MultiPolygon(vec![polygon![
            (x: -5.0, y: 7.0),
            (x: -4.998, y: 7.0),
            (x: -4.998, y: 7.002),
            (x: -5.0, y: 7.002),
            (x: -5.0, y: 7.0),
        ]]);
        let projected = project_geometry(&square, Crs::Utm { zone: 30, north: true }).unwrap();
        let hectares = projected.unsigned_area() / 10_000.0;
        assert!((hectares - 4.89).abs() < 0.03, "got {hectares} ha");
    }

    #[test]
    fn out_of_domain_is_an_error() {
        let utm = Crs::Utm { zone: 30, north: true };
        assert!(matches!(
            utm.project(Coord { x: -3.0, y: 86.0 }),
            Err(ProjectionError::OutOfDomain { .. })
        ));
        assert!(matches!(
            Crs::WebMercator.project(Coord { x: 0.0, y: 89.0 }),
            Err(ProjectionError::OutOfDomain { .. })
        ));
        assert!(matches!(
            Crs::Geographic.project(Coord { x: 0.0, y: 0.0 }),
            Err(ProjectionError::NotProjected(_))
        ));
    }

    #[test]
    fn auto_utm_falls_back_when_no_geometry() {
        let config = ProjectionConfig::default();
        let choice = choose_projection(&config, Crs::Geographic, std::iter::empty()).unwrap();
        assert_eq!(choice.target, Crs::WebMercator);
        assert!(choice.fallback_used);
    }

    #[test]
    fn auto_utm_picks_zone_from_mean_centroid() {
        let config = ProjectionConfig::default();
        let a = MultiPolygon(vec![polygon![
            (x: -5.0, y: 7.0), (x: -4.99, y: 7.0), (x: -4.99, y: 7.01), (x: -5.0, y: 7.0),
        ]]);
        let choice = choose_projection(&config, Crs::Geographic, [&a]).unwrap();
        assert_eq!(choice.target, Crs::Utm { zone: 30, north: true });
        assert_eq!(choice.epsg, 32630);
        assert!(!choice.fallback_used);
    }

    #[test]
    fn auto_utm_falls_back_near_pole() {
        let config = ProjectionConfig::default();
        let arctic = MultiPolygon(vec![polygon![
            (x: 10.0, y: 84.5), (x: 10.1, y: 84.5), (x: 10.1, y: 84.6), (x: 10.0, y: 84.5),
        ]]);
        let choice = choose_projection(&config, Crs::Geographic, [&arctic]).unwrap();
        assert!(choice.fallback_used);
        assert_eq!(choice.epsg, 3857);
    }

    #[test]
    fn utm_source_is_kept() {
        let config = ProjectionConfig::default();
        let source = Crs::Utm { zone: 30, north: true };
        let choice = choose_projection(&config, source, std::iter::empty()).unwrap();
        assert_eq!(choice.target, source);
        assert!(!choice.fallback_used);
    }

    #[test]
    fn web_mercator_source_gets_a_utm_zone() {
        let config = ProjectionConfig::default();
        let a = MultiPolygon(vec![polygon![
            (x: 10.0, y: 60.0), (x: 10.01, y: 60.0), (x: 10.01, y: 60.01), (x: 10.0, y: 60.0),
        ]]);
        let choice = choose_projection(&config, Crs::WebMercator, [&a]).unwrap();
        assert_eq!(choice.source, Crs::WebMercator);
        assert_eq!(choice.target, Crs::Utm { zone: 32, north: true });
    }

    #[test]
    fn unproject_inverts_project() {
        let cases = [
            (Crs::Utm { zone: 30, north: true }, -5.0, 7.0),
            (Crs::Utm { zone: 30, north: true }, -3.0, 0.0),
            (Crs::Utm { zone: 32, north: true }, 11.5, 60.0),
            (Crs::Utm { zone: 30, north: false }, -6.2, -33.9),
            (Crs::Utm { zone: 1, north: true }, -179.5, 45.0),
            (Crs::WebMercator, -5.0, 7.0),
            (Crs::WebMercator, 10.0, 60.0),
        ];
        for (crs, lon, lat) in cases {
            let back = crs.unproject(crs.project(Coord { x: lon, y: lat }).unwrap()).unwrap();
            assert!((back.x - lon).abs() < 1e-7, "{crs} lon {lon} -> {}", back.x);
            assert!((back.y - lat).abs() < 1e-7, "{crs} lat {lat} -> {}", back.y);
        }
    }

    #[test]
    fn unproject_known_points() {
        let utm = Crs::Utm { zone: 30, north: true };
        let origin = utm.unproject(Coord { x: 500_000.0, y: 0.0 }).unwrap();
        assert!((origin.x + 3.0).abs() < 1e-9 && origin.y.abs() < 1e-9);

        let equator = Crs::WebMercator.unproject(Coord { x: 0.0, y: 0.0 }).unwrap();
        assert!(equator.x.abs() < 1e-12 && equator.y.abs() < 1e-12);

        assert_eq!(Crs::Geographic.unproject(Coord { x: -5.0, y: 7.0 }).unwrap(), Coord { x: -5.0, y: 7.0 });
        assert!(matches!(
            Crs::WebMercator.unproject(Coord { x: f64::INFINITY, y: 0.0 }),
            Err(ProjectionError::NonFinite)
        ));
    }

    #[test]
    fn fixed_mode_requires_projected_epsg() {
        let config = ProjectionConfig { mode: ProjectionMode::Fixed, epsg: Some(4326), ..Default::default() };
        assert!(choose_projection(&config, Crs::Geographic, std::iter::empty()).is_err());
        let config = ProjectionConfig { mode: ProjectionMode::Fixed, epsg: Some(32630), ..Default::default() };
        let choice = choose_projection(&config, Crs::Geographic, std::iter::empty()).unwrap();
        assert_eq!(choice.epsg, 32630);
    }
}
