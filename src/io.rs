//! Input readers for trajectory CSV files and GeoJSON region files.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::config::FieldNames;
use crate::error::{Result, SmapError};
use crate::geo_utils::is_geographic;
use crate::{GpsPoint, Region, TrajectoryPoint};

/// Timestamp layouts accepted in addition to RFC 3339 and Unix seconds.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

// ============================================================================
// Trajectories
// ============================================================================

/// Read trajectory points from a CSV file with a header row.
///
/// Points are returned in file order; sorting by (trajectory, timestamp)
/// is the preprocessor's job.
pub fn read_trajectories(path: impl AsRef<Path>, fields: &FieldNames) -> Result<Vec<TrajectoryPoint>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| SmapError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| SmapError::csv(path, e))?.clone();

    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| SmapError::MissingField {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let id_col = column(&fields.id)?;
    let lat_col = column(&fields.lat)?;
    let lon_col = column(&fields.lon)?;
    let ts_col = column(&fields.timestamp)?;

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SmapError::csv(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

        let parse_coord = |idx: usize, name: &str| -> Result<f64> {
            cell(idx).parse::<f64>().map_err(|_| SmapError::InvalidValue {
                path: path.to_path_buf(),
                line,
                column: name.to_string(),
                value: cell(idx).to_string(),
            })
        };
        let latitude = parse_coord(lat_col, &fields.lat)?;
        let longitude = parse_coord(lon_col, &fields.lon)?;

        let position = GpsPoint::new(latitude, longitude);
        if !position.is_valid() {
            return Err(SmapError::InvalidValue {
                path: path.to_path_buf(),
                line,
                column: format!("{}/{}", fields.lat, fields.lon),
                value: format!("{latitude},{longitude}"),
            });
        }

        let raw_ts = cell(ts_col);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| SmapError::MalformedTimestamp {
            path: path.to_path_buf(),
            line,
            value: raw_ts.to_string(),
        })?;

        points.push(TrajectoryPoint {
            trajectory_id: cell(id_col).to_string(),
            timestamp,
            position,
        });
    }

    info!("[Input] Read {} trajectory points from {}", points.len(), path.display());
    Ok(points)
}

/// Parse a timestamp cell.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.naive_utc())
}

// ============================================================================
// Regions
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<NamedCrs>,
    features: Vec<GeoFeature>,
}

#[derive(Debug, Deserialize)]
struct NamedCrs {
    #[serde(default)]
    properties: Option<CrsProperties>,
}

#[derive(Debug, Deserialize)]
struct CrsProperties {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeoFeature {
    geometry: Option<GeoGeometry>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeoGeometry {
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

/// Read a base region partition. The feature index becomes the region id.
pub fn read_regions(path: impl AsRef<Path>) -> Result<Vec<Region>> {
    read_region_file(path.as_ref(), false)
}

/// Read labelled regions. Every feature must carry a string `label` property.
pub fn read_labeled_regions(path: impl AsRef<Path>) -> Result<Vec<Region>> {
    read_region_file(path.as_ref(), true)
}

fn read_region_file(path: &Path, require_label: bool) -> Result<Vec<Region>> {
    let text = std::fs::read_to_string(path).map_err(|e| SmapError::io(path, e))?;
    let invalid = |message: String| SmapError::InvalidRegionFile {
        path: path.to_path_buf(),
        message,
    };

    let collection: FeatureCollection =
        serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    if collection.kind != "FeatureCollection" {
        return Err(invalid(format!("expected a FeatureCollection, found {}", collection.kind)));
    }
    if let Some(name) = collection
        .crs
        .and_then(|crs| crs.properties)
        .and_then(|props| props.name)
    {
        check_crs_name(&name)?;
    }

    let mut regions = Vec::with_capacity(collection.features.len());
    for (id, feature) in collection.features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(g) => to_multipolygon(g).map_err(|m| invalid(format!("feature {id}: {m}")))?,
            None => return Err(invalid(format!("feature {id} has no geometry"))),
        };

        if let Some(bad) = geometry
            .0
            .iter()
            .flat_map(|p| p.exterior().coords())
            .find(|c| !is_geographic(**c))
        {
            return Err(SmapError::InvalidCrs(format!(
                "{}: coordinate ({}, {}) of feature {id} is not longitude/latitude",
                path.display(),
                bad.x,
                bad.y
            )));
        }

        let label = feature
            .properties
            .as_ref()
            .and_then(|props| props.get("label"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if require_label && label.is_none() {
            return Err(invalid(format!("feature {id} has no string `label` property")));
        }

        regions.push(Region { id, geometry, label });
    }

    debug!("[Input] Read {} regions from {}", regions.len(), path.display());
    Ok(regions)
}

fn check_crs_name(name: &str) -> Result<()> {
    let upper = name.to_ascii_uppercase();
    if upper.ends_with("CRS84") || upper.ends_with("EPSG::4326") || upper.ends_with("EPSG:4326") {
        Ok(())
    } else {
        Err(SmapError::InvalidCrs(format!(
            "regions must use EPSG:4326 longitude/latitude, file declares {name}"
        )))
    }
}

fn to_multipolygon(geometry: GeoGeometry) -> std::result::Result<MultiPolygon<f64>, String> {
    let polygons = match geometry {
        GeoGeometry::Polygon(rings) => vec![to_polygon(rings)?],
        GeoGeometry::MultiPolygon(parts) => parts
            .into_iter()
            .map(to_polygon)
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };
    Ok(MultiPolygon::new(polygons))
}

fn to_polygon(rings: Vec<Vec<Vec<f64>>>) -> std::result::Result<Polygon<f64>, String> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next().ok_or("polygon has no exterior ring")??;
    let interiors = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn to_ring(positions: Vec<Vec<f64>>) -> std::result::Result<LineString<f64>, String> {
    if positions.len() < 3 {
        return Err(format!("ring has {} positions, need at least 3", positions.len()));
    }
    positions
        .into_iter()
        .map(|pos| match pos.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err("position has fewer than two coordinates".to_string()),
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(LineString::new)
}
