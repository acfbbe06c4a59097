//! # Geographic Utilities
//!
//! Geographic computations shared by the feature definitions and the
//! neighbourhood aggregator.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_km`] | Great-circle distance between two GPS points, in kilometres |
//! | [`compute_bounds`] | Bounding box of a set of region geometries |
//! | [`LocalProjection`] | Distance-preserving local projection for buffering |
//!
//! ## Example
//!
//! ```rust
//! use seriation_map::{GpsPoint, geo_utils};
//!
//! let a = GpsPoint::new(50.8503, 4.3517); // Brussels
//! let b = GpsPoint::new(51.2194, 4.4025); // Antwerp
//!
//! let km = geo_utils::haversine_km(&a, &b);
//! assert!((km - 41.0).abs() < 1.5);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Distances use a spherical Earth with radius 6367 km. This value is part of
//! the feature definitions: changing it changes every `distance` and
//! `velocity` value and therefore the cached pre-feature tables.
//!
//! ### Buffering
//!
//! Buffering a region by `r` kilometres and testing intersection with another
//! region is equivalent to testing that the planar distance between the two
//! regions is at most `r`. Both tests run in a local equirectangular
//! projection centred on the region partition, which is metric to within a
//! fraction of a percent over regional extents.

use geo::{BoundingRect, Coord, MapCoords, MultiPolygon};

use crate::error::{Result, SmapError};
use crate::{Bounds, GpsPoint};

/// Earth radius used by the `distance` feature, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6367.0;

/// Mean Earth radius used by the local projection, in metres.
const PROJECTION_RADIUS_M: f64 = 6_371_008.8;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two GPS points in kilometres.
///
/// # Example
///
/// ```rust
/// use seriation_map::{GpsPoint, geo_utils};
///
/// let p = GpsPoint::new(50.0, 4.0);
/// assert_eq!(geo_utils::haversine_km(&p, &p), 0.0);
/// ```
#[inline]
pub fn haversine_km(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box enclosing all geometries.
///
/// Returns `None` when there are no coordinates at all.
pub fn compute_bounds<'a>(geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Option<Bounds> {
    let mut bounds: Option<Bounds> = None;

    for geometry in geometries {
        let Some(rect) = geometry.bounding_rect() else {
            continue;
        };
        let (min, max) = (rect.min(), rect.max());
        bounds = Some(match bounds {
            None => Bounds {
                min_lat: min.y,
                max_lat: max.y,
                min_lng: min.x,
                max_lng: max.x,
            },
            Some(b) => Bounds {
                min_lat: b.min_lat.min(min.y),
                max_lat: b.max_lat.max(max.y),
                min_lng: b.min_lng.min(min.x),
                max_lng: b.max_lng.max(max.x),
            },
        });
    }

    bounds
}

/// Check that a coordinate is a plausible (longitude, latitude) pair.
#[inline]
pub fn is_geographic(coord: Coord<f64>) -> bool {
    GpsPoint::new(coord.y, coord.x).is_valid()
}

// =============================================================================
// Projection
// =============================================================================

/// Local equirectangular projection centred on a reference point.
///
/// Maps (longitude, latitude) degrees to (x, y) metres. Distances are
/// preserved near the reference latitude, which is the partition centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    origin: GpsPoint,
    cos_lat: f64,
}

impl LocalProjection {
    /// Create a projection centred on `origin`.
    pub fn new(origin: GpsPoint) -> Result<Self> {
        if !origin.is_valid() {
            return Err(SmapError::InvalidCrs(format!(
                "projection origin ({}, {}) is not a geographic coordinate",
                origin.latitude, origin.longitude
            )));
        }
        Ok(Self {
            origin,
            cos_lat: origin.latitude.to_radians().cos(),
        })
    }

    /// Create a projection centred on the middle of `bounds`.
    ///
    /// Fails with [`SmapError::InvalidCrs`] when the bounds are not in
    /// geographic degrees, e.g. a partition already stored in a projected
    /// reference system.
    pub fn for_bounds(bounds: &Bounds) -> Result<Self> {
        let corners = [
            GpsPoint::new(bounds.min_lat, bounds.min_lng),
            GpsPoint::new(bounds.max_lat, bounds.max_lng),
        ];
        if let Some(bad) = corners.iter().find(|p| !p.is_valid()) {
            return Err(SmapError::InvalidCrs(format!(
                "coordinate ({}, {}) is outside the longitude/latitude range",
                bad.longitude, bad.latitude
            )));
        }
        Self::new(bounds.center())
    }

    /// The projection centre.
    pub fn origin(&self) -> GpsPoint {
        self.origin
    }

    /// Project (lon, lat) degrees to (x, y) metres.
    #[inline]
    pub fn forward(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: PROJECTION_RADIUS_M * (coord.x - self.origin.longitude).to_radians() * self.cos_lat,
            y: PROJECTION_RADIUS_M * (coord.y - self.origin.latitude).to_radians(),
        }
    }

    /// Project every coordinate of a geometry.
    pub fn project(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry.map_coords(|c| self.forward(c))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
