//! # Seriation Map
//!
//! Spatially smoothed per-region GPS trajectory features, and one-dimensional
//! orderings ("seriations") of the regions so that similar regions sit next to
//! each other on a map colour scale.
//!
//! This library provides:
//! - Per-point trajectory features with declared dependencies (distance,
//!   duration, velocity, time usage)
//! - A disk-cached per-(trajectory, region) pre-feature table
//! - Radius-based neighbourhood smoothing into a per-region feature table
//! - Interchangeable ordering methods: optimal leaf ordering, self-organizing
//!   maps, TSP seriation and PCA
//!
//! ## Features
//!
//! - **`parallel`** - Aggregate regions in parallel with rayon
//! - **`cli`** - Build the `seriation-map` command line tool
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seriation_map::{InputFiles, Smap, SmapConfig};
//!
//! let inputs = InputFiles::new("trips.csv", "grid.geojson");
//! let mut smap = Smap::new(inputs, SmapConfig::default())?;
//!
//! smap.set_radius(2.0)?;
//! let table = smap.feature_table()?;
//! println!("{} regions x {} features", table.len(), table.columns().len());
//!
//! let order = smap.get_order("Optimal Leaf Ordering")?;
//! println!("ranks: {:?}", order.ranks());
//! # Ok::<(), seriation_map::SmapError>(())
//! ```

use chrono::NaiveDateTime;
use geo::MultiPolygon;

// Unified error handling
pub mod error;
pub use error::{Result, SmapError};

pub mod config;
pub use config::{FieldNames, InputFiles, SmapConfig, SolverConfig, SomConfig};

// Geographic utilities (haversine, bounds, local projection)
pub mod geo_utils;

// Trajectory CSV and GeoJSON readers
pub mod io;

// Feature definitions and dependency resolution
pub mod features;
pub use features::{Column, Feature, FeatureContext, FeatureKind, FeatureRegistry};

pub mod preprocess;
pub use preprocess::{preprocess, PointTable, RegionIndex};

// Per-(trajectory, region) aggregation and its disk cache
pub mod aggregate;
pub use aggregate::{build_pre_features, cache_key, ColumnKind, PreFeatureRow, PreFeatureTable};

// Radius-based smoothing
pub mod neighborhood;
pub use neighborhood::{aggregate_features, FeatureTable, NeighborhoodIndex};

pub mod normalization;
pub use normalization::ColumnScaling;

// Ordering / seriation methods
pub mod ordering;
pub use ordering::{adjacent_distances, OrderingMethod, OrderingRegistry, RegionOrder, DEFAULT_METHOD};

pub mod engine;
pub use engine::{EngineStats, Smap};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use seriation_map::GpsPoint;
/// let point = GpsPoint::new(50.8503, 4.3517); // Brussels
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A single timestamped observation of a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    /// Trajectory (trip) identifier
    pub trajectory_id: String,
    pub timestamp: NaiveDateTime,
    pub position: GpsPoint,
}

/// Geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// A polygonal region of the study area.
///
/// Base regions partition the area and are identified by their position in
/// the region file. Labelled regions may overlap the base grid and carry the
/// label used by categorical features.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: usize,
    /// Geometry in (longitude, latitude) degrees
    pub geometry: MultiPolygon<f64>,
    pub label: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(50.85, 4.35).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_center() {
        let bounds = Bounds {
            min_lat: 50.0,
            max_lat: 51.0,
            min_lng: 4.0,
            max_lng: 5.0,
        };
        let center = bounds.center();
        assert_eq!(center.latitude, 50.5);
        assert_eq!(center.longitude, 4.5);
    }
}
