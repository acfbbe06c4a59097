//! # Trajectory Preprocessing
//!
//! Turns raw trajectory points into a per-point table:
//!
//! 1. Sort points by (trajectory id, timestamp). Successor-based features
//!    (`distance`, `duration`) depend on this order.
//! 2. Attach a label from the labelled regions, if any ("" when no labelled
//!    region contains the point).
//! 3. Compute `duration`, then every registered feature.
//! 4. Join each point to the base region containing it and drop points
//!    outside every region.
//!
//! Features are computed on the full trajectories before points are dropped,
//! so a point's duration is the time until the next fix even when that fix
//! lies outside the study area.

use std::collections::HashMap;
use std::time::Instant;

use chrono::NaiveDateTime;
use geo::{Contains, Point};
use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};

use crate::error::{Result, SmapError};
use crate::features::{retain_rows, Column, Duration, Feature, FeatureContext, FeatureRegistry};
use crate::geo_utils::compute_bounds;
use crate::{GpsPoint, Region, TrajectoryPoint};

// ============================================================================
// Region Index
// ============================================================================

/// Bounding box of one region (used for spatial indexing).
#[derive(Debug, Clone)]
struct RegionEnvelope {
    index: usize,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Regions with an R-tree over their bounding boxes for point lookup.
#[derive(Debug, Clone)]
pub struct RegionIndex {
    regions: Vec<Region>,
    tree: RTree<RegionEnvelope>,
}

impl RegionIndex {
    pub fn new(regions: Vec<Region>) -> Self {
        let envelopes: Vec<RegionEnvelope> = regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                compute_bounds([&region.geometry]).map(|b| RegionEnvelope {
                    index,
                    min_lat: b.min_lat,
                    max_lat: b.max_lat,
                    min_lng: b.min_lng,
                    max_lng: b.max_lng,
                })
            })
            .collect();

        Self {
            regions,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Position (in `regions()`) of the first region whose interior
    /// contains the point.
    pub fn locate(&self, point: &GpsPoint) -> Option<usize> {
        let corner = [point.longitude, point.latitude];
        let query = AABB::from_corners(corner, corner);
        let geo_point = Point::new(point.longitude, point.latitude);

        self.tree
            .locate_in_envelope_intersecting(&query)
            .filter(|env| self.regions[env.index].geometry.contains(&geo_point))
            .map(|env| env.index)
            .min()
    }

    /// Label of the first labelled region containing the point, or "".
    pub fn label_at(&self, point: &GpsPoint) -> String {
        self.locate(point)
            .and_then(|idx| self.regions[idx].label.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Point Table
// ============================================================================

/// Column-oriented table with one row per trajectory point.
///
/// Rows are sorted by (trajectory id, timestamp).
#[derive(Debug, Clone, Default)]
pub struct PointTable {
    trajectory_ids: Vec<String>,
    timestamps: Vec<NaiveDateTime>,
    positions: Vec<GpsPoint>,
    region_ids: Vec<Option<usize>>,
    labels: Option<Vec<String>>,
    columns: HashMap<String, Column>,
}

impl PointTable {
    /// Build a table from raw points, sorting them by (trajectory, time).
    pub fn from_points(mut points: Vec<TrajectoryPoint>) -> Self {
        points.sort_by(|a, b| {
            a.trajectory_id
                .cmp(&b.trajectory_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        let n = points.len();
        let mut table = Self {
            trajectory_ids: Vec::with_capacity(n),
            timestamps: Vec::with_capacity(n),
            positions: Vec::with_capacity(n),
            region_ids: vec![None; n],
            labels: None,
            columns: HashMap::new(),
        };
        for p in points {
            table.trajectory_ids.push(p.trajectory_id);
            table.timestamps.push(p.timestamp);
            table.positions.push(p.position);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.trajectory_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory_ids.is_empty()
    }

    pub fn trajectory_ids(&self) -> &[String] {
        &self.trajectory_ids
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn positions(&self) -> &[GpsPoint] {
        &self.positions
    }

    /// Base region of each row (`None` before the region join).
    pub fn region_ids(&self) -> &[Option<usize>] {
        &self.region_ids
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.labels = Some(labels);
    }

    /// Next row of the same trajectory, if any.
    #[inline]
    pub fn successor(&self, row: usize) -> Option<usize> {
        let next = row + 1;
        (next < self.len() && self.trajectory_ids[next] == self.trajectory_ids[row]).then_some(next)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// A numeric column, or [`SmapError::MissingColumn`].
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .and_then(Column::as_numeric)
            .ok_or_else(|| SmapError::MissingColumn(name.to_string()))
    }

    /// A categorical column, or [`SmapError::MissingColumn`].
    pub fn categorical(&self, name: &str) -> Result<&[String]> {
        self.columns
            .get(name)
            .and_then(Column::as_categorical)
            .ok_or_else(|| SmapError::MissingColumn(name.to_string()))
    }

    pub fn insert_column(&mut self, name: String, column: Column) {
        self.columns.insert(name, column);
    }

    /// Join every row to the base region containing it.
    pub fn assign_regions(&mut self, index: &RegionIndex) {
        let locate = |p: &GpsPoint| index.locate(p).map(|i| index.regions()[i].id);

        #[cfg(feature = "parallel")]
        let ids: Vec<Option<usize>> = {
            use rayon::prelude::*;
            self.positions.par_iter().map(locate).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let ids: Vec<Option<usize>> = self.positions.iter().map(locate).collect();

        self.region_ids = ids;
    }

    /// Drop rows without a region. Returns the number of dropped rows.
    pub fn retain_located(&mut self) -> usize {
        let keep: Vec<bool> = self.region_ids.iter().map(Option::is_some).collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return 0;
        }

        retain(&mut self.trajectory_ids, &keep);
        retain(&mut self.timestamps, &keep);
        retain(&mut self.positions, &keep);
        retain(&mut self.region_ids, &keep);
        if let Some(labels) = self.labels.as_mut() {
            retain(labels, &keep);
        }
        for column in self.columns.values_mut() {
            retain_rows(column, &keep);
        }
        dropped
    }
}

fn retain<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut idx = 0;
    values.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
}

// ============================================================================
// Pipeline
// ============================================================================

/// Build the per-point table from raw points.
///
/// Points outside every base region are dropped after features are computed.
pub fn preprocess(
    points: Vec<TrajectoryPoint>,
    regions: &RegionIndex,
    labels: Option<&RegionIndex>,
    registry: &mut FeatureRegistry,
) -> Result<PointTable> {
    let start = Instant::now();
    let mut table = PointTable::from_points(points);

    if let Some(labeled) = labels {
        let point_labels: Vec<String> = table.positions().iter().map(|p| labeled.label_at(p)).collect();
        let labelled = point_labels.iter().filter(|l| !l.is_empty()).count();
        debug!("[Preprocess] {} of {} points carry a label", labelled, table.len());
        table.set_labels(point_labels);
    }

    // Features see whole trajectories, so the last in-grid point of a trip
    // still measures the step to its first out-of-grid successor
    let duration = Duration.compute(&table, &FeatureContext::default())?;
    table.insert_column(Duration.name().to_string(), duration);
    registry.compute_all(&mut table)?;

    table.assign_regions(regions);
    let dropped = table.retain_located();
    if dropped > 0 {
        warn!("[Preprocess] Dropped {} points outside every region", dropped);
    }
    registry.absorb_categories(&table);

    info!(
        "[Preprocess] {} points in {} regions ready in {:?}",
        table.len(),
        regions.len(),
        start.elapsed()
    );
    Ok(table)
}
