//! # Neighbourhood Smoothing
//!
//! Re-aggregates the pre-feature table over each region's neighbourhood to
//! produce the final per-region feature table.
//!
//! The neighbourhood of region `i` at radius `r` is every base region that
//! region `i` buffered by `r` kilometres intersects. At `r = 0` it is the
//! regions the unbuffered region covers, which for a partition is `{i}`.
//!
//! Within a neighbourhood, each trajectory is reduced to one value per
//! column: the mean of its per-region means for numerical columns, and its
//! summed category durations divided by its summed `total` for category
//! columns. Trajectories with a zero total are dropped, and the region value
//! is the mean over the remaining trajectories (0.0 when none remain).

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::Instant;

#[allow(deprecated)]
use geo::EuclideanDistance;
use geo::{BoundingRect, MultiPolygon, Relate};
use log::{debug, info};
use rstar::{RTree, RTreeObject, AABB};

use crate::aggregate::{ColumnKind, PreFeatureTable};
use crate::error::{Result, SmapError};
use crate::geo_utils::{compute_bounds, is_geographic, LocalProjection};
use crate::normalization::ColumnScaling;
use crate::{GpsPoint, Region};

// ============================================================================
// Neighbourhood Index
// ============================================================================

/// Projected bounding box of one region.
#[derive(Debug, Clone)]
struct ProjectedEnvelope {
    index: usize,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for ProjectedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Base regions projected to metres, ready for buffer queries.
#[derive(Debug, Clone)]
pub struct NeighborhoodIndex {
    region_ids: Vec<usize>,
    projected: Vec<MultiPolygon<f64>>,
    /// Aligned with `projected`; `None` for empty geometries
    envelopes: Vec<Option<ProjectedEnvelope>>,
    tree: RTree<ProjectedEnvelope>,
}

impl NeighborhoodIndex {
    /// Project the regions into a local metric system.
    ///
    /// Fails with [`SmapError::InvalidCrs`] when a region coordinate is not
    /// a (longitude, latitude) pair.
    pub fn new(regions: &[Region]) -> Result<Self> {
        for region in regions {
            let bad = region
                .geometry
                .0
                .iter()
                .flat_map(|p| p.exterior().coords().chain(p.interiors().iter().flat_map(|r| r.coords())))
                .find(|c| !is_geographic(**c));
            if let Some(c) = bad {
                return Err(SmapError::InvalidCrs(format!(
                    "region {} has coordinate ({}, {}) outside the longitude/latitude range",
                    region.id, c.x, c.y
                )));
            }
        }

        let projection = match compute_bounds(regions.iter().map(|r| &r.geometry)) {
            Some(bounds) => LocalProjection::for_bounds(&bounds)?,
            None => LocalProjection::new(GpsPoint::new(0.0, 0.0))?,
        };

        let projected: Vec<MultiPolygon<f64>> =
            regions.iter().map(|r| projection.project(&r.geometry)).collect();
        let envelopes: Vec<Option<ProjectedEnvelope>> = projected
            .iter()
            .enumerate()
            .map(|(index, geometry)| {
                geometry.bounding_rect().map(|rect| ProjectedEnvelope {
                    index,
                    min: [rect.min().x, rect.min().y],
                    max: [rect.max().x, rect.max().y],
                })
            })
            .collect();

        debug!(
            "[Neighborhood] Indexed {} regions around ({:.4}, {:.4})",
            regions.len(),
            projection.origin().latitude,
            projection.origin().longitude
        );

        Ok(Self {
            region_ids: regions.iter().map(|r| r.id).collect(),
            projected,
            tree: RTree::bulk_load(envelopes.iter().flatten().cloned().collect()),
            envelopes,
        })
    }

    pub fn len(&self) -> usize {
        self.region_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region_ids.is_empty()
    }

    pub fn region_ids(&self) -> &[usize] {
        &self.region_ids
    }

    /// Neighbour region ids of every region, aligned with `region_ids()`.
    pub fn neighbors(&self, radius_km: f64) -> Vec<Vec<usize>> {
        let start = Instant::now();
        let radius_m = radius_km * 1000.0;

        let mut result = Vec::with_capacity(self.len());
        for i in 0..self.len() {
            let mut found: Vec<usize> = match &self.envelopes[i] {
                Some(env) => {
                    let search = AABB::from_corners(
                        [env.min[0] - radius_m, env.min[1] - radius_m],
                        [env.max[0] + radius_m, env.max[1] + radius_m],
                    );
                    self.tree
                        .locate_in_envelope_intersecting(&search)
                        .map(|candidate| candidate.index)
                        .filter(|&j| self.is_neighbor(i, j, radius_m))
                        .collect()
                }
                None => Vec::new(),
            };
            if !found.contains(&i) {
                found.push(i);
            }
            found.sort_unstable();
            result.push(found.into_iter().map(|j| self.region_ids[j]).collect());
        }

        let mean = if result.is_empty() {
            0.0
        } else {
            result.iter().map(Vec::len).sum::<usize>() as f64 / result.len() as f64
        };
        info!(
            "[Neighborhood] radius {} km: {:.1} neighbours per region in {:?}",
            radius_km,
            mean,
            start.elapsed()
        );
        result
    }

    fn is_neighbor(&self, i: usize, j: usize, radius_m: f64) -> bool {
        if i == j {
            return true;
        }
        let (a, b) = (&self.projected[i], &self.projected[j]);
        if radius_m == 0.0 {
            a.relate(b).is_contains()
        } else {
            #[allow(deprecated)]
            let distance = a.euclidean_distance(b);
            distance <= radius_m
        }
    }
}

// ============================================================================
// Feature Table
// ============================================================================

/// Final per-region feature table at one smoothing radius.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    radius_km: f64,
    region_ids: Vec<usize>,
    columns: Vec<String>,
    /// Row-major, `region_ids.len() * columns.len()` values
    values: Vec<f64>,
}

impl FeatureTable {
    /// Build a table from explicit rows, with region ids `0..rows.len()`.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(SmapError::InvalidConfig(format!(
                "row {} has {} values for {} columns",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self {
            radius_km: 0.0,
            region_ids: (0..rows.len()).collect(),
            columns,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.region_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region_ids.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn region_ids(&self) -> &[usize] {
        &self.region_ids
    }

    /// Feature values of the region at position `index`.
    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.columns.len();
        &self.values[index * width..(index + 1) * width]
    }

    /// Values of one column across all regions.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let j = self.columns.iter().position(|c| c == name)?;
        Some((0..self.len()).map(|i| self.row(i)[j]).collect())
    }

    /// Owned copy of the rows, for the ordering methods.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        (0..self.len()).map(|i| self.row(i).to_vec()).collect()
    }

    /// Copy of the table with every column rescaled; region ids and radius
    /// are kept.
    pub fn scaled(&self, scaling: ColumnScaling) -> FeatureTable {
        Self {
            radius_km: self.radius_km,
            region_ids: self.region_ids.clone(),
            columns: self.columns.clone(),
            values: scaling.apply(&self.matrix()).into_iter().flatten().collect(),
        }
    }

    /// Write the table as CSV: `region_id,<columns>`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        let to_err = |e| SmapError::csv("<output>", e);

        let mut header = vec!["region_id".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header).map_err(to_err)?;
        for (i, id) in self.region_ids.iter().enumerate() {
            let mut record = vec![id.to_string()];
            record.extend(self.row(i).iter().map(f64::to_string));
            writer.write_record(&record).map_err(to_err)?;
        }
        writer.flush().map_err(|e| SmapError::io("<output>", e))?;
        Ok(())
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Per-trajectory sums over one neighbourhood.
struct TrajectorySums {
    values: Vec<f64>,
    regions: usize,
    total: f64,
}

/// Smooth the pre-feature table over precomputed neighbourhoods.
///
/// `neighbors[i]` lists the region ids around `region_ids[i]`.
pub fn aggregate_features(
    pre: &PreFeatureTable,
    region_ids: &[usize],
    neighbors: &[Vec<usize>],
    radius_km: f64,
) -> FeatureTable {
    let start = Instant::now();
    let by_region = pre.rows_by_region();
    let aggregate = |hood: &Vec<usize>| aggregate_region(pre, &by_region, hood);

    #[cfg(feature = "parallel")]
    let rows: Vec<Vec<f64>> = {
        use rayon::prelude::*;
        neighbors.par_iter().map(aggregate).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let rows: Vec<Vec<f64>> = neighbors.iter().map(aggregate).collect();

    info!(
        "[Neighborhood] Aggregated {} regions at radius {} km in {:?}",
        rows.len(),
        radius_km,
        start.elapsed()
    );

    FeatureTable {
        radius_km,
        region_ids: region_ids.to_vec(),
        columns: pre.columns().to_vec(),
        values: rows.into_iter().flatten().collect(),
    }
}

fn aggregate_region(
    pre: &PreFeatureTable,
    by_region: &HashMap<usize, Vec<usize>>,
    neighborhood: &[usize],
) -> Vec<f64> {
    let width = pre.columns().len();
    let mut trajectories: BTreeMap<&str, TrajectorySums> = BTreeMap::new();

    for region_id in neighborhood {
        for &r in by_region.get(region_id).map(Vec::as_slice).unwrap_or(&[]) {
            let row = &pre.rows()[r];
            let sums = trajectories
                .entry(row.trajectory_id.as_str())
                .or_insert_with(|| TrajectorySums {
                    values: vec![0.0; width],
                    regions: 0,
                    total: 0.0,
                });
            for (acc, v) in sums.values.iter_mut().zip(&row.values) {
                *acc += v;
            }
            sums.regions += 1;
            sums.total += row.total;
        }
    }

    let mut out = vec![0.0; width];
    let mut present = 0usize;
    for sums in trajectories.values().filter(|s| s.total != 0.0) {
        present += 1;
        for (j, kind) in pre.kinds().iter().enumerate() {
            out[j] += match kind {
                ColumnKind::Numeric => sums.values[j] / sums.regions as f64,
                ColumnKind::Category => sums.values[j] / sums.total,
            };
        }
    }

    if present > 0 {
        for v in &mut out {
            *v /= present as f64;
        }
    }
    for v in &mut out {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PreFeatureRow;
    use geo::polygon;

    fn cell(id: usize, lon: f64, lat: f64) -> Region {
        let size = 0.01;
        let p = polygon![
            (x: lon, y: lat),
            (x: lon + size, y: lat),
            (x: lon + size, y: lat + size),
            (x: lon, y: lat + size),
            (x: lon, y: lat),
        ];
        Region {
            id,
            geometry: MultiPolygon::new(vec![p]),
            label: None,
        }
    }

    /// A row of three cells roughly 700 m wide, then a far away cell.
    fn strip() -> Vec<Region> {
        vec![
            cell(0, 4.00, 50.0),
            cell(1, 4.01, 50.0),
            cell(2, 4.02, 50.0),
            cell(3, 4.50, 50.0),
        ]
    }

    fn row(traj: &str, region_id: usize, values: Vec<f64>, total: f64) -> PreFeatureRow {
        PreFeatureRow {
            trajectory_id: traj.to_string(),
            region_id,
            values,
            total,
        }
    }

    fn pre_table() -> PreFeatureTable {
        PreFeatureTable::new(
            vec![
                ("velocity".to_string(), ColumnKind::Numeric),
                ("work".to_string(), ColumnKind::Category),
                ("driving".to_string(), ColumnKind::Category),
            ],
            vec![
                row("a", 0, vec![10.0, 300.0, 100.0], 400.0),
                row("a", 1, vec![30.0, 0.0, 400.0], 400.0),
                row("b", 1, vec![50.0, 600.0, 0.0], 600.0),
                row("c", 2, vec![99.0, 0.0, 0.0], 0.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let index = NeighborhoodIndex::new(&strip()).unwrap();
        let hoods = index.neighbors(0.0);
        assert_eq!(hoods, vec![vec![0], vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_radius_reaches_adjacent_cells() {
        let index = NeighborhoodIndex::new(&strip()).unwrap();
        // Touching cells intersect any positive buffer
        let hoods = index.neighbors(0.1);
        assert_eq!(hoods[0], vec![0, 1]);
        assert_eq!(hoods[1], vec![0, 1, 2]);
        assert_eq!(hoods[3], vec![3]);

        // Cell 0 to cell 2 is one cell width (about 715 m)
        let hoods = index.neighbors(1.0);
        assert_eq!(hoods[0], vec![0, 1, 2]);
        assert_eq!(hoods[3], vec![3]);
    }

    #[test]
    fn test_radius_measures_gap_between_polygons() {
        let index = NeighborhoodIndex::new(&strip()).unwrap();
        // Cell 2 ends at 4.03, cell 3 starts at 4.50: about 33.6 km apart
        assert_eq!(index.neighbors(33.0)[3], vec![3]);
        assert_eq!(index.neighbors(34.0)[3], vec![2, 3]);
        assert_eq!(index.neighbors(34.0)[2], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_projected_regions_rejected() {
        let mut region = cell(0, 4.0, 50.0);
        region.geometry = MultiPolygon::new(vec![polygon![
            (x: 400_000.0, y: 100_000.0),
            (x: 401_000.0, y: 100_000.0),
            (x: 401_000.0, y: 101_000.0),
            (x: 400_000.0, y: 100_000.0),
        ]]);
        assert!(matches!(
            NeighborhoodIndex::new(&[region]),
            Err(SmapError::InvalidCrs(_))
        ));
    }

    #[test]
    fn test_identity_neighborhood_normalizes_categories() {
        let pre = pre_table();
        let table = aggregate_features(&pre, &[0, 1, 2], &[vec![0], vec![1], vec![2]], 0.0);

        assert_eq!(table.row(0), &[10.0, 0.75, 0.25]);
        // Two trajectories in region 1: mean of their values
        assert_eq!(table.row(1), &[40.0, 0.5, 0.5]);
        // Only a trajectory with zero total: every value is 0
        assert_eq!(table.row(2), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_smoothing_merges_trajectories_across_regions() {
        let pre = pre_table();
        let table = aggregate_features(&pre, &[0], &[vec![0, 1]], 1.0);
        // a: velocity mean of means 20, work 300/800, driving 500/800
        // b: velocity 50, work 1, driving 0
        let r = table.row(0);
        assert!((r[0] - 35.0).abs() < 1e-12);
        assert!((r[1] - (0.375 + 1.0) / 2.0).abs() < 1e-12);
        assert!((r[2] - 0.625 / 2.0).abs() < 1e-12);
        assert!(((r[1] + r[2]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_region_without_rows_is_zero() {
        let pre = pre_table();
        let table = aggregate_features(&pre, &[7], &[vec![7]], 0.0);
        assert_eq!(table.row(0), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_scaled_table_keeps_regions() {
        let table = aggregate_features(&pre_table(), &[0, 1, 2], &[vec![0], vec![1], vec![2]], 0.0);
        assert_eq!(table.column("velocity"), Some(vec![10.0, 40.0, 0.0]));

        let minmax = table.scaled(ColumnScaling::MinMax);
        assert_eq!(minmax.region_ids(), table.region_ids());
        assert_eq!(minmax.columns(), table.columns());
        assert_eq!(minmax.column("velocity"), Some(vec![0.25, 1.0, 0.0]));

        let quantile = table.scaled(ColumnScaling::Quantile);
        assert_eq!(quantile.column("velocity"), Some(vec![0.5, 1.0, 0.0]));
        assert_eq!(table.scaled(ColumnScaling::None), table);
    }

    #[test]
    fn test_feature_table_accessors_and_csv() {
        let table = FeatureTable::from_rows(
            vec!["x".to_string(), "y".to_string()],
            vec![vec![1.0, 2.0], vec![3.0, 4.5]],
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("y"), Some(vec![2.0, 4.5]));
        assert_eq!(table.matrix()[1], vec![3.0, 4.5]);

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "region_id,x,y\n0,1,2\n1,3,4.5\n");

        assert!(FeatureTable::from_rows(vec!["x".to_string()], vec![vec![1.0, 2.0]]).is_err());
    }
}
