//! # Pre-Aggregation
//!
//! Collapses the per-point table into one row per (trajectory, region):
//!
//! - numerical features are averaged over the points of the group
//! - categorical features are pivoted into one column per category holding
//!   the summed `duration` of the points in that category
//!
//! Every row also carries a `total`: the sum of the category columns, or the
//! sum of all columns when no categorical feature is registered. Trajectories
//! whose neighbourhood total is zero are later ignored by the smoothing step.
//!
//! Building this table is the expensive step of the pipeline, so it is
//! persisted as CSV under a key derived from the input files and the feature
//! set.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::InputFiles;
use crate::error::{Result, SmapError};
use crate::features::{FeatureKind, FeatureRegistry};
use crate::preprocess::PointTable;

/// How a pre-feature column is aggregated and smoothed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Mean of a numerical feature.
    Numeric,
    /// Summed duration spent in one category of a categorical feature.
    Category,
}

/// One (trajectory, region) group.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFeatureRow {
    pub trajectory_id: String,
    pub region_id: usize,
    /// One value per table column
    pub values: Vec<f64>,
    pub total: f64,
}

/// Per-(trajectory, region) feature summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFeatureTable {
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<PreFeatureRow>,
}

impl PreFeatureTable {
    /// Assemble a table from already aggregated rows.
    pub fn new(columns: Vec<(String, ColumnKind)>, rows: Vec<PreFeatureRow>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(SmapError::InvalidConfig(format!(
                "pre-feature row ({}, {}) has {} values for {} columns",
                row.trajectory_id,
                row.region_id,
                row.values.len(),
                columns.len()
            )));
        }
        let (columns, kinds) = columns.into_iter().unzip();
        Ok(Self {
            columns,
            kinds,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }

    pub fn rows(&self) -> &[PreFeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Row indices grouped by region id.
    pub fn rows_by_region(&self) -> HashMap<usize, Vec<usize>> {
        let mut index: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            index.entry(row.region_id).or_default().push(i);
        }
        index
    }

    /// Write the table as CSV: `id,region_id,<columns>,total`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SmapError::io(parent, e))?;
        }

        let mut writer = csv::Writer::from_path(path).map_err(|e| SmapError::csv(path, e))?;
        let mut header = vec!["id".to_string(), "region_id".to_string()];
        header.extend(self.columns.iter().cloned());
        header.push("total".to_string());
        writer.write_record(&header).map_err(|e| SmapError::csv(path, e))?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(row.values.len() + 3);
            record.push(row.trajectory_id.clone());
            record.push(row.region_id.to_string());
            record.extend(row.values.iter().map(f64::to_string));
            record.push(row.total.to_string());
            writer.write_record(&record).map_err(|e| SmapError::csv(path, e))?;
        }
        writer.flush().map_err(|e| SmapError::io(path, e))?;

        debug!("[PreAggregate] Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }

    /// Read a cached table written by [`save`](Self::save).
    ///
    /// Returns `Ok(None)` when the file is absent or does not cover the
    /// registry's feature columns. Category columns the registry has not
    /// seen yet (labels absorbed when the cache was written) are absorbed.
    pub fn load(path: impl AsRef<Path>, registry: &mut FeatureRegistry) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(path).map_err(|e| SmapError::csv(path, e))?;
        let header: Vec<String> = reader
            .headers()
            .map_err(|e| SmapError::csv(path, e))?
            .iter()
            .map(str::to_string)
            .collect();

        let position = |name: &str| header.iter().position(|h| h == name);
        let (Some(id_col), Some(region_col), Some(total_col)) =
            (position("id"), position("region_id"), position("total"))
        else {
            warn!("[PreAggregate] Ignoring cache {}: missing key columns", path.display());
            return Ok(None);
        };

        let feature_header: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| ![id_col, region_col, total_col].contains(i))
            .map(|(_, h)| h.clone())
            .collect();
        if !registry.reconcile_columns(&feature_header) {
            warn!(
                "[PreAggregate] Cache {} does not match the registered features, rebuilding",
                path.display()
            );
            return Ok(None);
        }

        let columns = registry.output_columns();
        let mut sources = Vec::with_capacity(columns.len());
        for (name, _) in &columns {
            match position(name) {
                Some(i) => sources.push(i),
                None => return Ok(None),
            }
        }

        let parse = |record: &csv::StringRecord, col: usize| -> Result<f64> {
            let cell = record.get(col).unwrap_or("");
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if cell.is_empty() {
                return Ok(0.0);
            }
            cell.parse::<f64>().map_err(|_| SmapError::InvalidValue {
                path: path.to_path_buf(),
                line,
                column: header[col].clone(),
                value: cell.to_string(),
            })
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| SmapError::csv(path, e))?;
            let region_cell = record.get(region_col).unwrap_or("");
            let region_id = region_cell.parse::<usize>().map_err(|_| SmapError::InvalidValue {
                path: path.to_path_buf(),
                line: record.position().map(|p| p.line()).unwrap_or(0),
                column: "region_id".to_string(),
                value: region_cell.to_string(),
            })?;
            let values = sources
                .iter()
                .map(|&col| parse(&record, col))
                .collect::<Result<Vec<f64>>>()?;
            rows.push(PreFeatureRow {
                trajectory_id: record.get(id_col).unwrap_or("").to_string(),
                region_id,
                values,
                total: parse(&record, total_col)?,
            });
        }

        info!("[PreAggregate] Loaded {} cached rows from {}", rows.len(), path.display());
        Self::new(columns, rows).map(Some)
    }
}

// ============================================================================
// Building
// ============================================================================

/// Where a registered feature's values land in the pre-feature row.
enum Source<'a> {
    Numeric {
        values: &'a [f64],
        column: usize,
    },
    Category {
        values: &'a [String],
        columns: HashMap<&'a str, usize>,
    },
}

#[derive(Debug, Clone)]
struct Group {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

/// Aggregate a preprocessed point table into the pre-feature table.
///
/// Every registered feature must already be computed into `table`.
pub fn build_pre_features(table: &PointTable, registry: &FeatureRegistry) -> Result<PreFeatureTable> {
    let start = Instant::now();
    let columns = registry.output_columns();
    let width = columns.len();
    let duration = table.numeric("duration")?;

    let mut sources = Vec::new();
    let mut offset = 0;
    for name in registry.names() {
        let Some(feature) = registry.get(name) else {
            continue;
        };
        match feature.kind() {
            FeatureKind::Numerical => {
                sources.push(Source::Numeric {
                    values: table.numeric(name)?,
                    column: offset,
                });
                offset += 1;
            }
            FeatureKind::Categorical => {
                let categories = registry.categories(name).unwrap_or(&[]);
                let columns = categories
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_str(), offset + i))
                    .collect();
                sources.push(Source::Category {
                    values: table.categorical(name)?,
                    columns,
                });
                offset += categories.len();
            }
        }
    }

    let mut groups: BTreeMap<(&str, usize), Group> = BTreeMap::new();
    for (row, region) in table.region_ids().iter().enumerate() {
        let Some(region_id) = *region else {
            continue;
        };
        let group = groups
            .entry((table.trajectory_ids()[row].as_str(), region_id))
            .or_insert_with(|| Group {
                sums: vec![0.0; width],
                counts: vec![0; width],
            });

        for source in &sources {
            match source {
                Source::Numeric { values, column } => {
                    let v = values[row];
                    if !v.is_nan() {
                        group.sums[*column] += v;
                        group.counts[*column] += 1;
                    }
                }
                Source::Category { values, columns } => {
                    if let Some(&column) = columns.get(values[row].as_str()) {
                        group.sums[column] += duration[row];
                    }
                }
            }
        }
    }

    let has_categories = columns.iter().any(|(_, kind)| *kind == ColumnKind::Category);
    let rows: Vec<PreFeatureRow> = groups
        .into_iter()
        .map(|((trajectory_id, region_id), group)| {
            let values: Vec<f64> = columns
                .iter()
                .enumerate()
                .map(|(j, (_, kind))| match kind {
                    ColumnKind::Numeric if group.counts[j] > 0 => {
                        group.sums[j] / group.counts[j] as f64
                    }
                    ColumnKind::Numeric => 0.0,
                    ColumnKind::Category => group.sums[j],
                })
                .collect();
            let total = values
                .iter()
                .zip(&columns)
                .filter(|(_, (_, kind))| !has_categories || *kind == ColumnKind::Category)
                .map(|(v, _)| v)
                .sum();
            PreFeatureRow {
                trajectory_id: trajectory_id.to_string(),
                region_id,
                values,
                total,
            }
        })
        .collect();

    info!(
        "[PreAggregate] {} (trajectory, region) rows from {} points in {:?}",
        rows.len(),
        table.len(),
        start.elapsed()
    );
    PreFeatureTable::new(columns, rows)
}

/// Cache file name for an input combination and feature set.
///
/// Built from the input file names and the registered feature names, so a
/// different input file or feature set never reuses a stale cache.
pub fn cache_key(inputs: &InputFiles, registry: &FeatureRegistry) -> String {
    let file_name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let mut parts = vec![file_name(&inputs.trajectories), file_name(&inputs.regions)];
    if let Some(labels) = &inputs.labels {
        parts.push(file_name(labels));
    }
    parts.extend(registry.names().into_iter().map(str::to_string));

    let key: String = parts
        .join("-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{key}.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Column, Feature, FeatureContext};
    use crate::io::parse_timestamp;
    use crate::preprocess::{preprocess, RegionIndex};
    use crate::{GpsPoint, Region, TrajectoryPoint};
    use geo::{polygon, MultiPolygon};

    fn cell(id: usize, lon: f64) -> Region {
        let p = polygon![
            (x: lon, y: 50.0),
            (x: lon + 0.1, y: 50.0),
            (x: lon + 0.1, y: 50.1),
            (x: lon, y: 50.1),
            (x: lon, y: 50.0),
        ];
        Region {
            id,
            geometry: MultiPolygon::new(vec![p]),
            label: None,
        }
    }

    fn point(id: &str, ts: &str, lat: f64, lon: f64) -> TrajectoryPoint {
        TrajectoryPoint {
            trajectory_id: id.to_string(),
            timestamp: parse_timestamp(ts).unwrap(),
            position: GpsPoint::new(lat, lon),
        }
    }

    fn sample() -> (PointTable, FeatureRegistry) {
        let regions = RegionIndex::new(vec![cell(0, 4.0), cell(1, 4.1)]);
        let mut registry = FeatureRegistry::with_defaults();
        let table = preprocess(
            vec![
                point("a", "2021-03-01 08:00:00", 50.05, 4.05),
                point("a", "2021-03-01 08:20:00", 50.05, 4.05),
                point("a", "2021-03-01 08:40:00", 50.05, 4.15),
                point("b", "2021-03-01 09:00:00", 50.05, 4.15),
                point("b", "2021-03-01 09:05:00", 50.05, 4.15),
            ],
            &regions,
            None,
            &mut registry,
        )
        .unwrap();
        (table, registry)
    }

    #[test]
    fn test_groups_by_trajectory_and_region() {
        let (table, registry) = sample();
        let pre = build_pre_features(&table, &registry).unwrap();

        let keys: Vec<(&str, usize)> = pre
            .rows()
            .iter()
            .map(|r| (r.trajectory_id.as_str(), r.region_id))
            .collect();
        assert_eq!(keys, vec![("a", 0), ("a", 1), ("b", 1)]);
    }

    #[test]
    fn test_numeric_mean_and_category_durations() {
        let (table, registry) = sample();
        let pre = build_pre_features(&table, &registry).unwrap();
        let duration = pre.column_index("duration").unwrap();
        let work = pre.column_index("work").unwrap();
        let driving = pre.column_index("driving").unwrap();
        let congestion = pre.column_index("congestion").unwrap();

        // A 20 minute stop, then 7 km in 20 minutes towards region 1
        let a0 = &pre.rows()[0];
        assert_eq!(a0.values[duration], 1200.0);
        assert_eq!(a0.values[work], 1200.0);
        assert_eq!(a0.values[driving], 1200.0);
        assert_eq!(a0.total, 2400.0);

        // A five minute stop is congestion; the last point has no duration
        let b1 = &pre.rows()[2];
        assert_eq!(b1.values[congestion], 300.0);
        assert_eq!(b1.total, 300.0);
    }

    #[test]
    fn test_total_without_categorical_features() {
        let (table, _) = sample();
        let mut registry = FeatureRegistry::new();
        registry.register(crate::features::Distance).unwrap();
        registry.register(crate::features::Duration).unwrap();
        let pre = build_pre_features(&table, &registry).unwrap();
        let row = &pre.rows()[0];
        assert_eq!(row.total, row.values.iter().sum::<f64>());
    }

    #[test]
    fn test_cache_round_trip() {
        let (table, mut registry) = sample();
        let pre = build_pre_features(&table, &registry).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.csv");

        pre.save(&path).unwrap();
        let loaded = PreFeatureTable::load(&path, &mut registry).unwrap().unwrap();
        assert_eq!(loaded, pre);
    }

    #[test]
    fn test_missing_cache_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = FeatureRegistry::with_defaults();
        let loaded = PreFeatureTable::load(dir.path().join("absent.csv"), &mut registry).unwrap();
        assert!(loaded.is_none());
    }

    struct Constant;

    impl Feature for Constant {
        fn name(&self) -> &str {
            "constant"
        }
        fn kind(&self) -> FeatureKind {
            FeatureKind::Numerical
        }
        fn compute(&self, table: &PointTable, _ctx: &FeatureContext<'_>) -> Result<Column> {
            Ok(Column::Numeric(vec![1.0; table.len()]))
        }
    }

    #[test]
    fn test_stale_cache_is_rejected() {
        let (table, registry) = sample();
        let pre = build_pre_features(&table, &registry).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");
        pre.save(&path).unwrap();

        let mut extended = FeatureRegistry::with_defaults();
        extended.register(Constant).unwrap();
        assert!(PreFeatureTable::load(&path, &mut extended).unwrap().is_none());
    }

    #[test]
    fn test_cache_key_tracks_inputs_and_features() {
        let inputs = InputFiles::new("data/trips.csv", "grids/grid 1.geojson");
        let registry = FeatureRegistry::with_defaults();
        let key = cache_key(&inputs, &registry);
        assert_eq!(
            key,
            "trips.csv-grid_1.geojson-distance-duration-velocity-time_usage.csv"
        );

        let labelled = inputs.clone().with_labels("pois.geojson");
        assert_ne!(cache_key(&labelled, &registry), key);

        let mut extended = FeatureRegistry::with_defaults();
        extended.register(Constant).unwrap();
        assert_ne!(cache_key(&inputs, &extended), key);
    }
}
