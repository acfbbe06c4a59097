//! Shared fixtures: scratch GeoJSON grids and trajectory CSV files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use seriation_map::{InputFiles, SmapConfig};
use tempfile::TempDir;

/// Cell width in degrees; about 7 km east-west at latitude 50.
pub const CELL: f64 = 0.1;

/// Scratch directory holding the input files and the cache.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a GeoJSON row of `cells` square cells starting at (4.0, 50.0).
    pub fn grid(&self, name: &str, cells: usize) -> PathBuf {
        let features: Vec<String> = (0..cells)
            .map(|i| {
                let x0 = 4.0 + i as f64 * CELL;
                let x1 = 4.0 + (i + 1) as f64 * CELL;
                feature(&square(x0, 50.0, x1, 50.0 + CELL), None)
            })
            .collect();
        self.write(name, &collection(&features))
    }

    /// Write labelled regions: `(label, min lon, min lat, size)`.
    pub fn labels(&self, name: &str, zones: &[(&str, f64, f64, f64)]) -> PathBuf {
        let features: Vec<String> = zones
            .iter()
            .map(|&(label, x0, y0, size)| feature(&square(x0, y0, x0 + size, y0 + size), Some(label)))
            .collect();
        self.write(name, &collection(&features))
    }

    /// Write a trajectory CSV: `(id, timestamp, lat, lon)` rows.
    pub fn trips(&self, name: &str, rows: &[(&str, &str, f64, f64)]) -> PathBuf {
        let mut text = String::from("id,lat,lon,daytime\n");
        for (id, ts, lat, lon) in rows {
            text.push_str(&format!("{id},{lat},{lon},{ts}\n"));
        }
        self.write(name, &text)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Default configuration with the cache inside the fixture directory.
    pub fn config(&self) -> SmapConfig {
        SmapConfig {
            cache_dir: Some(self.path("cached")),
            ..SmapConfig::default()
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path("cached")
    }
}

pub fn inputs(trips: &Path, grid: &Path) -> InputFiles {
    InputFiles::new(trips, grid)
}

fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
    format!("[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]")
}

fn feature(coordinates: &str, label: Option<&str>) -> String {
    let properties = match label {
        Some(l) => format!(r#"{{"label":"{l}"}}"#),
        None => "{}".to_string(),
    };
    format!(
        r#"{{"type":"Feature","properties":{properties},"geometry":{{"type":"Polygon","coordinates":{coordinates}}}}}"#
    )
}

fn collection(features: &[String]) -> String {
    format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    )
}
