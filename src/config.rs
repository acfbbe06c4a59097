//! Engine configuration.
//!
//! All tuning knobs live in [`SmapConfig`]. Every field has a default, so a
//! JSON file only needs to name the values it overrides:
//!
//! ```json
//! { "radius_km": 5.0, "fields": { "timestamp": "time" }, "som": { "seed": 7 } }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmapError};

/// Column names of the trajectory CSV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    /// Trajectory identifier column. Default: "id"
    pub id: String,
    /// Latitude column (degrees). Default: "lat"
    pub lat: String,
    /// Longitude column (degrees). Default: "lon"
    pub lon: String,
    /// Timestamp column. Default: "daytime"
    pub timestamp: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            lat: "lat".to_string(),
            lon: "lon".to_string(),
            timestamp: "daytime".to_string(),
        }
    }
}

/// Settings for the external TSP solver used by seriation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Explicit path to the solver binary. When `None`, `concorde` is looked
    /// up on the `PATH`.
    pub binary: Option<PathBuf>,
    /// Kill the solver after this many seconds; 0 waits indefinitely.
    /// Default: 300
    pub timeout_secs: u64,
    /// Multiplier applied to distances before truncation to integers.
    /// Default: 1000.0
    pub distance_scale: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: 300,
            distance_scale: 1000.0,
        }
    }
}

/// Self-organizing map training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SomConfig {
    /// Number of units along the labelled axis. Default: 20
    pub width: usize,
    /// Number of units across the strip. Default: 1
    pub height: usize,
    /// Initial neighbourhood spread. Default: 0.6
    pub sigma: f64,
    /// Initial learning rate. Default: 0.5
    pub learning_rate: f64,
    /// Training iterations (one sample per iteration). Default: 1000
    pub iterations: usize,
    /// Seed for weight initialisation. `None` draws from OS entropy, making
    /// training non-reproducible.
    pub seed: Option<u64>,
}

impl Default for SomConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 1,
            sigma: 0.6,
            learning_rate: 0.5,
            iterations: 1000,
            seed: None,
        }
    }
}

/// Configuration for the [`Smap`](crate::Smap) engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmapConfig {
    /// Trajectory CSV column names.
    pub fields: FieldNames,
    /// Initial smoothing radius in kilometres. Default: 0.0 (no smoothing)
    pub radius_km: f64,
    /// Directory for pre-feature table cache files. `None` disables the
    /// disk cache. Default: "cached"
    pub cache_dir: Option<PathBuf>,
    /// External TSP solver settings.
    pub solver: SolverConfig,
    /// Self-organizing map settings.
    pub som: SomConfig,
}

impl Default for SmapConfig {
    fn default() -> Self {
        Self {
            fields: FieldNames::default(),
            radius_km: 0.0,
            cache_dir: Some(PathBuf::from("cached")),
            solver: SolverConfig::default(),
            som: SomConfig::default(),
        }
    }
}

impl SmapConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SmapError::io(path, e))?;
        let config: SmapConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is in range.
    pub fn validate(&self) -> Result<()> {
        validate_radius(self.radius_km)?;
        if self.som.width == 0 || self.som.height == 0 {
            return Err(SmapError::InvalidConfig(
                "self-organizing map must have at least one unit".to_string(),
            ));
        }
        if !(self.som.sigma > 0.0) || !(self.som.learning_rate > 0.0) {
            return Err(SmapError::InvalidConfig(
                "self-organizing map sigma and learning rate must be positive".to_string(),
            ));
        }
        if !(self.solver.distance_scale > 0.0) || !self.solver.distance_scale.is_finite() {
            return Err(SmapError::InvalidConfig(format!(
                "solver distance scale must be positive, got {}",
                self.solver.distance_scale
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_radius(radius_km: f64) -> Result<()> {
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(SmapError::InvalidConfig(format!(
            "radius must be a non-negative number of kilometres, got {radius_km}"
        )));
    }
    Ok(())
}

/// Paths of the engine's input files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFiles {
    /// Trajectory CSV.
    pub trajectories: PathBuf,
    /// Base region partition (GeoJSON).
    pub regions: PathBuf,
    /// Optional labelled regions (GeoJSON with a `label` property).
    pub labels: Option<PathBuf>,
}

impl InputFiles {
    pub fn new(trajectories: impl Into<PathBuf>, regions: impl Into<PathBuf>) -> Self {
        Self {
            trajectories: trajectories.into(),
            regions: regions.into(),
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: impl Into<PathBuf>) -> Self {
        self.labels = Some(labels.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SmapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fields.timestamp, "daytime");
        assert_eq!(config.som.width, 20);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SmapConfig =
            serde_json::from_str(r#"{ "radius_km": 2.5, "fields": { "timestamp": "time" } }"#)
                .unwrap();
        assert_eq!(config.radius_km, 2.5);
        assert_eq!(config.fields.timestamp, "time");
        assert_eq!(config.fields.id, "id");
        assert_eq!(config.solver.timeout_secs, 300);
    }

    #[test]
    fn test_negative_radius_rejected() {
        let config = SmapConfig {
            radius_km: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SmapError::InvalidConfig(_))));
        assert!(validate_radius(f64::NAN).is_err());
    }

    #[test]
    fn test_empty_som_rejected() {
        let mut config = SmapConfig::default();
        config.som.height = 0;
        assert!(config.validate().is_err());
    }
}
