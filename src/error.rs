//! Error types for the feature engine and the ordering methods.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building feature tables or ordering regions.
///
/// Data problems (a region nobody visited, a trajectory with no duration)
/// are not errors: they are absorbed as 0.0 values by the aggregation steps.
#[derive(Debug, Error)]
pub enum SmapError {
    /// An input or cache file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A CSV file could not be parsed or written.
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required column is absent from a CSV header.
    #[error("missing column `{column}` in {path}")]
    MissingField { path: PathBuf, column: String },

    /// A timestamp cell could not be parsed.
    #[error("malformed timestamp `{value}` at line {line} of {path}")]
    MalformedTimestamp {
        path: PathBuf,
        line: u64,
        value: String,
    },

    /// A numeric cell could not be parsed or is out of range.
    #[error("invalid value `{value}` for `{column}` at line {line} of {path}")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },

    /// A region file is not a usable polygon collection.
    #[error("invalid region file {path}: {message}")]
    InvalidRegionFile { path: PathBuf, message: String },

    /// Region geometries are not in a geographic (lon/lat) reference system.
    #[error("invalid coordinate reference system: {0}")]
    InvalidCrs(String),

    /// A feature name or dependency is not registered.
    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    /// Two features were registered under the same name.
    #[error("feature `{0}` is already registered")]
    DuplicateFeature(String),

    /// The feature dependency graph has a cycle.
    #[error("cyclic feature dependency involving `{0}`")]
    CyclicDependency(String),

    /// A point-table column required by a computation is absent or has the wrong kind.
    #[error("missing column `{0}` in point table")]
    MissingColumn(String),

    /// A feature produced a column whose length does not match the table.
    #[error("feature `{feature}` produced {actual} values for {expected} rows")]
    ColumnLength {
        feature: String,
        expected: usize,
        actual: usize,
    },

    /// No ordering method is registered under this name.
    #[error("unknown ordering method `{0}`")]
    UnknownMethod(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A JSON document (config or GeoJSON) could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external TSP solver binary could not be located or started.
    #[error("TSP solver `{0}` not found")]
    SolverNotFound(String),

    /// The external TSP solver exited unsuccessfully.
    #[error("TSP solver failed with {status}: {stderr}")]
    SolverFailed { status: String, stderr: String },

    /// The external TSP solver did not finish in time.
    #[error("TSP solver timed out after {0} seconds")]
    SolverTimeout(u64),

    /// The solver output is not a tour over the expected nodes.
    #[error("invalid TSP solution: {0}")]
    InvalidSolution(String),
}

impl SmapError {
    /// True for errors caused by inputs, configuration or registration.
    pub fn is_configuration(&self) -> bool {
        !self.is_external()
    }

    /// True for errors raised by the external solver process.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            SmapError::SolverNotFound(_)
                | SmapError::SolverFailed { .. }
                | SmapError::SolverTimeout(_)
                | SmapError::InvalidSolution(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SmapError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        SmapError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SmapError>;
