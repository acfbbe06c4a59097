//! # Feature Definitions
//!
//! A feature is a named per-point computation over a [`PointTable`]. It is
//! either numerical (one `f64` per point, averaged when aggregated) or
//! categorical (one label per point, pivoted into duration-weighted columns,
//! one column per category).
//!
//! Features declare the features they read as dependencies. The
//! [`FeatureRegistry`] turns these declarations into an execution order once,
//! rejecting unknown names and cycles up front, and then computes each
//! feature at most once per table: a feature whose column is already present
//! is skipped.
//!
//! ## Built-in features
//!
//! | Name | Kind | Depends on |
//! |------|------|------------|
//! | `distance` | numerical | - |
//! | `duration` | numerical | - |
//! | `velocity` | numerical | `distance` |
//! | `time usage` | categorical | `velocity` |

mod builtin;

pub use builtin::{Distance, Duration, TimeUsage, Velocity};

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::aggregate::ColumnKind;
use crate::error::{Result, SmapError};
use crate::preprocess::PointTable;

/// Whether a feature yields numbers or category labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numerical,
    Categorical,
}

/// A computed per-point column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Column::Numeric(_) => FeatureKind::Numerical,
            Column::Categorical(_) => FeatureKind::Categorical,
        }
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(v) => Some(v),
            Column::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[String]> {
        match self {
            Column::Categorical(v) => Some(v),
            Column::Numeric(_) => None,
        }
    }

    fn retain_mask(&mut self, keep: &[bool]) {
        fn apply<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut idx = 0;
            values.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
        }
        match self {
            Column::Numeric(v) => apply(v, keep),
            Column::Categorical(v) => apply(v, keep),
        }
    }
}

/// Point-level inputs available to every feature besides the table columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureContext<'a> {
    /// Externally supplied label per point ("" where no labelled region
    /// contains the point), aligned with the table rows.
    pub labels: Option<&'a [String]>,
}

/// A derivable per-point attribute.
pub trait Feature: Send + Sync {
    /// Column name written into the point table.
    fn name(&self) -> &str;

    fn kind(&self) -> FeatureKind;

    /// Names of features that must be computed first.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    /// Initial category labels of a categorical feature.
    fn categories(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether externally supplied point labels extend this feature's categories.
    fn absorbs_labels(&self) -> bool {
        false
    }

    /// Compute the column for every row of `table`.
    fn compute(&self, table: &PointTable, ctx: &FeatureContext<'_>) -> Result<Column>;
}

// ============================================================================
// Registry
// ============================================================================

/// The set of features computed into every point table.
pub struct FeatureRegistry {
    features: Vec<Box<dyn Feature>>,
    /// Category labels per categorical feature; grows as labels are seen
    categories: HashMap<String, Vec<String>>,
    /// Resolved execution order (indices into `features`)
    order: Option<Vec<usize>>,
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("features", &self.names())
            .field("categories", &self.categories)
            .finish()
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            features: Vec::new(),
            categories: HashMap::new(),
            order: None,
        }
    }

    /// Registry with the built-in `distance`, `duration`, `velocity` and
    /// `time usage` features.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.push(Box::new(Distance));
        registry.push(Box::new(Duration));
        registry.push(Box::new(Velocity));
        registry.push(Box::new(TimeUsage));
        registry
    }

    /// Register a feature. Fails if the name is taken.
    pub fn register<F: Feature + 'static>(&mut self, feature: F) -> Result<()> {
        if self.get(feature.name()).is_some() {
            return Err(SmapError::DuplicateFeature(feature.name().to_string()));
        }
        self.push(Box::new(feature));
        Ok(())
    }

    fn push(&mut self, feature: Box<dyn Feature>) {
        if feature.kind() == FeatureKind::Categorical {
            self.categories
                .insert(feature.name().to_string(), feature.categories());
        }
        self.features.push(feature);
        self.order = None;
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Feature> {
        self.features
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    /// Current category labels of a categorical feature.
    pub fn categories(&self, name: &str) -> Option<&[String]> {
        self.categories.get(name).map(|v| v.as_slice())
    }

    pub fn has_categorical(&self) -> bool {
        self.features
            .iter()
            .any(|f| f.kind() == FeatureKind::Categorical)
    }

    /// Resolve dependencies into an execution order.
    ///
    /// Fails with [`SmapError::UnknownFeature`] when a dependency is not
    /// registered and with [`SmapError::CyclicDependency`] on a cycle.
    pub fn resolve(&mut self) -> Result<&[usize]> {
        if self.order.is_none() {
            self.order = Some(self.topological_order()?);
        }
        Ok(self.order.as_deref().unwrap_or(&[]))
    }

    /// Feature names in the order they will be computed.
    pub fn execution_order(&mut self) -> Result<Vec<String>> {
        let order = self.resolve()?.to_vec();
        Ok(order
            .into_iter()
            .map(|i| self.features[i].name().to_string())
            .collect())
    }

    fn topological_order(&self) -> Result<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }

        fn visit(
            idx: usize,
            features: &[Box<dyn Feature>],
            index: &HashMap<&str, usize>,
            marks: &mut [Mark],
            order: &mut Vec<usize>,
        ) -> Result<()> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    return Err(SmapError::CyclicDependency(features[idx].name().to_string()))
                }
                Mark::New => {}
            }
            marks[idx] = Mark::Visiting;
            for dep in features[idx].dependencies() {
                let &dep_idx = index
                    .get(dep)
                    .ok_or_else(|| SmapError::UnknownFeature(dep.to_string()))?;
                visit(dep_idx, features, index, marks, order)?;
            }
            marks[idx] = Mark::Done;
            order.push(idx);
            Ok(())
        }

        let index: HashMap<&str, usize> = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name(), i))
            .collect();
        let mut marks = vec![Mark::New; self.features.len()];
        let mut order = Vec::with_capacity(self.features.len());
        for idx in 0..self.features.len() {
            visit(idx, &self.features, &index, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Compute every registered feature into `table`.
    ///
    /// Features whose column already exists are left untouched, so calling
    /// this twice is harmless. Categories are not extended here; see
    /// [`absorb_categories`](Self::absorb_categories).
    pub fn compute_all(&mut self, table: &mut PointTable) -> Result<()> {
        let order = self.resolve()?.to_vec();

        for idx in order {
            let feature = &self.features[idx];
            let name = feature.name().to_string();
            let kind = feature.kind();

            if table.has_column(&name) {
                debug!("[Features] `{}` already present, skipping", name);
                continue;
            }

            let column = {
                let ctx = FeatureContext {
                    labels: table.labels(),
                };
                feature.compute(table, &ctx)?
            };

            if column.len() != table.len() {
                return Err(SmapError::ColumnLength {
                    feature: name,
                    expected: table.len(),
                    actual: column.len(),
                });
            }
            if column.kind() != kind {
                return Err(SmapError::InvalidConfig(format!(
                    "feature `{name}` is {kind:?} but produced a {:?} column",
                    column.kind()
                )));
            }
            debug!("[Features] Computed `{}` for {} points", name, table.len());
            table.insert_column(name, column);
        }

        Ok(())
    }

    /// Extend the categories of categorical features from the rows of
    /// `table`: point labels first (for label-absorbing features), then the
    /// computed values, in order of first appearance.
    ///
    /// Run this once rows outside the study area are dropped, so a label
    /// seen only outside the grid never becomes a category column.
    pub fn absorb_categories(&mut self, table: &PointTable) {
        for feature in &self.features {
            if feature.kind() != FeatureKind::Categorical {
                continue;
            }
            let name = feature.name();
            let known = self.categories.entry(name.to_string()).or_default();
            if feature.absorbs_labels() {
                if let Some(labels) = table.labels() {
                    absorb(known, labels.iter().map(String::as_str));
                }
            }
            if let Some(values) = table.column(name).and_then(Column::as_categorical) {
                absorb(known, values.iter().map(String::as_str));
            }
        }
    }

    /// Output columns of the pre-feature table, in registration order.
    ///
    /// Numerical features contribute one column named after the feature;
    /// categorical features contribute one column per category.
    pub fn output_columns(&self) -> Vec<(String, ColumnKind)> {
        let mut columns = Vec::new();
        for feature in &self.features {
            match feature.kind() {
                FeatureKind::Numerical => {
                    columns.push((feature.name().to_string(), ColumnKind::Numeric))
                }
                FeatureKind::Categorical => {
                    for category in self.categories(feature.name()).unwrap_or(&[]) {
                        columns.push((category.clone(), ColumnKind::Category))
                    }
                }
            }
        }
        columns
    }

    /// Align the registry with the columns of a cached pre-feature table.
    ///
    /// Extra columns are categories absorbed from labels when the cache was
    /// written; they are appended to the label-absorbing categorical feature.
    /// Returns `false` when the cache cannot describe this feature set.
    pub fn reconcile_columns(&mut self, header: &[String]) -> bool {
        let expected = self.output_columns();
        if expected.iter().any(|(name, _)| !header.contains(name)) {
            return false;
        }
        let extras: Vec<&String> = header
            .iter()
            .filter(|h| !expected.iter().any(|(name, _)| name == *h))
            .collect();
        if extras.is_empty() {
            return true;
        }

        let target = self
            .features
            .iter()
            .find(|f| f.kind() == FeatureKind::Categorical && f.absorbs_labels())
            .map(|f| f.name().to_string());
        match target {
            Some(name) => {
                let known = self.categories.entry(name).or_default();
                absorb(known, extras.iter().map(|s| s.as_str()));
                true
            }
            None => false,
        }
    }
}

/// Append unseen non-empty labels in order of first appearance.
fn absorb<'a>(known: &mut Vec<String>, labels: impl Iterator<Item = &'a str>) {
    for label in labels {
        if !label.is_empty() && !known.iter().any(|k| k == label) {
            known.push(label.to_string());
        }
    }
}

pub(crate) fn retain_rows(column: &mut Column, keep: &[bool]) {
    column.retain_mask(keep);
}
