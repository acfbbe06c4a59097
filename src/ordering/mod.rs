//! # Region Ordering
//!
//! Interchangeable methods that turn a feature table into a one-dimensional
//! ordering of its regions.
//!
//! A method either seriates (returns a permutation of row indices so that
//! similar rows are adjacent) or clusters (returns one discrete label per
//! row). [`RegionOrder`] carries which of the two a result is, so callers
//! choose between a continuous colour scale and a discrete palette by
//! matching on it.
//!
//! | Name | Result | Row normalisation |
//! |------|--------|-------------------|
//! | `Optimal Leaf Ordering` | permutation | L2 |
//! | `Self-Organizing Maps` | clusters | L2 |
//! | `TSP based Seriation` | permutation | L2 |
//! | `TSP based Seriation (heuristic)` | permutation | L2 |
//! | `PCA` | permutation | L1 |

mod olo;
mod pca;
mod som;
mod tsp;

pub use olo::OptimalLeafOrdering;
pub use pca::PrincipalComponentOrdering;
pub use som::SelfOrganizingMap;
pub use tsp::{ConcordeSolver, GreedyTwoOptSolver, TspSeriation, TspSolver};

use std::fmt;

use crate::config::SmapConfig;
use crate::error::{Result, SmapError};
use crate::neighborhood::FeatureTable;
use crate::normalization::{euclidean, l2_rows};

/// Ordering produced by a method, over row positions of the feature table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOrder {
    /// Row positions from first to last.
    Permutation(Vec<usize>),
    /// Cluster label of each row.
    Clusters(Vec<usize>),
}

impl RegionOrder {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        match self {
            RegionOrder::Permutation(v) | RegionOrder::Clusters(v) => v,
        }
    }

    pub fn is_clustering(&self) -> bool {
        matches!(self, RegionOrder::Clusters(_))
    }

    /// Colour key of each row: its position in the permutation, or its
    /// cluster label.
    pub fn ranks(&self) -> Vec<usize> {
        match self {
            RegionOrder::Permutation(order) => {
                let mut ranks = vec![0; order.len()];
                for (rank, &row) in order.iter().enumerate() {
                    if let Some(slot) = ranks.get_mut(row) {
                        *slot = rank;
                    }
                }
                ranks
            }
            RegionOrder::Clusters(labels) => labels.clone(),
        }
    }
}

/// A seriation or clustering algorithm over feature table rows.
pub trait OrderingMethod: Send + Sync {
    /// Registry name, also used as the order cache key.
    fn name(&self) -> &str;

    /// Whether [`order`](Self::order) returns cluster labels.
    fn is_clustering(&self) -> bool;

    fn order(&self, table: &FeatureTable) -> Result<RegionOrder>;
}

/// Check that `order` is a permutation of `0..n`.
pub(crate) fn is_permutation(order: &[usize], n: usize) -> bool {
    if order.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &i in order {
        if i >= n || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

/// Dissimilarity between consecutive rows of a permutation.
///
/// Rows are compared after L2 normalisation; the result has one entry fewer
/// than the order.
pub fn adjacent_distances(table: &FeatureTable, order: &[usize]) -> Vec<f64> {
    let rows = l2_rows(&table.matrix());
    order
        .windows(2)
        .map(|w| euclidean(&rows[w[0]], &rows[w[1]]))
        .collect()
}

// ============================================================================
// Registry
// ============================================================================

/// Name of the method used when a caller does not pick one.
pub const DEFAULT_METHOD: &str = "Optimal Leaf Ordering";

/// Ordering methods by name.
pub struct OrderingRegistry {
    methods: Vec<Box<dyn OrderingMethod>>,
}

impl fmt::Debug for OrderingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

impl Default for OrderingRegistry {
    fn default() -> Self {
        Self::with_defaults(&SmapConfig::default())
    }
}

impl OrderingRegistry {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// All built-in methods, configured from `config`.
    pub fn with_defaults(config: &SmapConfig) -> Self {
        let mut registry = Self::new();
        registry.methods.push(Box::new(OptimalLeafOrdering));
        registry
            .methods
            .push(Box::new(SelfOrganizingMap::new(config.som.clone())));
        registry.methods.push(Box::new(TspSeriation::new(
            "TSP based Seriation",
            ConcordeSolver::new(config.solver.clone()),
            config.solver.distance_scale,
        )));
        registry.methods.push(Box::new(TspSeriation::new(
            "TSP based Seriation (heuristic)",
            GreedyTwoOptSolver,
            config.solver.distance_scale,
        )));
        registry.methods.push(Box::new(PrincipalComponentOrdering));
        registry
    }

    /// Add a method. Fails if the name is taken.
    pub fn register<M: OrderingMethod + 'static>(&mut self, method: M) -> Result<()> {
        if self.methods.iter().any(|m| m.name() == method.name()) {
            return Err(SmapError::InvalidConfig(format!(
                "ordering method `{}` is already registered",
                method.name()
            )));
        }
        self.methods.push(Box::new(method));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&dyn OrderingMethod> {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
            .ok_or_else(|| SmapError::UnknownMethod(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_invert_permutation() {
        let order = RegionOrder::Permutation(vec![2, 0, 1]);
        assert_eq!(order.ranks(), vec![1, 2, 0]);
        assert!(!order.is_clustering());

        let clusters = RegionOrder::Clusters(vec![4, 4, 1]);
        assert_eq!(clusters.ranks(), vec![4, 4, 1]);
        assert!(clusters.is_clustering());
    }

    #[test]
    fn test_is_permutation() {
        assert!(is_permutation(&[1, 0, 2], 3));
        assert!(!is_permutation(&[1, 1, 2], 3));
        assert!(!is_permutation(&[0, 1], 3));
        assert!(!is_permutation(&[0, 3, 1], 3));
    }

    #[test]
    fn test_registry_names_and_lookup() {
        let registry = OrderingRegistry::default();
        assert_eq!(
            registry.names(),
            vec![
                "Optimal Leaf Ordering",
                "Self-Organizing Maps",
                "TSP based Seriation",
                "TSP based Seriation (heuristic)",
                "PCA",
            ]
        );
        assert!(registry.get(DEFAULT_METHOD).is_ok());
        assert!(registry.get("Self-Organizing Maps").unwrap().is_clustering());
        assert!(matches!(
            registry.get("Spectral"),
            Err(SmapError::UnknownMethod(ref n)) if n == "Spectral"
        ));
        let mut registry = registry;
        assert!(registry.register(OptimalLeafOrdering).is_err());
    }

    #[test]
    fn test_adjacent_distances() {
        let table = FeatureTable::from_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 0.0], vec![0.0, 2.0], vec![3.0, 0.0]],
        )
        .unwrap();
        let d = adjacent_distances(&table, &[0, 2, 1]);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0], 0.0);
        assert!((d[1] - 2.0_f64.sqrt()).abs() < 1e-12);
    }
}
