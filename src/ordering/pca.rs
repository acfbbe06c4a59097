//! Ordering by the first principal component.

use log::debug;

use super::{OrderingMethod, RegionOrder};
use crate::error::Result;
use crate::neighborhood::FeatureTable;
use crate::normalization::l1_rows;

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;

/// Sorts L1-normalised rows by their projection on the first principal
/// component. The component's sign is fixed so that its largest entry is
/// positive, which makes the order deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalComponentOrdering;

impl OrderingMethod for PrincipalComponentOrdering {
    fn name(&self) -> &str {
        "PCA"
    }

    fn is_clustering(&self) -> bool {
        false
    }

    fn order(&self, table: &FeatureTable) -> Result<RegionOrder> {
        let rows = l1_rows(&table.matrix());
        let scores = first_component_scores(&rows);

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        debug!("[Ordering] PCA ordered {} rows", order.len());
        Ok(RegionOrder::Permutation(order))
    }
}

/// Projection of each centred row on the first principal axis.
fn first_component_scores(rows: &[Vec<f64>]) -> Vec<f64> {
    let n = rows.len();
    let dim = rows.first().map_or(0, Vec::len);
    if n == 0 || dim == 0 {
        return vec![0.0; n];
    }

    let mut mean = vec![0.0; dim];
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n as f64;
        }
    }
    let centred: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| row.iter().zip(&mean).map(|(v, m)| v - m).collect())
        .collect();

    let mut cov = vec![vec![0.0; dim]; dim];
    for row in &centred {
        for a in 0..dim {
            for b in 0..dim {
                cov[a][b] += row[a] * row[b];
            }
        }
    }

    let axis = dominant_eigenvector(&cov);
    centred
        .iter()
        .map(|row| row.iter().zip(&axis).map(|(v, a)| v * a).sum())
        .collect()
}

/// Power iteration on a symmetric positive semi-definite matrix.
///
/// Starts from the matrix column with the largest norm. Returns the zero
/// vector for a zero matrix.
fn dominant_eigenvector(matrix: &[Vec<f64>]) -> Vec<f64> {
    let dim = matrix.len();
    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();

    let mut v = matrix
        .iter()
        .max_by(|a, b| norm(a).total_cmp(&norm(b)))
        .cloned()
        .unwrap_or_default();
    let start = norm(&v);
    if !(start > 0.0) {
        return vec![0.0; dim];
    }
    v.iter_mut().for_each(|x| *x /= start);

    for _ in 0..MAX_ITERATIONS {
        let mut next: Vec<f64> = matrix
            .iter()
            .map(|row| row.iter().zip(&v).map(|(a, b)| a * b).sum())
            .collect();
        let len = norm(&next);
        if !(len > 0.0) {
            break;
        }
        next.iter_mut().for_each(|x| *x /= len);
        let delta: f64 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        if delta < TOLERANCE {
            break;
        }
    }

    let mut pivot = 0;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[pivot].abs() {
            pivot = i;
        }
    }
    if v[pivot] < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    v
}
