//! Self-organizing map clustering.
//!
//! Trains a `width x height` grid of units on the L2-normalised rows and
//! labels each row with the x coordinate of its best-matching unit. With the
//! default 20 x 1 strip, labels are positions along a line, so neighbouring
//! labels hold similar regions.
//!
//! Training presents rows in sequence (`t mod n`) and decays the learning
//! rate and neighbourhood spread as `v / (1 + t / (T / 2))`. Weights start
//! uniformly random, so results depend on [`SomConfig::seed`]; without a
//! seed two runs may label the same table differently.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{OrderingMethod, RegionOrder};
use crate::config::SomConfig;
use crate::error::Result;
use crate::neighborhood::FeatureTable;
use crate::normalization::l2_rows;

/// Clustering by a trained self-organizing map.
#[derive(Debug, Clone)]
pub struct SelfOrganizingMap {
    config: SomConfig,
}

impl SelfOrganizingMap {
    pub fn new(config: SomConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SomConfig {
        &self.config
    }
}

impl Default for SelfOrganizingMap {
    fn default() -> Self {
        Self::new(SomConfig::default())
    }
}

impl OrderingMethod for SelfOrganizingMap {
    fn name(&self) -> &str {
        "Self-Organizing Maps"
    }

    fn is_clustering(&self) -> bool {
        true
    }

    fn order(&self, table: &FeatureTable) -> Result<RegionOrder> {
        let rows = l2_rows(&table.matrix());
        if rows.is_empty() {
            return Ok(RegionOrder::Clusters(Vec::new()));
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut grid = Grid::random(
            self.config.width.max(1),
            self.config.height.max(1),
            table.columns().len(),
            &mut rng,
        );
        grid.train(&rows, &self.config);

        let labels: Vec<usize> = rows.iter().map(|row| grid.winner(row).0).collect();
        debug!(
            "[Ordering] SOM {}x{} labelled {} rows",
            grid.width,
            grid.height,
            labels.len()
        );
        Ok(RegionOrder::Clusters(labels))
    }
}

struct Grid {
    width: usize,
    height: usize,
    /// Unit (x, y) lives at `weights[x * height + y]`
    weights: Vec<Vec<f64>>,
}

impl Grid {
    /// Uniform weights in [-1, 1), each scaled to unit length.
    fn random(width: usize, height: usize, dim: usize, rng: &mut StdRng) -> Self {
        let weights = (0..width * height)
            .map(|_| {
                let w: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let norm = w.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    w.into_iter().map(|v| v / norm).collect()
                } else {
                    w
                }
            })
            .collect();
        Self {
            width,
            height,
            weights,
        }
    }

    /// Grid coordinates of the unit closest to `row`.
    fn winner(&self, row: &[f64]) -> (usize, usize) {
        let mut best = (f64::INFINITY, 0);
        for (u, w) in self.weights.iter().enumerate() {
            let d: f64 = w.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum();
            if d < best.0 {
                best = (d, u);
            }
        }
        (best.1 / self.height, best.1 % self.height)
    }

    fn train(&mut self, rows: &[Vec<f64>], config: &SomConfig) {
        let half = config.iterations as f64 / 2.0;
        for t in 0..config.iterations {
            let row = &rows[t % rows.len()];
            let (cx, cy) = self.winner(row);
            let decay = 1.0 + t as f64 / half;
            let eta = config.learning_rate / decay;
            let sigma = config.sigma / decay;
            let spread = 2.0 * sigma * sigma;

            for x in 0..self.width {
                let gx = (-((x as f64 - cx as f64).powi(2)) / spread).exp();
                for y in 0..self.height {
                    let gy = (-((y as f64 - cy as f64).powi(2)) / spread).exp();
                    let g = gx * gy * eta;
                    for (w, v) in self.weights[x * self.height + y].iter_mut().zip(row) {
                        *w += g * (v - *w);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> SelfOrganizingMap {
        SelfOrganizingMap::new(SomConfig {
            seed: Some(seed),
            ..SomConfig::default()
        })
    }

    fn table() -> FeatureTable {
        let rows = vec![
            vec![1.0, 0.0, 0.1],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.2],
            vec![0.1, 0.8, 0.1],
            vec![0.0, 0.1, 1.0],
            vec![1.0, 0.0, 0.1],
        ];
        FeatureTable::from_rows(vec!["a".into(), "b".into(), "c".into()], rows).unwrap()
    }

    #[test]
    fn test_one_label_per_row_within_grid() {
        let order = seeded(7).order(&table()).unwrap();
        assert!(order.is_clustering());
        assert_eq!(order.len(), 6);
        assert!(order.as_slice().iter().all(|&l| l < 20));
    }

    #[test]
    fn test_seed_makes_training_reproducible() {
        let a = seeded(42).order(&table()).unwrap();
        let b = seeded(42).order(&table()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_rows_share_a_label() {
        let labels = seeded(3).order(&table()).unwrap();
        assert_eq!(labels.as_slice()[0], labels.as_slice()[5]);
    }

    #[test]
    fn test_empty_table() {
        let empty = FeatureTable::from_rows(vec!["a".into()], vec![]).unwrap();
        assert!(seeded(1).order(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_two_dimensional_grid_labels_x() {
        let som = SelfOrganizingMap::new(SomConfig {
            width: 3,
            height: 4,
            seed: Some(9),
            ..SomConfig::default()
        });
        let order = som.order(&table()).unwrap();
        assert!(order.as_slice().iter().all(|&l| l < 3));
    }
}
