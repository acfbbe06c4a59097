//! Row and column scaling for feature matrices.
//!
//! Ordering methods normalise rows so that regions are compared by the shape
//! of their feature profile rather than its magnitude. Column scalers map
//! each feature to `[0, 1]` for display.
//!
//! All functions leave all-zero rows and constant columns at zero instead of
//! producing NaN.

/// Scale every row to unit L1 norm.
pub fn l1_rows(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| scale_row(row, row.iter().map(|v| v.abs()).sum()))
        .collect()
}

/// Scale every row to unit L2 norm.
pub fn l2_rows(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| scale_row(row, row.iter().map(|v| v * v).sum::<f64>().sqrt()))
        .collect()
}

fn scale_row(row: &[f64], norm: f64) -> Vec<f64> {
    if norm > 0.0 && norm.is_finite() {
        row.iter().map(|v| v / norm).collect()
    } else {
        vec![0.0; row.len()]
    }
}

/// Column scaling applied to a feature table before display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnScaling {
    /// Values as aggregated
    #[default]
    None,
    /// [`min_max_columns`]
    MinMax,
    /// [`quantile_columns`]
    Quantile,
}

impl ColumnScaling {
    pub fn apply(self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        match self {
            ColumnScaling::None => rows.to_vec(),
            ColumnScaling::MinMax => min_max_columns(rows),
            ColumnScaling::Quantile => quantile_columns(rows),
        }
    }
}

/// Map every column linearly onto `[0, 1]`.
pub fn min_max_columns(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    map_columns(rows, |column| {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        column
            .iter()
            .map(|v| if span > 0.0 { (v - min) / span } else { 0.0 })
            .collect()
    })
}

/// Map every column onto `[0, 1]` by rank (empirical quantile).
///
/// Tied values share their average rank, so the result only depends on the
/// order of values, not their spacing.
pub fn quantile_columns(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    map_columns(rows, |column| {
        let n = column.len();
        if n < 2 {
            return vec![0.0; n];
        }
        let mut idx: Vec<usize> = (0..n).collect();
        idx.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

        let mut out = vec![0.0; n];
        let mut start = 0;
        while start < n {
            let mut end = start + 1;
            while end < n && column[idx[end]] == column[idx[start]] {
                end += 1;
            }
            let rank = (start + end - 1) as f64 / 2.0;
            for &i in &idx[start..end] {
                out[i] = rank / (n - 1) as f64;
            }
            start = end;
        }
        out
    })
}

fn map_columns(rows: &[Vec<f64>], f: impl Fn(&[f64]) -> Vec<f64>) -> Vec<Vec<f64>> {
    let width = rows.first().map_or(0, Vec::len);
    let mut out = vec![vec![0.0; width]; rows.len()];
    for j in 0..width {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        for (i, v) in f(&column).into_iter().enumerate() {
            out[i][j] = v;
        }
    }
    out
}

/// Euclidean distance between two rows.
#[inline]
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Full symmetric matrix of pairwise Euclidean distances.
pub fn pairwise_distances(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut d = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let v = euclidean(&rows[i], &rows[j]);
            d[i][j] = v;
            d[j][i] = v;
        }
    }
    d
}
