//! Ward hierarchical clustering followed by optimal leaf ordering.
//!
//! The dendrogram fixes which rows may be adjacent; optimal leaf ordering
//! then flips subtrees so that the sum of distances between neighbouring
//! leaves is minimal (Bar-Joseph, Gifford and Jaakkola, 2001). Clustering
//! is O(n^2) and the leaf ordering O(n^3) in time; both need O(n^2) memory.

use log::debug;

use super::{OrderingMethod, RegionOrder};
use crate::error::Result;
use crate::neighborhood::FeatureTable;
use crate::normalization::{l2_rows, pairwise_distances};

/// Seriation by optimal leaf ordering of a Ward dendrogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimalLeafOrdering;

impl OrderingMethod for OptimalLeafOrdering {
    fn name(&self) -> &str {
        "Optimal Leaf Ordering"
    }

    fn is_clustering(&self) -> bool {
        false
    }

    fn order(&self, table: &FeatureTable) -> Result<RegionOrder> {
        let rows = l2_rows(&table.matrix());
        let n = rows.len();
        if n < 3 {
            return Ok(RegionOrder::Permutation((0..n).collect()));
        }

        let dist = pairwise_distances(&rows);
        let dendrogram = Dendrogram::ward(&dist);
        let order = dendrogram.optimal_leaf_order(&dist);
        debug!("[Ordering] Optimal leaf ordering of {} rows", n);
        Ok(RegionOrder::Permutation(order))
    }
}

/// Binary merge tree over `n` leaves. Node `n + k` is the k-th merge.
#[derive(Debug, Clone)]
struct Dendrogram {
    n: usize,
    children: Vec<(usize, usize)>,
    /// Leaves in the order of a depth-first walk
    leaves: Vec<usize>,
    /// Position of each leaf in `leaves`
    position: Vec<usize>,
    /// Half-open range of each node's leaves in `leaves`
    span: Vec<(usize, usize)>,
}

impl Dendrogram {
    /// Agglomerative clustering with Ward linkage (Lance-Williams update),
    /// found with nearest-neighbour chains.
    ///
    /// Chains discover merges out of order; sorting them by height gives the
    /// same tree as greedy closest-pair merging because Ward linkage never
    /// produces inversions. O(n^2) time.
    fn ward(dist: &[Vec<f64>]) -> Self {
        let n = dist.len();
        let mut d = dist.to_vec();
        let mut size = vec![1.0_f64; n];
        let mut active = vec![true; n];
        // (lower index, higher index, height); the merged cluster keeps the lower index
        let mut merges: Vec<(usize, usize, f64)> = Vec::with_capacity(n.saturating_sub(1));
        let mut chain: Vec<usize> = Vec::with_capacity(n);

        'merge: while merges.len() + 1 < n {
            if chain.is_empty() {
                match active.iter().position(|&a| a) {
                    Some(first) => chain.push(first),
                    None => break,
                }
            }

            let (x, y) = loop {
                let x = chain[chain.len() - 1];
                let previous = chain.len().checked_sub(2).map(|k| chain[k]);
                let mut nearest = previous;
                let mut best = previous.map_or(f64::INFINITY, |p| d[x][p]);
                for i in 0..n {
                    if active[i] && i != x && d[x][i] < best {
                        best = d[x][i];
                        nearest = Some(i);
                    }
                }
                let Some(y) = nearest else {
                    break 'merge;
                };
                if Some(y) == previous {
                    break (x, y);
                }
                chain.push(y);
            };
            chain.truncate(chain.len() - 2);

            let (a, b) = if x < y { (x, y) } else { (y, x) };
            let (na, nb, dab) = (size[a], size[b], d[a][b]);
            for k in 0..n {
                if !active[k] || k == a || k == b {
                    continue;
                }
                let nk = size[k];
                let sq = ((na + nk) * d[a][k] * d[a][k] + (nb + nk) * d[b][k] * d[b][k]
                    - nk * dab * dab)
                    / (na + nb + nk);
                let v = sq.max(0.0).sqrt();
                d[a][k] = v;
                d[k][a] = v;
            }

            merges.push((a, b, dab));
            size[a] = na + nb;
            active[b] = false;
        }

        // Stable, so a merge at the same height as its parent stays first
        merges.sort_by(|p, q| p.2.total_cmp(&q.2));

        // Union-find over leaves; `label` maps a root leaf to its tree node
        let mut parent: Vec<usize> = (0..n).collect();
        let mut label: Vec<usize> = (0..n).collect();
        let mut children = Vec::with_capacity(merges.len());
        for (step, &(a, b, _)) in merges.iter().enumerate() {
            let (ra, rb) = (find_root(&mut parent, a), find_root(&mut parent, b));
            children.push((label[ra], label[rb]));
            parent[rb] = ra;
            label[ra] = n + step;
        }

        Self::from_children(n, children)
    }

    fn from_children(n: usize, children: Vec<(usize, usize)>) -> Self {
        let total = n + children.len();
        let mut leaves = Vec::with_capacity(n);
        let mut span = vec![(0, 0); total];

        // Iterative post-order walk from the root
        let root = total - 1;
        let mut stack = vec![(root, false)];
        let mut starts = vec![0; total];
        while let Some((node, expanded)) = stack.pop() {
            if node < n {
                span[node] = (leaves.len(), leaves.len() + 1);
                leaves.push(node);
            } else if expanded {
                span[node] = (starts[node], leaves.len());
            } else {
                starts[node] = leaves.len();
                let (left, right) = children[node - n];
                stack.push((node, true));
                stack.push((right, false));
                stack.push((left, false));
            }
        }

        let mut position = vec![0; n];
        for (p, &leaf) in leaves.iter().enumerate() {
            position[leaf] = p;
        }

        Self {
            n,
            children,
            leaves,
            position,
            span,
        }
    }

    fn leaves_of(&self, node: usize) -> &[usize] {
        let (start, end) = self.span[node];
        &self.leaves[start..end]
    }

    fn contains(&self, node: usize, leaf: usize) -> bool {
        let (start, end) = self.span[node];
        (start..end).contains(&self.position[leaf])
    }

    /// For a subtree, pairs of (leaves, admissible far ends): an ordering of
    /// the subtree that starts at a leaf of one child ends in the other.
    fn halves(&self, node: usize) -> Vec<(&[usize], &[usize])> {
        if node < self.n {
            let leaf = self.leaves_of(node);
            return vec![(leaf, leaf)];
        }
        let (left, right) = self.children[node - self.n];
        vec![
            (self.leaves_of(left), self.leaves_of(right)),
            (self.leaves_of(right), self.leaves_of(left)),
        ]
    }

    /// Leaf order minimising the sum of adjacent distances.
    fn optimal_leaf_order(&self, dist: &[Vec<f64>]) -> Vec<usize> {
        let n = self.n;
        // cost[i][j]: best ordering of the lowest subtree holding both i and
        // j, starting at i and ending at j
        let mut cost = vec![vec![0.0_f64; n]; n];
        // (k, m): the inner ends at the split of that ordering
        let mut split = vec![vec![(0usize, 0usize); n]; n];
        let mut reach = vec![(f64::INFINITY, 0usize); n];

        for &(a, b) in &self.children {
            let halves_b = self.halves(b);
            for (side_a, ks) in self.halves(a) {
                for &i in side_a {
                    // reach[m] = min over k of cost[i][k] + dist[k][m]
                    for &m in self.leaves_of(b) {
                        let mut best = (f64::INFINITY, ks[0]);
                        for &k in ks {
                            let c = cost[i][k] + dist[k][m];
                            if c < best.0 {
                                best = (c, k);
                            }
                        }
                        reach[m] = best;
                    }

                    for &(side_b, ms) in &halves_b {
                        for &j in side_b {
                            let mut best = (f64::INFINITY, ms[0]);
                            for &m in ms {
                                let c = reach[m].0 + cost[m][j];
                                if c < best.0 {
                                    best = (c, m);
                                }
                            }
                            let (c, m) = best;
                            let k = reach[m].1;
                            cost[i][j] = c;
                            cost[j][i] = c;
                            split[i][j] = (k, m);
                            split[j][i] = (m, k);
                        }
                    }
                }
            }
        }

        let root = n + self.children.len() - 1;
        let (left, right) = self.children[root - n];
        let mut ends = (self.leaves_of(left)[0], self.leaves_of(right)[0]);
        let mut best = f64::INFINITY;
        for &i in self.leaves_of(left) {
            for &j in self.leaves_of(right) {
                if cost[i][j] < best {
                    best = cost[i][j];
                    ends = (i, j);
                }
            }
        }

        let mut order = Vec::with_capacity(n);
        self.unfold(root, ends.0, ends.1, &split, &mut order);
        order
    }

    /// Emit the leaves of `node` from `first` to `last`.
    fn unfold(
        &self,
        node: usize,
        first: usize,
        last: usize,
        split: &[Vec<(usize, usize)>],
        out: &mut Vec<usize>,
    ) {
        if node < self.n {
            out.push(first);
            return;
        }
        let (left, right) = self.children[node - self.n];
        let (head, tail) = if self.contains(left, first) {
            (left, right)
        } else {
            (right, left)
        };
        let (k, m) = split[first][last];
        self.unfold(head, first, k, split, out);
        self.unfold(tail, m, last, split, out);
    }
}

fn find_root(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}
