//! # TSP Seriation
//!
//! Orders rows along a shortest Hamiltonian path through their pairwise
//! distances. The path problem is posed as a closed tour by adding a dummy
//! node at distance 0 from every row; cutting the tour at the dummy node
//! yields the path.
//!
//! The tour itself comes from a [`TspSolver`]:
//!
//! - [`ConcordeSolver`] runs the external `concorde` binary on a TSPLIB
//!   file in a scratch directory and reads back its `.sol` file. A missing
//!   binary, a non-zero exit or a timeout is an error; there is no fallback.
//! - [`GreedyTwoOptSolver`] builds a nearest-neighbour tour and improves it
//!   with 2-opt moves, in process.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{is_permutation, OrderingMethod, RegionOrder};
use crate::config::SolverConfig;
use crate::error::{Result, SmapError};
use crate::neighborhood::FeatureTable;
use crate::normalization::{l2_rows, pairwise_distances};

/// Interval between checks on a running solver process.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Longest solver log excerpt carried in an error.
const MAX_LOG_EXCERPT: usize = 2000;

/// Computes a closed tour over a symmetric integer distance matrix.
pub trait TspSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Fail when the solver cannot run at all, e.g. a missing binary.
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    /// Visit order of all `weights.len()` nodes, starting anywhere.
    fn solve(&self, weights: &[Vec<i64>]) -> Result<Vec<usize>>;
}

// ============================================================================
// Seriation
// ============================================================================

/// Seriation by a shortest Hamiltonian path.
pub struct TspSeriation {
    name: String,
    solver: Box<dyn TspSolver>,
    /// Distances are multiplied by this before truncation to integers
    scale: f64,
}

impl std::fmt::Debug for TspSeriation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TspSeriation")
            .field("name", &self.name)
            .field("solver", &self.solver.name())
            .field("scale", &self.scale)
            .finish()
    }
}

impl TspSeriation {
    pub fn new(name: impl Into<String>, solver: impl TspSolver + 'static, scale: f64) -> Self {
        Self {
            name: name.into(),
            solver: Box::new(solver),
            scale,
        }
    }

    /// Distance matrix with the dummy node prepended as node 0.
    fn weights(&self, rows: &[Vec<f64>]) -> Vec<Vec<i64>> {
        let dist = pairwise_distances(rows);
        let n = rows.len();
        let mut weights = vec![vec![0i64; n + 1]; n + 1];
        for i in 0..n {
            for j in 0..n {
                weights[i + 1][j + 1] = (dist[i][j] * self.scale) as i64;
            }
        }
        weights
    }
}

impl OrderingMethod for TspSeriation {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_clustering(&self) -> bool {
        false
    }

    fn order(&self, table: &FeatureTable) -> Result<RegionOrder> {
        let rows = l2_rows(&table.matrix());
        let n = rows.len();
        // A missing solver is reported even when the tour is trivial
        self.solver.check_available()?;
        if n < 3 {
            return Ok(RegionOrder::Permutation((0..n).collect()));
        }

        let start = Instant::now();
        let tour = self.solver.solve(&self.weights(&rows))?;
        if !is_permutation(&tour, n + 1) {
            return Err(SmapError::InvalidSolution(format!(
                "{} returned a tour of {} nodes that is not a permutation of 0..{}",
                self.solver.name(),
                tour.len(),
                n + 1
            )));
        }

        let cut = tour.iter().position(|&v| v == 0).unwrap_or(0);
        let order: Vec<usize> = tour[cut + 1..]
            .iter()
            .chain(&tour[..cut])
            .map(|&v| v - 1)
            .collect();

        info!(
            "[Tsp] {} ordered {} rows in {:?}",
            self.solver.name(),
            n,
            start.elapsed()
        );
        Ok(RegionOrder::Permutation(order))
    }
}

// ============================================================================
// Concorde
// ============================================================================

/// The external Concorde TSP solver.
#[derive(Debug, Clone, Default)]
pub struct ConcordeSolver {
    config: SolverConfig,
}

impl ConcordeSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Locate the solver binary: the configured path, else `concorde` on
    /// the `PATH`.
    pub fn find_binary(&self) -> Result<PathBuf> {
        match &self.config.binary {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => which::which(path)
                .map_err(|_| SmapError::SolverNotFound(path.display().to_string())),
            None => which::which("concorde")
                .map_err(|_| SmapError::SolverNotFound("concorde".to_string())),
        }
    }

    fn wait(&self, child: &mut std::process::Child, binary: &Path) -> Result<std::process::ExitStatus> {
        let deadline = (self.config.timeout_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(self.config.timeout_secs));
        loop {
            if let Some(status) = child.try_wait().map_err(|e| SmapError::io(binary, e))? {
                return Ok(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                warn!(
                    "[Tsp] Killed {} after {} s",
                    binary.display(),
                    self.config.timeout_secs
                );
                return Err(SmapError::SolverTimeout(self.config.timeout_secs));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl TspSolver for ConcordeSolver {
    fn name(&self) -> &str {
        "concorde"
    }

    fn check_available(&self) -> Result<()> {
        self.find_binary().map(|_| ())
    }

    fn solve(&self, weights: &[Vec<i64>]) -> Result<Vec<usize>> {
        let binary = self.find_binary()?;
        let dir = tempfile::Builder::new()
            .prefix("seriation-tsp")
            .tempdir()
            .map_err(|e| SmapError::io(std::env::temp_dir(), e))?;

        let problem = dir.path().join("problem.tsp");
        let file = File::create(&problem).map_err(|e| SmapError::io(&problem, e))?;
        let mut writer = BufWriter::new(file);
        write_tsplib(weights, &mut writer).map_err(|e| SmapError::io(&problem, e))?;
        writer.flush().map_err(|e| SmapError::io(&problem, e))?;
        drop(writer);

        let log_path = dir.path().join("solver.log");
        let log = File::create(&log_path).map_err(|e| SmapError::io(&log_path, e))?;
        let log_err = log.try_clone().map_err(|e| SmapError::io(&log_path, e))?;

        debug!(
            "[Tsp] Running {} on {} nodes in {}",
            binary.display(),
            weights.len(),
            dir.path().display()
        );
        let mut child = Command::new(&binary)
            .arg("problem.tsp")
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SmapError::SolverNotFound(binary.display().to_string())
                }
                _ => SmapError::io(&binary, e),
            })?;

        let status = self.wait(&mut child, &binary)?;
        if !status.success() {
            let output = fs::read_to_string(&log_path).unwrap_or_default();
            let excerpt = match output.char_indices().rev().nth(MAX_LOG_EXCERPT) {
                Some((at, _)) => output[at..].to_string(),
                None => output,
            };
            return Err(SmapError::SolverFailed {
                status: status.to_string(),
                stderr: excerpt.trim().to_string(),
            });
        }

        let solution_path = dir.path().join("problem.sol");
        let solution = fs::read_to_string(&solution_path).map_err(|_| {
            SmapError::InvalidSolution(format!("{} wrote no solution file", binary.display()))
        })?;
        parse_solution(&solution, weights.len())
    }
}

/// Write a symmetric full-matrix TSPLIB problem.
pub fn write_tsplib<W: Write>(weights: &[Vec<i64>], out: &mut W) -> std::io::Result<()> {
    writeln!(out, "NAME: seriation")?;
    writeln!(out, "TYPE: TSP")?;
    writeln!(out, "COMMENT: region seriation with dummy node 0")?;
    writeln!(out, "DIMENSION: {}", weights.len())?;
    writeln!(out, "EDGE_WEIGHT_TYPE: EXPLICIT")?;
    writeln!(out, "EDGE_WEIGHT_FORMAT: FULL_MATRIX")?;
    writeln!(out, "EDGE_WEIGHT_SECTION")?;
    for row in weights {
        let line: Vec<String> = row.iter().map(i64::to_string).collect();
        writeln!(out, " {}", line.join(" "))?;
    }
    writeln!(out, "EOF")
}

/// Parse a Concorde `.sol` file: the node count, then the tour.
pub fn parse_solution(text: &str, nodes: usize) -> Result<Vec<usize>> {
    let mut tokens = text.split_whitespace();
    let count: usize = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| SmapError::InvalidSolution("missing node count".to_string()))?;
    if count != nodes {
        return Err(SmapError::InvalidSolution(format!(
            "solution has {count} nodes, expected {nodes}"
        )));
    }

    let tour = tokens
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| SmapError::InvalidSolution(format!("bad node `{t}`")))
        })
        .collect::<Result<Vec<usize>>>()?;
    if !is_permutation(&tour, nodes) {
        return Err(SmapError::InvalidSolution(format!(
            "tour of {} entries is not a permutation of 0..{}",
            tour.len(),
            nodes
        )));
    }
    Ok(tour)
}

// ============================================================================
// In-process heuristic
// ============================================================================

/// Nearest-neighbour tour from node 0 refined by 2-opt until no move helps.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyTwoOptSolver;

impl TspSolver for GreedyTwoOptSolver {
    fn name(&self) -> &str {
        "greedy 2-opt"
    }

    fn solve(&self, weights: &[Vec<i64>]) -> Result<Vec<usize>> {
        let n = weights.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut tour = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut current = 0;
        visited[0] = true;
        tour.push(0);
        for _ in 1..n {
            let next = (0..n)
                .filter(|&j| !visited[j])
                .min_by_key(|&j| weights[current][j])
                .unwrap_or(current);
            visited[next] = true;
            tour.push(next);
            current = next;
        }

        let mut improved = true;
        while improved {
            improved = false;
            for i in 0..n.saturating_sub(2) {
                for j in (i + 2)..n {
                    if i == 0 && j == n - 1 {
                        continue;
                    }
                    let (a, b) = (tour[i], tour[i + 1]);
                    let (c, d) = (tour[j], tour[(j + 1) % n]);
                    let delta = weights[a][c] + weights[b][d] - weights[a][b] - weights[c][d];
                    if delta < 0 {
                        tour[i + 1..=j].reverse();
                        improved = true;
                    }
                }
            }
        }
        Ok(tour)
    }
}
