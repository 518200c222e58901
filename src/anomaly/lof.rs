//! Local outlier factor (Breunig et al., 2000).
//!
//! Compares each point's local reachability density with that of its `k`
//! nearest neighbours. Points inside a cluster score about 1.0.
//!
//! Mean reachability distances are floored at `resolution` times the median
//! row norm. Distances under that floor count as equal, so a cohort of
//! identical rows does not turn a near-identical row into an outlier.

use rayon::prelude::*;

use super::ScoringStrategy;
use crate::math::norms::l2_norm;
use crate::math::stats::euclidean;

/// Absolute floor on the mean reachability distance (about f32 resolution
/// for unit-scale weights).
const MIN_REACH: f64 = 1e-6;

/// Default relative resolution.
pub const DEFAULT_RESOLUTION: f64 = 0.01;

/// LOF with a fixed neighbourhood size.
#[derive(Clone, Debug)]
pub struct LocalOutlierFactor {
    k: usize,
    resolution: f64,
}

impl LocalOutlierFactor {
    /// `k` is clamped to `n - 1` at scoring time.
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Replace the relative resolution (fraction of the median row norm).
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution.max(0.0);
        self
    }

    fn reach_floor(&self, rows: &[Vec<f64>]) -> f64 {
        let mut norms: Vec<f64> = rows.iter().map(|r| l2_norm(r)).collect();
        norms.sort_by(|a, b| a.total_cmp(b));
        let median = norms.get(norms.len() / 2).copied().unwrap_or(0.0);
        (self.resolution * median).max(MIN_REACH)
    }
}

impl ScoringStrategy for LocalOutlierFactor {
    fn score_rows(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let n = rows.len();
        let k = self.k.min(n - 1);

        let dist: Vec<Vec<f64>> = rows
            .par_iter()
            .map(|a| rows.iter().map(|b| euclidean(a, b)).collect())
            .collect();

        // k nearest neighbours, ties broken by index
        let neighbours: Vec<Vec<usize>> = (0..n)
            .map(|p| {
                let mut others: Vec<usize> = (0..n).filter(|&o| o != p).collect();
                others.sort_by(|&a, &b| dist[p][a].total_cmp(&dist[p][b]).then(a.cmp(&b)));
                others.truncate(k);
                others
            })
            .collect();

        let k_distance: Vec<f64> = (0..n)
            .map(|p| neighbours[p].last().map(|&o| dist[p][o]).unwrap_or(0.0))
            .collect();

        let floor = self.reach_floor(rows);
        let lrd: Vec<f64> = (0..n)
            .map(|p| {
                let reach = neighbours[p]
                    .iter()
                    .map(|&o| k_distance[o].max(dist[p][o]))
                    .sum::<f64>()
                    / k as f64;
                1.0 / reach.max(floor)
            })
            .collect();

        (0..n)
            .map(|p| {
                let neighbour_lrd =
                    neighbours[p].iter().map(|&o| lrd[o]).sum::<f64>() / k as f64;
                neighbour_lrd / lrd[p]
            })
            .collect()
    }
}
