//! Reconstruction-error scoring against a principal subspace.
//!
//! For each point, the top principal components of the *other* points are
//! found by power iteration with deflation, and the point's residual norm
//! after projection is recorded. Holding the point out keeps a single large
//! outlier from capturing a component and reconstructing itself. Residuals
//! are divided by their median so the scale is comparable across batches.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use super::ScoringStrategy;

const POWER_ITERATIONS: usize = 200;
const CONVERGENCE_TOL: f64 = 1e-10;
const MIN_SCALE: f64 = 1e-12;

/// Principal-subspace reconstruction error.
#[derive(Clone, Debug)]
pub struct ReconstructionError {
    components: usize,
}

impl ReconstructionError {
    /// Keep up to `components` principal directions.
    pub fn new(components: usize) -> Self {
        Self {
            components: components.max(1),
        }
    }

    /// Residual norm of `x` against the subspace fitted on `others`.
    fn residual(&self, others: &Array2<f64>, x: &Array1<f64>) -> f64 {
        let mean = others
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.len()));
        let mut centered = others - &mean;
        let mut target = x - &mean;

        let k = self
            .components
            .min(centered.nrows().saturating_sub(1).max(1))
            .min(centered.ncols());

        for _ in 0..k {
            let Some(v) = leading_direction(&centered) else { break };
            let proj = centered.dot(&v);
            for (mut row, p) in centered.rows_mut().into_iter().zip(proj.iter()) {
                row.scaled_add(-*p, &v);
            }
            let t = target.dot(&v);
            target.scaled_add(-t, &v);
        }
        target.dot(&target).sqrt()
    }
}

/// Leading right singular vector of `m`, or `None` when `m` is (near) zero.
fn leading_direction(m: &Array2<f64>) -> Option<Array1<f64>> {
    // Start from the largest row: always inside the row space
    let start = m
        .rows()
        .into_iter()
        .max_by(|a, b| a.dot(a).total_cmp(&b.dot(b)))?;
    let norm = start.dot(&start).sqrt();
    if norm < MIN_SCALE {
        return None;
    }
    let mut v = start.to_owned() / norm;

    for _ in 0..POWER_ITERATIONS {
        let mut next = m.t().dot(&m.dot(&v));
        let n = next.dot(&next).sqrt();
        if n < MIN_SCALE {
            return None;
        }
        next /= n;
        let diff = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if diff < CONVERGENCE_TOL {
            break;
        }
    }
    Some(v)
}

impl ScoringStrategy for ReconstructionError {
    fn score_rows(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let n = rows.len();
        let d = rows[0].len();

        let raw: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| {
                let others = Array2::from_shape_fn((n - 1, d), |(r, c)| {
                    let src = if r < i { r } else { r + 1 };
                    rows[src][c]
                });
                let x = Array1::from_vec(rows[i].clone());
                self.residual(&others, &x)
            })
            .collect();

        let mut sorted = raw.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let scale = median.max(MIN_SCALE);
        raw.into_iter().map(|r| r / scale).collect()
    }
}
