//! Descriptive statistics and two-sample tests.
//!
//! Degenerate inputs (empty slices, single observations where a spread is
//! required, non-finite values) are reported as
//! [`GateError::InvalidArgument`] rather than producing a misleading
//! statistic.

use crate::error::GateError;

/// Convergence tolerance for the Kolmogorov series.
const KS_EPS1: f64 = 1e-3;
const KS_EPS2: f64 = 1e-8;

/// Result of a two-sample Kolmogorov-Smirnov test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KsResult {
    /// Maximum distance between the two empirical CDFs, in `[0, 1]`.
    pub statistic: f64,
    /// Asymptotic p-value for the null hypothesis of equal distributions.
    pub p_value: f64,
}

fn check_finite(values: &[f64], what: &str) -> Result<(), GateError> {
    if values.is_empty() {
        return Err(GateError::InvalidArgument(format!("{} is empty", what)));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(GateError::InvalidArgument(format!(
            "{} contains non-finite values",
            what
        )));
    }
    Ok(())
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Result<f64, GateError> {
    check_finite(values, "mean input")?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). Needs two observations.
pub fn std_dev(values: &[f64]) -> Result<f64, GateError> {
    if values.len() < 2 {
        return Err(GateError::InvalidArgument(format!(
            "standard deviation needs at least 2 observations, got {}",
            values.len()
        )));
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Ok((ss / (values.len() - 1) as f64).sqrt())
}

/// Kolmogorov distribution survival function `Q_KS(lambda)`.
///
/// `Q_KS(λ) = 2 Σ_{j>=1} (-1)^(j-1) exp(-2 j² λ²)`; returns 1.0 when the
/// alternating series does not converge (λ close to zero).
pub fn kolmogorov_q(lambda: f64) -> f64 {
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut prev_term = 0.0f64;

    for j in 1..=100 {
        let jf = j as f64;
        let term = fac * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= KS_EPS1 * prev_term || term.abs() <= KS_EPS2 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        prev_term = term.abs();
    }
    1.0
}

/// Two-sample Kolmogorov-Smirnov test.
///
/// Ties are advanced together on both sides so the statistic is exact for
/// discrete data. The p-value uses the asymptotic distribution with
/// Stephens' small-sample correction on the effective sample size.
pub fn ks_test(a: &[f64], b: &[f64]) -> Result<KsResult, GateError> {
    check_finite(a, "first sample")?;
    check_finite(b, "second sample")?;

    let mut xs = a.to_vec();
    let mut ys = b.to_vec();
    xs.sort_by(|p, q| p.total_cmp(q));
    ys.sort_by(|p, q| p.total_cmp(q));

    let (n, m) = (xs.len(), ys.len());
    let (nf, mf) = (n as f64, m as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d = 0.0f64;

    while i < n && j < m {
        let x = xs[i].min(ys[j]);
        while i < n && xs[i] <= x {
            i += 1;
        }
        while j < m && ys[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / nf - j as f64 / mf).abs());
    }

    let en = (nf * mf / (nf + mf)).sqrt();
    let p_value = kolmogorov_q((en + 0.12 + 0.11 / en) * d);
    Ok(KsResult {
        statistic: d,
        p_value,
    })
}

/// Normalized histogram of `values` over `[min, max]` with `bins` equal bins.
///
/// Values outside the range are clamped into the edge bins. A zero-width
/// range puts all mass in the first bin.
pub fn histogram(values: &[f64], min: f64, max: f64, bins: usize) -> Vec<f64> {
    let mut counts = vec![0.0f64; bins.max(1)];
    if values.is_empty() {
        return counts;
    }
    let width = (max - min) / counts.len() as f64;
    let last = counts.len() - 1;
    for &v in values {
        let idx = if width > 0.0 {
            (((v - min) / width).floor().max(0.0) as usize).min(last)
        } else {
            0
        };
        counts[idx] += 1.0;
    }
    let total = values.len() as f64;
    counts.iter_mut().for_each(|c| *c /= total);
    counts
}

/// Jensen-Shannon divergence between two discrete distributions (base 2).
///
/// Bounded in `[0, 1]`; zero-probability cells contribute nothing.
pub fn jensen_shannon(p: &[f64], q: &[f64]) -> Result<f64, GateError> {
    if p.len() != q.len() || p.is_empty() {
        return Err(GateError::InvalidArgument(format!(
            "distributions must be non-empty and equal length ({} vs {})",
            p.len(),
            q.len()
        )));
    }
    let kl_to_mid = |dist: &[f64], other: &[f64]| -> f64 {
        dist.iter()
            .zip(other)
            .filter(|(&pi, _)| pi > 0.0)
            .map(|(&pi, &qi)| pi * (pi / ((pi + qi) / 2.0)).log2())
            .sum::<f64>()
    };
    let js = 0.5 * kl_to_mid(p, q) + 0.5 * kl_to_mid(q, p);
    Ok(js.clamp(0.0, 1.0))
}

/// Percentile (`0..=100`) with linear interpolation between order statistics.
pub fn percentile(values: &[f64], pct: f64) -> Result<f64, GateError> {
    check_finite(values, "percentile input")?;
    if !(0.0..=100.0).contains(&pct) {
        return Err(GateError::InvalidArgument(format!(
            "percentile {} outside 0..=100",
            pct
        )));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
