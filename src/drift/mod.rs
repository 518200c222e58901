//! Distribution drift detection between a baseline and a new sample.
//!
//! Three independent checks run on every comparison:
//!
//! | Check | Input | Fires when |
//! |-------|-------|------------|
//! | Kolmogorov-Smirnov | per-point feature mean | `p < p_value_threshold` |
//! | Jensen-Shannon | per-feature histograms, averaged | `divergence > divergence_threshold` |
//! | Mean shift | per feature, in baseline std units | `magnitude > feature_drift_threshold` |
//!
//! Drift is declared when any check fires. Detections are data, not errors:
//! only malformed or degenerate input produces a [`GateError`].

use serde::{Deserialize, Serialize};

pub use crate::config::DriftConfig;
use crate::error::GateError;
use crate::math::stats::{histogram, jensen_shannon, ks_test, mean, std_dev};
use crate::model::DataPoint;

/// Name recorded for the two-sample test.
pub const KS_TEST_NAME: &str = "kolmogorov-smirnov";
/// Name recorded for the divergence estimate.
pub const DIVERGENCE_NAME: &str = "jensen-shannon";

/// Outcome of a comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDecision {
    /// Distributions differ significantly
    Drift,
    /// No check fired
    NoDrift,
}

/// Which check fired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSignal {
    /// KS p-value under threshold
    PValue,
    /// Divergence over threshold
    Divergence,
    /// Named feature's mean shift over threshold
    Feature(String),
}

/// Mean shift of one feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    /// Feature name (configured, or `feature_<index>`)
    pub feature_name: String,
    /// `|mean_sample - mean_baseline| / std_baseline`
    pub magnitude: f64,
}

/// Result of one baseline/sample comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Two-sample test used
    pub test_name: String,
    /// KS statistic
    pub statistic: f64,
    /// KS p-value
    pub p_value: f64,
    /// Divergence estimate used
    pub divergence_method: String,
    /// Mean per-feature Jensen-Shannon divergence, in `[0, 1]`
    pub divergence: f64,
    /// Per-feature breakdown
    pub feature_drift: Vec<FeatureDrift>,
    /// Checks that fired
    pub signals: Vec<DriftSignal>,
    /// Combined decision
    pub decision: DriftDecision,
}

impl DriftReport {
    /// Whether drift was declared.
    pub fn is_drift_detected(&self) -> bool {
        self.decision == DriftDecision::Drift
    }

    /// Largest per-feature magnitude.
    pub fn max_feature_magnitude(&self) -> f64 {
        self.feature_drift
            .iter()
            .map(|f| f.magnitude)
            .fold(0.0, f64::max)
    }
}

/// Compares data distributions.
#[derive(Clone, Debug, Default)]
pub struct DriftDetector {
    config: DriftConfig,
}

impl DriftDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: DriftConfig) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Thresholds in use.
    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Compare `sample` against `baseline`.
    ///
    /// Both sides need at least two points of the same, non-zero
    /// dimensionality, and every baseline feature needs non-zero variance.
    pub fn detect(
        &self,
        baseline: &[DataPoint],
        sample: &[DataPoint],
    ) -> Result<DriftReport, GateError> {
        let dim = validate_side(baseline, "baseline", None)?;
        validate_side(sample, "sample", Some(dim))?;

        let feature_drift = self.feature_drift(baseline, sample, dim)?;

        let base_proj: Vec<f64> = baseline.iter().map(projection).collect();
        let sample_proj: Vec<f64> = sample.iter().map(projection).collect();
        let ks = ks_test(&base_proj, &sample_proj)?;

        let divergence = self.divergence(baseline, sample, dim)?;

        let mut signals = Vec::new();
        if ks.p_value < self.config.p_value_threshold {
            signals.push(DriftSignal::PValue);
        }
        if divergence > self.config.divergence_threshold {
            signals.push(DriftSignal::Divergence);
        }
        signals.extend(
            feature_drift
                .iter()
                .filter(|f| f.magnitude > self.config.feature_drift_threshold)
                .map(|f| DriftSignal::Feature(f.feature_name.clone())),
        );

        let decision = if signals.is_empty() {
            DriftDecision::NoDrift
        } else {
            DriftDecision::Drift
        };

        Ok(DriftReport {
            test_name: KS_TEST_NAME.to_string(),
            statistic: ks.statistic,
            p_value: ks.p_value,
            divergence_method: DIVERGENCE_NAME.to_string(),
            divergence,
            feature_drift,
            signals,
            decision,
        })
    }

    fn feature_name(&self, idx: usize) -> String {
        self.config
            .feature_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("feature_{}", idx))
    }

    fn feature_drift(
        &self,
        baseline: &[DataPoint],
        sample: &[DataPoint],
        dim: usize,
    ) -> Result<Vec<FeatureDrift>, GateError> {
        (0..dim)
            .map(|j| {
                let base = column(baseline, j);
                let std = std_dev(&base)?;
                if std == 0.0 {
                    return Err(GateError::InvalidArgument(format!(
                        "baseline feature {} has zero variance",
                        self.feature_name(j)
                    )));
                }
                let shift = (mean(&column(sample, j))? - mean(&base)?).abs();
                Ok(FeatureDrift {
                    feature_name: self.feature_name(j),
                    magnitude: shift / std,
                })
            })
            .collect()
    }

    fn divergence(
        &self,
        baseline: &[DataPoint],
        sample: &[DataPoint],
        dim: usize,
    ) -> Result<f64, GateError> {
        let bins = self.config.histogram_bins;
        let mut total = 0.0;
        for j in 0..dim {
            let base = column(baseline, j);
            let other = column(sample, j);
            let (lo, hi) = base
                .iter()
                .chain(&other)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let p = histogram(&base, lo, hi, bins);
            let q = histogram(&other, lo, hi, bins);
            total += jensen_shannon(&p, &q)?;
        }
        Ok(total / dim as f64)
    }
}

/// Scalar projection used by the two-sample test: the mean feature value.
fn projection(point: &DataPoint) -> f64 {
    point.features.iter().sum::<f64>() / point.features.len() as f64
}

fn column(points: &[DataPoint], j: usize) -> Vec<f64> {
    points.iter().map(|p| p.features[j]).collect()
}

fn validate_side(
    points: &[DataPoint],
    what: &str,
    expected_dim: Option<usize>,
) -> Result<usize, GateError> {
    if points.len() < 2 {
        return Err(GateError::InvalidArgument(format!(
            "{} needs at least 2 points, got {}",
            what,
            points.len()
        )));
    }
    let dim = expected_dim.unwrap_or(points[0].features.len());
    if dim == 0 {
        return Err(GateError::InvalidArgument(format!("{} has no features", what)));
    }
    for (i, p) in points.iter().enumerate() {
        if p.features.len() != dim {
            return Err(GateError::InvalidArgument(format!(
                "{} point {} has {} features, expected {}",
                what,
                i,
                p.features.len(),
                dim
            )));
        }
        if p.features.iter().any(|v| !v.is_finite()) {
            return Err(GateError::InvalidArgument(format!(
                "{} point {} has non-finite features",
                what, i
            )));
        }
    }
    Ok(dim)
}
