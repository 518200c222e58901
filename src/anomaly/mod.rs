//! Outlier scoring for data points and update deltas.
//!
//! | Method | Score scale | Default reject |
//! |--------|-------------|----------------|
//! | [`isolation`] | `(0, 1]`, ~0.5 is normal | 0.7 |
//! | [`lof`] | ~1.0 is normal | 3.0 |
//! | [`reconstruction`] | residual / median residual | 3.0 |
//!
//! Higher is more anomalous for every method. Scores are deterministic for
//! a given input and seed.

pub mod isolation;
pub mod lof;
pub mod reconstruction;

pub use isolation::IsolationForest;
pub use lof::LocalOutlierFactor;
pub use reconstruction::ReconstructionError;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::GateConfig;
use crate::error::GateError;
use crate::math::stats::percentile;
use crate::model::DataPoint;

/// Supported scoring methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyMethod {
    /// Random isolation trees; short average path means anomalous
    #[serde(alias = "isolationForest")]
    IsolationForest,
    /// Local density relative to the k nearest neighbours
    #[serde(alias = "localOutlierFactor")]
    LocalOutlierFactor,
    /// Residual after projecting on the principal subspace
    #[serde(alias = "autoencoderReconstruction")]
    ReconstructionError,
}

impl AnomalyMethod {
    /// All methods, in declaration order.
    pub const ALL: [AnomalyMethod; 3] = [
        AnomalyMethod::IsolationForest,
        AnomalyMethod::LocalOutlierFactor,
        AnomalyMethod::ReconstructionError,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyMethod::IsolationForest => "isolation-forest",
            AnomalyMethod::LocalOutlierFactor => "local-outlier-factor",
            AnomalyMethod::ReconstructionError => "reconstruction-error",
        }
    }

    /// Reject threshold used when none is configured.
    pub fn default_reject_threshold(&self) -> f64 {
        match self {
            AnomalyMethod::IsolationForest => 0.7,
            AnomalyMethod::LocalOutlierFactor => 3.0,
            AnomalyMethod::ReconstructionError => 3.0,
        }
    }
}

impl fmt::Display for AnomalyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyMethod {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolation-forest" | "isolationForest" => Ok(AnomalyMethod::IsolationForest),
            "local-outlier-factor" | "localOutlierFactor" => Ok(AnomalyMethod::LocalOutlierFactor),
            "reconstruction-error" | "autoencoderReconstruction" => {
                Ok(AnomalyMethod::ReconstructionError)
            }
            other => Err(GateError::InvalidArgument(format!(
                "unsupported anomaly detection method '{}'",
                other
            ))),
        }
    }
}

/// A scoring algorithm over validated, equal-length feature rows.
pub trait ScoringStrategy: Send + Sync {
    /// One score per row, in row order.
    fn score_rows(&self, rows: &[Vec<f64>]) -> Vec<f64>;
}

/// Cut-off for [`AnomalyScorer::detect_anomalies`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnomalyThreshold {
    /// Keep points scoring strictly above this value
    Score(f64),
    /// Keep points scoring strictly above this percentile (0..=100) of the batch
    Percentile(f64),
}

/// A point and its outlier score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPoint<'a> {
    /// Position in the input
    pub index: usize,
    /// The scored point
    pub point: &'a DataPoint,
    /// Outlier score (higher is more anomalous)
    pub score: f64,
}

/// Scores points with a chosen [`AnomalyMethod`].
#[derive(Clone, Debug)]
pub struct AnomalyScorer {
    lof_neighbors: usize,
    lof_resolution: f64,
    isolation_trees: usize,
    isolation_sample_size: usize,
    reconstruction_components: usize,
    seed: u64,
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

impl AnomalyScorer {
    /// Scorer with parameters taken from the gate configuration.
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            lof_neighbors: config.lof_neighbors,
            lof_resolution: config.lof_resolution,
            isolation_trees: config.isolation_trees,
            isolation_sample_size: config.isolation_sample_size,
            reconstruction_components: config.reconstruction_components,
            seed: config.seed,
        }
    }

    /// Replace the seed used by randomized methods.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn strategy(&self, method: AnomalyMethod) -> Box<dyn ScoringStrategy> {
        match method {
            AnomalyMethod::IsolationForest => Box::new(IsolationForest::new(
                self.isolation_trees,
                self.isolation_sample_size,
                self.seed,
            )),
            AnomalyMethod::LocalOutlierFactor => Box::new(
                LocalOutlierFactor::new(self.lof_neighbors).with_resolution(self.lof_resolution),
            ),
            AnomalyMethod::ReconstructionError => {
                Box::new(ReconstructionError::new(self.reconstruction_components))
            }
        }
    }

    /// Score raw feature rows.
    pub fn score_rows(&self, rows: &[Vec<f64>], method: AnomalyMethod) -> Result<Vec<f64>, GateError> {
        validate_rows(rows)?;
        Ok(self.strategy(method).score_rows(rows))
    }

    /// Score every point, preserving input order.
    pub fn score<'a>(
        &self,
        points: &'a [DataPoint],
        method: AnomalyMethod,
    ) -> Result<Vec<ScoredPoint<'a>>, GateError> {
        let rows: Vec<Vec<f64>> = points.iter().map(|p| p.features.clone()).collect();
        let scores = self.score_rows(&rows, method)?;
        Ok(points
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(index, (point, score))| ScoredPoint { index, point, score })
            .collect())
    }

    /// Points scoring above `threshold`, most anomalous first.
    pub fn detect_anomalies<'a>(
        &self,
        points: &'a [DataPoint],
        method: AnomalyMethod,
        threshold: AnomalyThreshold,
    ) -> Result<Vec<ScoredPoint<'a>>, GateError> {
        let scored = self.score(points, method)?;
        let cutoff = match threshold {
            AnomalyThreshold::Score(t) => t,
            AnomalyThreshold::Percentile(p) => {
                let scores: Vec<f64> = scored.iter().map(|s| s.score).collect();
                percentile(&scores, p)?
            }
        };
        let mut flagged: Vec<ScoredPoint<'a>> =
            scored.into_iter().filter(|s| s.score > cutoff).collect();
        flagged.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        Ok(flagged)
    }
}

fn validate_rows(rows: &[Vec<f64>]) -> Result<(), GateError> {
    if rows.len() < 2 {
        return Err(GateError::InvalidArgument(format!(
            "anomaly scoring needs at least 2 points, got {}",
            rows.len()
        )));
    }
    let dim = rows[0].len();
    if dim == 0 {
        return Err(GateError::InvalidArgument("points have no features".into()));
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(GateError::InvalidArgument(format!(
                "point {} has {} features, expected {}",
                i,
                row.len(),
                dim
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(GateError::InvalidArgument(format!(
                "point {} has non-finite features",
                i
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<DataPoint> {
        // Elongated 3-D cluster along the first axis
        let mut points: Vec<DataPoint> = (0..20)
            .map(|i| {
                let t = -1.0 + i as f64 * 2.0 / 19.0;
                DataPoint::new(vec![t, 0.1 * (7.0 * t).sin(), 0.05 * (3.0 * t).cos()])
            })
            .collect();
        points.push(DataPoint::new(vec![0.0, 3.0, -3.0]));
        points
    }

    #[test]
    fn test_every_method_ranks_outlier_first() {
        let scorer = AnomalyScorer::default();
        let points = cluster_with_outlier();
        for method in AnomalyMethod::ALL {
            let scored = scorer.score(&points, method).unwrap();
            assert_eq!(scored.len(), points.len());
            let top = scored
                .iter()
                .max_by(|a, b| a.score.total_cmp(&b.score))
                .unwrap();
            assert_eq!(top.index, 20, "{} should rank the outlier highest", method);
        }
    }

    #[test]
    fn test_scores_are_deterministic() {
        let scorer = AnomalyScorer::default().with_seed(9);
        let points = cluster_with_outlier();
        for method in AnomalyMethod::ALL {
            let a: Vec<f64> = scorer.score(&points, method).unwrap().iter().map(|s| s.score).collect();
            let b: Vec<f64> = scorer.score(&points, method).unwrap().iter().map(|s| s.score).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_detect_by_score_and_percentile() {
        let scorer = AnomalyScorer::default();
        let points = cluster_with_outlier();

        let by_score = scorer
            .detect_anomalies(&points, AnomalyMethod::LocalOutlierFactor, AnomalyThreshold::Score(3.0))
            .unwrap();
        assert_eq!(by_score.len(), 1);
        assert_eq!(by_score[0].index, 20);

        let by_pct = scorer
            .detect_anomalies(
                &points,
                AnomalyMethod::IsolationForest,
                AnomalyThreshold::Percentile(90.0),
            )
            .unwrap();
        assert!(!by_pct.is_empty());
        assert_eq!(by_pct[0].index, 20);
        assert!(by_pct.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            "isolationForest".parse::<AnomalyMethod>().unwrap(),
            AnomalyMethod::IsolationForest
        );
        assert_eq!(
            "local-outlier-factor".parse::<AnomalyMethod>().unwrap(),
            AnomalyMethod::LocalOutlierFactor
        );
        assert!(matches!(
            "one-class-svm".parse::<AnomalyMethod>(),
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_input() {
        let scorer = AnomalyScorer::default();
        let one = vec![DataPoint::new(vec![1.0])];
        assert!(matches!(
            scorer.score(&one, AnomalyMethod::LocalOutlierFactor),
            Err(GateError::InvalidArgument(_))
        ));
        let ragged = vec![DataPoint::new(vec![1.0]), DataPoint::new(vec![1.0, 2.0])];
        assert!(scorer.score(&ragged, AnomalyMethod::IsolationForest).is_err());
        let nan = vec![DataPoint::new(vec![1.0]), DataPoint::new(vec![f64::NAN])];
        assert!(scorer.score(&nan, AnomalyMethod::ReconstructionError).is_err());
    }
}
