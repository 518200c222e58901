//! Trust gate between admission and aggregation.
//!
//! Each admitted update is scored for outlier-ness on its weight delta
//! (against a reference cohort) and, when it carries a data profile, checked
//! for drift against the recent data baseline:
//!
//! 1. anomaly score above the reject threshold → [`GateDecision::Reject`]
//! 2. drift detected → [`GateDecision::Quarantine`]
//! 3. otherwise → [`GateDecision::Accept`]
//!
//! Screening reads shared state only; it is safe to run per update in
//! parallel.

use serde::{Deserialize, Serialize};

use crate::anomaly::{AnomalyMethod, AnomalyScorer};
use crate::config::{DriftConfig, GateConfig};
use crate::drift::{DriftDetector, DriftReport};
use crate::error::GateError;
use crate::model::{ClientUpdate, DataPoint, WeightMap};

/// Smallest cohort (including the update itself) that anomaly scoring runs on.
pub const MIN_SCORING_POINTS: usize = 3;

/// Outlier score of one update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Scored client
    pub client_id: String,
    /// Method used
    pub method: AnomalyMethod,
    /// Score (higher is more anomalous)
    pub score: f64,
    /// Reject threshold in effect
    pub threshold: f64,
}

impl AnomalyReport {
    /// Whether the score crosses the reject threshold.
    pub fn exceeds_threshold(&self) -> bool {
        self.score > self.threshold
    }
}

/// Gate outcome for one update.
#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    /// Trusted for aggregation
    Accept,
    /// Held for review; excluded from this round
    Quarantine(DriftReport),
    /// Discarded
    Reject(AnomalyReport),
}

/// Verdict without payload, for summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Accepted
    Accept,
    /// Quarantined
    Quarantine,
    /// Rejected
    Reject,
}

/// Full screening record of one update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Screening {
    /// Screened client
    pub client_id: String,
    /// Outcome
    pub verdict: Verdict,
    /// Anomaly score, when the cohort was large enough to score
    pub anomaly: Option<AnomalyReport>,
    /// Drift report, when both sides had data
    pub drift: Option<DriftReport>,
}

impl Screening {
    /// Convert into the decision, moving the deciding report out.
    pub fn into_decision(self) -> GateDecision {
        match (self.verdict, self.anomaly, self.drift) {
            (Verdict::Reject, Some(anomaly), _) => GateDecision::Reject(anomaly),
            (Verdict::Quarantine, _, Some(drift)) => GateDecision::Quarantine(drift),
            _ => GateDecision::Accept,
        }
    }
}

/// Reference data the gate screens against.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScreeningBaseline {
    /// Recent trusted data, compared with update data profiles
    pub data: Vec<DataPoint>,
    /// Recent trusted update deltas, the reference cohort for anomaly scoring
    pub deltas: Vec<Vec<f64>>,
}

impl ScreeningBaseline {
    /// Baseline with data only.
    pub fn from_data(data: Vec<DataPoint>) -> Self {
        Self {
            data,
            deltas: Vec::new(),
        }
    }

    /// Append accepted deltas, keeping at most `window` of the newest.
    pub fn record_deltas(&mut self, deltas: impl IntoIterator<Item = Vec<f64>>, window: usize) {
        self.deltas.extend(deltas);
        if self.deltas.len() > window {
            let excess = self.deltas.len() - window;
            self.deltas.drain(..excess);
        }
    }
}

/// Composes drift detection and anomaly scoring into an accept/quarantine/reject gate.
#[derive(Clone, Debug, Default)]
pub struct UpdateGate {
    config: GateConfig,
    scorer: AnomalyScorer,
    detector: DriftDetector,
}

impl UpdateGate {
    /// Create a gate.
    pub fn new(config: GateConfig, drift: DriftConfig) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self {
            scorer: AnomalyScorer::from_config(&config),
            detector: DriftDetector::new(drift)?,
            config,
        })
    }

    /// Gate settings.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Screen `update` against `baseline`, returning the decision only.
    pub fn screen(
        &self,
        update: &ClientUpdate,
        global: &WeightMap,
        baseline: &ScreeningBaseline,
    ) -> Result<GateDecision, GateError> {
        Ok(self.inspect(update, global, baseline)?.into_decision())
    }

    /// Screen `update` against `baseline`, returning the full record.
    pub fn inspect(
        &self,
        update: &ClientUpdate,
        global: &WeightMap,
        baseline: &ScreeningBaseline,
    ) -> Result<Screening, GateError> {
        let delta = update.delta_from(global);
        self.inspect_delta(update, &delta, baseline, std::iter::empty())
    }

    /// Screen with a precomputed delta and extra peer deltas (the rest of the
    /// round's cohort) added to the baseline cohort.
    pub fn inspect_delta<'a>(
        &self,
        update: &ClientUpdate,
        delta: &[f64],
        baseline: &'a ScreeningBaseline,
        peers: impl Iterator<Item = &'a [f64]>,
    ) -> Result<Screening, GateError> {
        let anomaly = self.score_delta(update, delta, baseline, peers)?;

        if let Some(report) = anomaly.as_ref().filter(|r| r.exceeds_threshold()) {
            log::warn!(
                "rejecting update from {}: {} score {:.4} > {:.4}",
                update.client_id,
                report.method,
                report.score,
                report.threshold
            );
            return Ok(Screening {
                client_id: update.client_id.clone(),
                verdict: Verdict::Reject,
                anomaly,
                drift: None,
            });
        }

        let drift = match update.data_profile.as_deref() {
            Some(profile) if !baseline.data.is_empty() => {
                Some(self.detector.detect(&baseline.data, profile)?)
            }
            _ => None,
        };

        let verdict = match &drift {
            Some(report) if report.is_drift_detected() => {
                log::warn!(
                    "quarantining update from {}: drift signals {:?}",
                    update.client_id,
                    report.signals
                );
                Verdict::Quarantine
            }
            _ => Verdict::Accept,
        };

        log::debug!("screened {}: {:?}", update.client_id, verdict);
        Ok(Screening {
            client_id: update.client_id.clone(),
            verdict,
            anomaly,
            drift,
        })
    }

    fn score_delta<'a>(
        &self,
        update: &ClientUpdate,
        delta: &[f64],
        baseline: &'a ScreeningBaseline,
        peers: impl Iterator<Item = &'a [f64]>,
    ) -> Result<Option<AnomalyReport>, GateError> {
        let mut rows: Vec<Vec<f64>> = baseline
            .deltas
            .iter()
            .map(|d| d.as_slice())
            .chain(peers)
            .filter(|d| d.len() == delta.len())
            .map(|d| d.to_vec())
            .collect();

        if rows.len() + 1 < MIN_SCORING_POINTS {
            log::debug!(
                "cohort of {} too small to score {}",
                rows.len() + 1,
                update.client_id
            );
            return Ok(None);
        }

        rows.push(delta.to_vec());
        let method = self.config.anomaly_method;
        let scores = self.scorer.score_rows(&rows, method)?;
        let score = scores.last().copied().unwrap_or(0.0);

        Ok(Some(AnomalyReport {
            client_id: update.client_id.clone(),
            method,
            score,
            threshold: self.config.reject_threshold(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn global() -> WeightMap {
        let mut g = WeightMap::new();
        g.insert("dense".to_string(), array![0.0, 0.0]);
        g
    }

    fn update(id: &str, a: f32, b: f32) -> ClientUpdate {
        let mut w = WeightMap::new();
        w.insert("dense".to_string(), array![a, b]);
        ClientUpdate::new(id, w, 0)
    }

    fn honest_baseline() -> ScreeningBaseline {
        ScreeningBaseline {
            data: Vec::new(),
            deltas: vec![
                vec![1.0, 2.0],
                vec![1.1, 2.1],
                vec![0.9, 1.9],
                vec![1.0, 2.1],
                vec![1.05, 1.95],
            ],
        }
    }

    fn profile(offset: f64) -> Vec<DataPoint> {
        (0..100)
            .map(|i| DataPoint::new(vec![i as f64 / 100.0 + offset]))
            .collect()
    }

    #[test]
    fn test_accept_honest_update() {
        let gate = UpdateGate::default();
        let decision = gate
            .screen(&update("a", 1.0, 2.0), &global(), &honest_baseline())
            .unwrap();
        assert_eq!(decision, GateDecision::Accept);
    }

    #[test]
    fn test_reject_outlier_update() {
        let gate = UpdateGate::default();
        let decision = gate
            .screen(&update("bad", 100.0, -100.0), &global(), &honest_baseline())
            .unwrap();
        match decision {
            GateDecision::Reject(report) => {
                assert_eq!(report.client_id, "bad");
                assert!(report.score > report.threshold);
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_round_peers_join_the_cohort() {
        let gate = UpdateGate::default();
        let baseline = ScreeningBaseline::default();
        let peers: Vec<Vec<f64>> = vec![vec![1.0, 2.0], vec![1.1, 2.1], vec![0.9, 1.9]];

        let honest = update("h", 1.05, 2.0);
        let delta = honest.delta_from(&global());
        let screening = gate
            .inspect_delta(&honest, &delta, &baseline, peers.iter().map(|p| p.as_slice()))
            .unwrap();
        assert_eq!(screening.verdict, Verdict::Accept);
        assert!(screening.anomaly.is_some());

        let bad = update("bad", 100.0, -100.0);
        let delta = bad.delta_from(&global());
        let screening = gate
            .inspect_delta(&bad, &delta, &baseline, peers.iter().map(|p| p.as_slice()))
            .unwrap();
        assert_eq!(screening.verdict, Verdict::Reject);
    }

    #[test]
    fn test_quarantine_drifted_profile() {
        let gate = UpdateGate::default();
        let mut baseline = honest_baseline();
        baseline.data = profile(0.0);

        let drifted = update("drifty", 1.0, 2.0).with_data_profile(profile(3.0));
        let decision = gate.screen(&drifted, &global(), &baseline).unwrap();
        assert!(matches!(decision, GateDecision::Quarantine(ref r) if r.is_drift_detected()));

        let steady = update("steady", 1.0, 2.0).with_data_profile(profile(0.0));
        assert_eq!(
            gate.screen(&steady, &global(), &baseline).unwrap(),
            GateDecision::Accept
        );
    }

    #[test]
    fn test_reject_takes_precedence_over_drift() {
        let gate = UpdateGate::default();
        let mut baseline = honest_baseline();
        baseline.data = profile(0.0);
        let both = update("both", 100.0, 100.0).with_data_profile(profile(3.0));
        assert!(matches!(
            gate.screen(&both, &global(), &baseline).unwrap(),
            GateDecision::Reject(_)
        ));
    }

    #[test]
    fn test_small_cohort_is_not_scored() {
        let gate = UpdateGate::default();
        let baseline = ScreeningBaseline {
            data: Vec::new(),
            deltas: vec![vec![1.0, 2.0]],
        };
        let record = gate
            .inspect(&update("a", 50.0, 50.0), &global(), &baseline)
            .unwrap();
        assert!(record.anomaly.is_none());
        assert_eq!(record.verdict, Verdict::Accept);
    }

    #[test]
    fn test_degenerate_profile_is_error() {
        let gate = UpdateGate::default();
        let mut baseline = honest_baseline();
        baseline.data = profile(0.0);
        let single = update("one", 1.0, 2.0).with_data_profile(vec![DataPoint::new(vec![0.5])]);
        assert!(matches!(
            gate.screen(&single, &global(), &baseline),
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_baseline_window() {
        let mut baseline = ScreeningBaseline::default();
        baseline.record_deltas((0..10).map(|i| vec![i as f64]), 4);
        assert_eq!(baseline.deltas, vec![vec![6.0], vec![7.0], vec![8.0], vec![9.0]]);
    }
}
