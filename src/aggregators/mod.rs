//! Round aggregation: admission, verification, screening and combination.
//!
//! | Combination | Weighting | Outlier tolerance |
//! |-------------|-----------|-------------------|
//! | [`fedavg`] | sample count | none (gate only) |
//! | [`trimmed_mean`] | unweighted | trimmed fraction per coordinate |
//! | [`median`] | unweighted | any minority per coordinate |
//!
//! [`FederatedAggregator::run_round`] is the single transaction that turns
//! an open [`Round`] into a new model:
//!
//! 1. admit submissions against the deadline (one grace extension if short)
//! 2. drop updates that fail shape, norm or sample-count checks
//! 3. screen the rest through the [`UpdateGate`] in parallel
//! 4. combine the frozen accepted set into a fresh copy of the model

pub mod fedavg;
pub mod median;
pub mod trimmed_mean;

pub use fedavg::fedavg;
pub use median::median;
pub use trimmed_mean::trimmed_mean;

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{CoordinatorConfig, RoundConfig};
use crate::error::GateError;
use crate::gate::{ScreeningBaseline, UpdateGate, Verdict};
use crate::model::{ClientUpdate, Model, WeightMap};
use crate::round::{
    Admission, ExclusionRecord, QuarantinedUpdate, Round, RoundOutcome, RoundSummary,
    StragglerPolicy,
};
use crate::verification::{check_norm_bound, check_shape};

/// How accepted updates are combined.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    /// Sample-count weighted mean (default)
    WeightedMean,
    /// Coordinate-wise trimmed mean
    TrimmedMean {
        /// Fraction trimmed from each end, in `[0, 0.5)`
        trim_fraction: f32,
    },
    /// Coordinate-wise median
    Median,
}

impl Default for CombineMethod {
    fn default() -> Self {
        CombineMethod::WeightedMean
    }
}

impl CombineMethod {
    /// Combine `updates` over the layers of `global`.
    pub fn combine(&self, global: &WeightMap, updates: &[&ClientUpdate]) -> Result<WeightMap, GateError> {
        match *self {
            CombineMethod::WeightedMean => fedavg(global, updates),
            CombineMethod::TrimmedMean { trim_fraction } => {
                trimmed_mean(global, updates, trim_fraction)
            }
            CombineMethod::Median => median(global, updates),
        }
    }
}

/// Every update's values for `layer`, checked against the expected length.
pub(crate) fn layer_inputs<'a>(
    layer: &str,
    len: usize,
    updates: &[&'a ClientUpdate],
) -> Result<Vec<&'a Array1<f32>>, GateError> {
    updates
        .iter()
        .map(|u| match u.weights.get(layer) {
            Some(values) if values.len() == len => Ok(values),
            Some(values) => Err(GateError::ShapeMismatch {
                client_id: u.client_id.clone(),
                detail: format!("layer '{}' has {} values, expected {}", layer, values.len(), len),
            }),
            None => Err(GateError::ShapeMismatch {
                client_id: u.client_id.clone(),
                detail: format!("missing layer '{}'", layer),
            }),
        })
        .collect()
}

/// Runs rounds against a global model.
///
/// # Example
///
/// ```rust
/// use qora_gate::{ClientUpdate, FederatedAggregator, LinearModel, Model, ScreeningBaseline};
/// use qora_gate::config::CoordinatorConfig;
///
/// let global = LinearModel::new(2);
/// let aggregator = FederatedAggregator::from_config(&CoordinatorConfig::default()).unwrap();
///
/// let updates: Vec<ClientUpdate> = (0..3)
///     .map(|i| {
///         let mut weights = global.weights().clone();
///         weights.values_mut().for_each(|w| w.fill(1.0 + i as f32 * 0.1));
///         ClientUpdate::new(format!("client_{}", i), weights, 10).with_sample_count(10)
///     })
///     .collect();
///
/// let outcome = aggregator
///     .aggregate(&global, updates, 100, &ScreeningBaseline::default())
///     .unwrap();
/// assert_eq!(outcome.summary.accepted.len(), 3);
/// assert!(global.weights().values().all(|w| w.iter().all(|&v| v == 0.0)));
/// ```
#[derive(Clone, Debug)]
pub struct FederatedAggregator {
    config: RoundConfig,
    policy: StragglerPolicy,
    gate: UpdateGate,
}

impl FederatedAggregator {
    /// Aggregator with explicit round settings and gate.
    pub fn new(config: RoundConfig, gate: UpdateGate) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self {
            policy: StragglerPolicy::from_config(&config),
            config,
            gate,
        })
    }

    /// Aggregator built from a full configuration.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, GateError> {
        config.validate()?;
        let gate = UpdateGate::new(config.gate.clone(), config.drift.clone())?;
        Self::new(config.round.clone(), gate)
    }

    /// Round settings.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Admission policy.
    pub fn policy(&self) -> &StragglerPolicy {
        &self.policy
    }

    /// Screening gate.
    pub fn gate(&self) -> &UpdateGate {
        &self.gate
    }

    /// Admission alone, without screening or combination.
    pub fn handle_stragglers(&self, updates: Vec<ClientUpdate>, deadline: u64) -> Admission {
        self.policy.resolve(updates, deadline, false)
    }

    /// Run a one-shot round over `updates` with the given deadline.
    pub fn aggregate<M: Model + Clone>(
        &self,
        global: &M,
        updates: Vec<ClientUpdate>,
        deadline: u64,
        baseline: &ScreeningBaseline,
    ) -> Result<RoundOutcome<M>, GateError> {
        let mut round = Round::open(0, deadline);
        for update in updates {
            round.submit(update)?;
        }
        self.run_round(global, round, baseline)
    }

    /// Admit, verify, screen and combine the submissions of `round`.
    ///
    /// `global` is never modified; the outcome carries a new model. When no
    /// update survives, fails with [`GateError::NoViableUpdates`] carrying the
    /// round summary.
    pub fn run_round<M: Model + Clone>(
        &self,
        global: &M,
        mut round: Round,
        baseline: &ScreeningBaseline,
    ) -> Result<RoundOutcome<M>, GateError> {
        let admission = self.policy.admit_round(&mut round)?;
        let global_weights = global.weights();

        let mut summary = RoundSummary::new(round.round_id(), round.deadline());
        summary.effective_deadline = admission.effective_deadline;
        summary.extended = admission.extended;
        summary.admitted = admission.admitted.iter().map(|u| u.client_id.clone()).collect();
        summary.stragglers = admission.stragglers.iter().map(|u| u.client_id.clone()).collect();

        let mut candidates: Vec<(ClientUpdate, Vec<f64>)> = Vec::with_capacity(admission.admitted.len());
        let mut cohort_samples = 0u64;
        for update in admission.admitted {
            match self.verify(global_weights, &update, cohort_samples) {
                Ok((delta, samples)) => {
                    cohort_samples = samples;
                    candidates.push((update, delta));
                }
                Err(e) => {
                    log::warn!("round {}: excluding {}: {}", round.round_id(), update.client_id, e);
                    summary.excluded.push(ExclusionRecord {
                        client_id: update.client_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // One slot per candidate; peers are the rest of this round's cohort
        let screenings: Vec<_> = candidates
            .par_iter()
            .enumerate()
            .map(|(i, (update, delta))| {
                let peers = candidates
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, (_, d))| d.as_slice());
                self.gate.inspect_delta(update, delta, baseline, peers)
            })
            .collect();

        let mut accepted: Vec<ClientUpdate> = Vec::new();
        let mut accepted_deltas: Vec<Vec<f64>> = Vec::new();
        let mut quarantined: Vec<QuarantinedUpdate> = Vec::new();

        for ((update, delta), result) in candidates.into_iter().zip(screenings) {
            let screening = match result {
                Ok(screening) => screening,
                Err(e) => {
                    log::warn!(
                        "round {}: screening failed for {}: {}",
                        round.round_id(),
                        update.client_id,
                        e
                    );
                    summary.excluded.push(ExclusionRecord {
                        client_id: update.client_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match screening.verdict {
                Verdict::Accept => {
                    summary.accepted.push(update.client_id.clone());
                    accepted.push(update);
                    accepted_deltas.push(delta);
                }
                Verdict::Quarantine => {
                    summary.quarantined.push(update.client_id.clone());
                    if let Some(report) = screening.drift.clone() {
                        quarantined.push(QuarantinedUpdate { update, report });
                    }
                }
                Verdict::Reject => {
                    if let Some(report) = screening.anomaly.clone() {
                        summary.rejected.push(report);
                    }
                }
            }
            summary.screenings.push(screening);
        }

        if accepted.is_empty() {
            round.close();
            log::warn!(
                "round {}: no viable updates ({} admitted, {} stragglers)",
                summary.round_id,
                summary.admitted.len(),
                summary.stragglers.len()
            );
            return Err(GateError::NoViableUpdates(Box::new(summary)));
        }

        // Frozen from here: reduction reads only the accepted set
        let refs: Vec<&ClientUpdate> = accepted.iter().collect();
        summary.total_samples = refs
            .iter()
            .fold(0u64, |acc, u| acc.saturating_add(u.aggregation_weight()));
        let weights = self.config.combine.combine(global_weights, &refs)?;

        let mut model = global.clone();
        model.set_weights(weights)?;
        round.close();

        log::info!(
            "round {} closed: {} accepted ({} samples), {} quarantined, {} rejected, {} excluded, {} stragglers",
            summary.round_id,
            summary.accepted.len(),
            summary.total_samples,
            summary.quarantined.len(),
            summary.rejected.len(),
            summary.excluded.len(),
            summary.stragglers.len()
        );

        Ok(RoundOutcome {
            model,
            summary,
            quarantined,
            accepted_deltas,
        })
    }

    /// Structural checks before screening.
    ///
    /// `cohort_samples` is the sample total of the updates verified so far;
    /// returns the flattened delta and the new total.
    fn verify(
        &self,
        global: &WeightMap,
        update: &ClientUpdate,
        cohort_samples: u64,
    ) -> Result<(Vec<f64>, u64), GateError> {
        if update.sample_count == Some(0) {
            return Err(GateError::InvalidArgument(format!(
                "update from {} has zero sample count",
                update.client_id
            )));
        }
        let samples = cohort_samples
            .checked_add(update.aggregation_weight())
            .ok_or_else(|| {
                GateError::InvalidArgument(format!(
                    "sample count {} from {} overflows the round total",
                    update.aggregation_weight(),
                    update.client_id
                ))
            })?;
        check_shape(global, update)?;
        if let Some(max_norm) = self.gate.config().max_update_norm {
            check_norm_bound(global, update, max_norm)?;
        }
        Ok((update.delta_from(global), samples))
    }
}
