//! Per-lineage round coordinator.
//!
//! Owns everything that outlives a single round: the current and previous
//! global model, the generation counter, the screening baseline and the
//! audit log. Rounds are stamped with the generation they target and run
//! one at a time under the lineage lock, so no two rounds ever combine into
//! the same generation.

use parking_lot::Mutex;

use crate::aggregators::FederatedAggregator;
use crate::config::CoordinatorConfig;
use crate::error::GateError;
use crate::gate::ScreeningBaseline;
use crate::model::{DataPoint, Model};
use crate::verification::{AuditEntry, AuditLog, RoundOutcomeKind};

use super::collector::now_ms;
use super::{AbortHandle, QuarantinedUpdate, Round, RoundCollector, RoundSummary, SubmissionHandle};

/// Result of a coordinated round.
#[derive(Clone, Debug)]
pub struct CoordinatedRound {
    /// Generation produced by the round
    pub generation: u64,
    /// Audit summary
    pub summary: RoundSummary,
    /// Updates held for review
    pub quarantined: Vec<QuarantinedUpdate>,
}

struct Lineage<M> {
    generation: u64,
    model: M,
    previous: Option<M>,
    baseline: ScreeningBaseline,
    audit: AuditLog,
    next_round_id: u64,
}

/// Serializes rounds against one model lineage.
pub struct RoundCoordinator<M> {
    config: CoordinatorConfig,
    aggregator: FederatedAggregator,
    lineage: Mutex<Lineage<M>>,
}

impl<M: Model + Clone> RoundCoordinator<M> {
    /// Start a lineage at generation 0 with `model`.
    pub fn new(model: M, config: CoordinatorConfig) -> Result<Self, GateError> {
        let aggregator = FederatedAggregator::from_config(&config)?;
        log::info!(
            "coordinator started: {} layers, combine {:?}",
            model.weights().len(),
            config.round.combine
        );
        Ok(Self {
            config,
            aggregator,
            lineage: Mutex::new(Lineage {
                generation: 0,
                model,
                previous: None,
                baseline: ScreeningBaseline::default(),
                audit: AuditLog::new(),
                next_round_id: 1,
            }),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Underlying aggregator.
    pub fn aggregator(&self) -> &FederatedAggregator {
        &self.aggregator
    }

    /// Open a round against the current generation, with its deadline
    /// `round_deadline_ms` after `now_ms`.
    pub fn open_round(&self, now_ms: u64) -> Round {
        let mut lineage = self.lineage.lock();
        let round_id = lineage.next_round_id;
        lineage.next_round_id += 1;
        let deadline = now_ms.saturating_add(self.config.round.round_deadline_ms);
        Round::open(round_id, deadline).for_generation(lineage.generation)
    }

    /// Open a round and wrap it in a live collector.
    pub fn open_live_round(&self) -> (RoundCollector, SubmissionHandle, AbortHandle) {
        let round = self.open_round(now_ms());
        RoundCollector::open(round, *self.aggregator.policy())
    }

    /// Aggregate `round` and advance the lineage.
    ///
    /// The round must target the current generation. Both successful rounds
    /// and rounds with no viable updates are recorded in the audit log.
    pub fn run_round(&self, round: Round) -> Result<CoordinatedRound, GateError> {
        let mut lineage = self.lineage.lock();
        if round.generation() != lineage.generation {
            return Err(GateError::StaleGeneration {
                expected: lineage.generation,
                actual: round.generation(),
            });
        }

        let targeted = lineage.generation;
        match self.aggregator.run_round(&lineage.model, round, &lineage.baseline) {
            Ok(outcome) => {
                let previous = std::mem::replace(&mut lineage.model, outcome.model);
                lineage.previous = Some(previous);
                lineage.generation += 1;
                lineage
                    .baseline
                    .record_deltas(outcome.accepted_deltas, self.config.round.baseline_window);
                lineage.audit.push(AuditEntry {
                    generation: targeted,
                    outcome: RoundOutcomeKind::Aggregated,
                    summary: outcome.summary.clone(),
                });
                log::info!("lineage advanced to generation {}", lineage.generation);
                Ok(CoordinatedRound {
                    generation: lineage.generation,
                    summary: outcome.summary,
                    quarantined: outcome.quarantined,
                })
            }
            Err(GateError::NoViableUpdates(summary)) => {
                lineage.audit.push(AuditEntry {
                    generation: targeted,
                    outcome: RoundOutcomeKind::NoViableUpdates,
                    summary: (*summary).clone(),
                });
                Err(GateError::NoViableUpdates(summary))
            }
            Err(e) => Err(e),
        }
    }

    /// Copy of the current global model.
    pub fn current_model(&self) -> M {
        self.lineage.lock().model.clone()
    }

    /// Copy of the model before the last successful round.
    pub fn previous_model(&self) -> Option<M> {
        self.lineage.lock().previous.clone()
    }

    /// Current generation (number of successful rounds).
    pub fn generation(&self) -> u64 {
        self.lineage.lock().generation
    }

    /// Copy of the audit log.
    pub fn audit(&self) -> AuditLog {
        self.lineage.lock().audit.clone()
    }

    /// Copy of the screening baseline.
    pub fn baseline(&self) -> ScreeningBaseline {
        self.lineage.lock().baseline.clone()
    }

    /// Replace the recent data that update profiles are compared with.
    pub fn set_data_baseline(&self, data: Vec<DataPoint>) {
        self.lineage.lock().baseline.data = data;
    }

    /// Tear down the lineage, returning the final model and audit log.
    pub fn shutdown(self) -> (M, AuditLog) {
        let lineage = self.lineage.into_inner();
        log::info!(
            "coordinator shut down at generation {} after {} rounds",
            lineage.generation,
            lineage.audit.len()
        );
        (lineage.model, lineage.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientUpdate, LinearModel};

    fn update(model: &LinearModel, id: &str, value: f32, ts: u64) -> ClientUpdate {
        let mut weights = model.weights().clone();
        weights.values_mut().for_each(|w| w.fill(value));
        ClientUpdate::new(id, weights, ts)
    }

    fn coordinator() -> RoundCoordinator<LinearModel> {
        let mut config = CoordinatorConfig::default();
        config.round.round_deadline_ms = 1_000;
        RoundCoordinator::new(LinearModel::new(2), config).unwrap()
    }

    #[test]
    fn test_round_advances_generation() {
        let coordinator = coordinator();
        let model = coordinator.current_model();

        let mut round = coordinator.open_round(0);
        assert_eq!(round.deadline(), 1_000);
        round.submit(update(&model, "a", 1.0, 10)).unwrap();
        round.submit(update(&model, "b", 3.0, 20)).unwrap();

        let result = coordinator.run_round(round).unwrap();
        assert_eq!(result.generation, 1);
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.current_model().weights()["linear.bias"][0], 2.0);
        assert_eq!(coordinator.previous_model(), Some(model));
        assert_eq!(coordinator.baseline().deltas.len(), 2);
        assert_eq!(coordinator.audit().len(), 1);
    }

    #[test]
    fn test_stale_round_rejected() {
        let coordinator = coordinator();
        let model = coordinator.current_model();

        let mut first = coordinator.open_round(0);
        let mut second = coordinator.open_round(0);
        assert_ne!(first.round_id(), second.round_id());
        first.submit(update(&model, "a", 1.0, 10)).unwrap();
        second.submit(update(&model, "b", 1.0, 10)).unwrap();

        coordinator.run_round(first).unwrap();
        assert!(matches!(
            coordinator.run_round(second),
            Err(GateError::StaleGeneration { expected: 1, actual: 0 })
        ));
        assert_eq!(coordinator.generation(), 1);
    }

    #[test]
    fn test_no_viable_round_is_audited() {
        let coordinator = coordinator();
        let model = coordinator.current_model();

        let mut round = coordinator.open_round(0);
        round.submit(update(&model, "late", 1.0, 5_000)).unwrap();

        assert!(matches!(
            coordinator.run_round(round),
            Err(GateError::NoViableUpdates(_))
        ));
        assert_eq!(coordinator.generation(), 0);
        assert_eq!(coordinator.current_model(), model);

        let (final_model, audit) = coordinator.shutdown();
        assert_eq!(final_model, model);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.entries()[0].outcome, RoundOutcomeKind::NoViableUpdates);
        assert_eq!(audit.entries()[0].summary.stragglers, vec!["late".to_string()]);
    }

    #[test]
    fn test_aborted_round_leaves_model() {
        let coordinator = coordinator();
        let model = coordinator.current_model();

        let mut round = coordinator.open_round(0);
        round.submit(update(&model, "a", 9.0, 10)).unwrap();
        round.abort().unwrap();

        assert!(matches!(
            coordinator.run_round(round),
            Err(GateError::RoundAborted(_))
        ));
        assert_eq!(coordinator.current_model(), model);
        assert!(coordinator.audit().is_empty());
    }
}
