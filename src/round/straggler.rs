//! Deadline admission with a minimum-quorum grace extension.
//!
//! An update is a straggler when `timestamp > deadline`. When fewer than
//! `min_clients` updates make the deadline, the deadline is pushed back once
//! by the grace period; whatever is admitted then is final, so admission
//! always terminates.

use crate::config::RoundConfig;
use crate::error::GateError;
use crate::model::ClientUpdate;

use super::Round;

/// Result of admission.
#[derive(Clone, Debug, Default)]
pub struct Admission {
    /// Updates that made the deadline, in submission order
    pub admitted: Vec<ClientUpdate>,
    /// Updates that did not
    pub stragglers: Vec<ClientUpdate>,
    /// Deadline that was applied
    pub effective_deadline: u64,
    /// Whether the grace extension was used
    pub extended: bool,
}

impl Admission {
    fn partition(updates: Vec<ClientUpdate>, deadline: u64, extended: bool) -> Self {
        let (admitted, stragglers): (Vec<_>, Vec<_>) =
            updates.into_iter().partition(|u| u.timestamp <= deadline);
        Self {
            admitted,
            stragglers,
            effective_deadline: deadline,
            extended,
        }
    }
}

/// Decides which updates enter a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StragglerPolicy {
    min_clients: usize,
    grace_ms: u64,
}

impl Default for StragglerPolicy {
    fn default() -> Self {
        Self::from_config(&RoundConfig::default())
    }
}

impl StragglerPolicy {
    /// Policy with a quorum and a one-time grace period (milliseconds).
    pub fn new(min_clients: usize, grace_ms: u64) -> Self {
        Self {
            min_clients: min_clients.max(1),
            grace_ms,
        }
    }

    /// Policy from round settings.
    pub fn from_config(config: &RoundConfig) -> Self {
        Self::new(config.min_clients, config.grace_extension_ms)
    }

    /// Quorum size.
    pub fn min_clients(&self) -> usize {
        self.min_clients
    }

    /// Grace period (milliseconds).
    pub fn grace_ms(&self) -> u64 {
        self.grace_ms
    }

    /// Split `updates` at `deadline`, without any extension.
    pub fn admit(&self, updates: Vec<ClientUpdate>, deadline: u64) -> Admission {
        let admission = Admission::partition(updates, deadline, false);
        for u in &admission.stragglers {
            log::debug!(
                "straggler {}: timestamp {} > deadline {}",
                u.client_id,
                u.timestamp,
                deadline
            );
        }
        admission
    }

    /// Whether the grace extension should be granted for `admitted` updates.
    pub fn needs_extension(&self, admitted: usize, already_extended: bool) -> bool {
        admitted < self.min_clients && !already_extended && self.grace_ms > 0
    }

    /// Admit with the quorum rule: extend once when short, then force close.
    pub fn resolve(
        &self,
        updates: Vec<ClientUpdate>,
        deadline: u64,
        already_extended: bool,
    ) -> Admission {
        let on_time = updates.iter().filter(|u| u.timestamp <= deadline).count();
        let admission = if self.needs_extension(on_time, already_extended) {
            let extended = deadline.saturating_add(self.grace_ms);
            log::info!(
                "{} of {} required updates by {}, extending to {}",
                on_time,
                self.min_clients,
                deadline,
                extended
            );
            let mut admission = self.admit(updates, extended);
            admission.extended = true;
            admission
        } else {
            let mut admission = self.admit(updates, deadline);
            admission.extended = already_extended;
            admission
        };

        if admission.admitted.len() < self.min_clients {
            log::warn!(
                "forcing close with {} of {} required updates",
                admission.admitted.len(),
                self.min_clients
            );
        }
        admission
    }

    /// Resolve admission for `round` and freeze it for aggregation.
    ///
    /// Grants the round's grace extension if quorum is short and it has not
    /// been extended yet. The round is `Aggregating` afterwards.
    pub fn admit_round(&self, round: &mut Round) -> Result<Admission, GateError> {
        let on_time = round
            .submissions()
            .iter()
            .filter(|u| u.timestamp <= round.effective_deadline())
            .count();
        if self.needs_extension(on_time, round.is_extended()) {
            round.extend(self.grace_ms)?;
        }
        let deadline = round.effective_deadline();
        let extended = round.is_extended();
        let updates = round.begin_aggregation()?;
        let mut admission = self.resolve(updates, deadline, true);
        admission.extended = extended;
        Ok(admission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WeightMap;

    fn update(id: &str, ts: u64) -> ClientUpdate {
        ClientUpdate::new(id, WeightMap::new(), ts)
    }

    fn ids(updates: &[ClientUpdate]) -> Vec<&str> {
        updates.iter().map(|u| u.client_id.as_str()).collect()
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let policy = StragglerPolicy::new(1, 0);
        let admission = policy.admit(vec![update("a", 99), update("b", 100), update("c", 101)], 100);
        assert_eq!(ids(&admission.admitted), vec!["a", "b"]);
        assert_eq!(ids(&admission.stragglers), vec!["c"]);
    }

    #[test]
    fn test_quorum_met_no_extension() {
        let policy = StragglerPolicy::new(2, 50);
        let admission = policy.resolve(
            vec![update("a", 10), update("b", 20), update("c", 120)],
            100,
            false,
        );
        assert!(!admission.extended);
        assert_eq!(admission.effective_deadline, 100);
        assert_eq!(ids(&admission.stragglers), vec!["c"]);
    }

    #[test]
    fn test_short_quorum_extends_once() {
        let policy = StragglerPolicy::new(3, 50);
        let admission = policy.resolve(
            vec![update("a", 10), update("b", 130), update("c", 151)],
            100,
            false,
        );
        assert!(admission.extended);
        assert_eq!(admission.effective_deadline, 150);
        assert_eq!(ids(&admission.admitted), vec!["a", "b"]);
        assert_eq!(ids(&admission.stragglers), vec!["c"]);
    }

    #[test]
    fn test_already_extended_forces_close() {
        let policy = StragglerPolicy::new(3, 50);
        let admission = policy.resolve(vec![update("a", 10), update("b", 130)], 100, true);
        assert_eq!(admission.effective_deadline, 100);
        assert_eq!(ids(&admission.admitted), vec!["a"]);
    }

    #[test]
    fn test_admit_round_extends_and_freezes() {
        let policy = StragglerPolicy::new(2, 30);
        let mut round = Round::open(1, 100);
        round.submit(update("a", 50)).unwrap();
        round.submit(update("b", 120)).unwrap();
        round.submit(update("c", 200)).unwrap();

        let admission = policy.admit_round(&mut round).unwrap();
        assert!(round.is_extended());
        assert_eq!(round.status(), crate::round::RoundStatus::Aggregating);
        assert_eq!(ids(&admission.admitted), vec!["a", "b"]);
        assert_eq!(ids(&admission.stragglers), vec!["c"]);
        assert!(admission.extended);
    }
}
