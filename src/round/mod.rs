//! Round lifecycle and summaries.
//!
//! A [`Round`] starts `Open` and accepts submissions, moves to `Aggregating`
//! once admission is decided (the submission set is then frozen), and ends
//! `Closed` after combination. A round may be aborted while still `Open`,
//! which discards everything it holds.

pub mod collector;
pub mod coordinator;
pub mod straggler;

pub use collector::{AbortHandle, RoundCollector, SubmissionHandle};
pub use coordinator::{CoordinatedRound, RoundCoordinator};
pub use straggler::{Admission, StragglerPolicy};

use serde::{Deserialize, Serialize};

use crate::drift::DriftReport;
use crate::error::GateError;
use crate::gate::{AnomalyReport, Screening};
use crate::model::ClientUpdate;

/// Lifecycle state of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Accepting submissions
    Open,
    /// Submission set frozen; screening and combination in progress
    Aggregating,
    /// Combination finished (or failed with no viable updates)
    Closed,
    /// Cancelled before aggregation
    Aborted,
}

/// One cycle of update collection.
#[derive(Debug)]
pub struct Round {
    round_id: u64,
    generation: u64,
    deadline: u64,
    extension_ms: Option<u64>,
    status: RoundStatus,
    submissions: Vec<ClientUpdate>,
}

impl Round {
    /// Open a round whose admission deadline is `deadline` (milliseconds).
    pub fn open(round_id: u64, deadline: u64) -> Self {
        log::info!("round {} open, deadline {}", round_id, deadline);
        Self {
            round_id,
            generation: 0,
            deadline,
            extension_ms: None,
            status: RoundStatus::Open,
            submissions: Vec::new(),
        }
    }

    /// Stamp the model generation this round targets.
    pub fn for_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Round identifier.
    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    /// Targeted model generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Original admission deadline.
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// Deadline including the grace extension, if granted.
    pub fn effective_deadline(&self) -> u64 {
        self.deadline.saturating_add(self.extension_ms.unwrap_or(0))
    }

    /// Whether the one-time extension has been used.
    pub fn is_extended(&self) -> bool {
        self.extension_ms.is_some()
    }

    /// Current state.
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    /// Submissions received so far.
    pub fn submissions(&self) -> &[ClientUpdate] {
        &self.submissions
    }

    fn require_open(&self) -> Result<(), GateError> {
        match self.status {
            RoundStatus::Open => Ok(()),
            RoundStatus::Aborted => Err(GateError::RoundAborted(self.round_id)),
            actual => Err(GateError::InvalidRoundState {
                round_id: self.round_id,
                expected: RoundStatus::Open,
                actual,
            }),
        }
    }

    /// Add a client's update. One submission per client.
    pub fn submit(&mut self, update: ClientUpdate) -> Result<(), GateError> {
        match self.status {
            RoundStatus::Open => {}
            RoundStatus::Aborted => return Err(GateError::RoundAborted(self.round_id)),
            _ => return Err(GateError::RoundClosed(self.round_id)),
        }
        if self
            .submissions
            .iter()
            .any(|u| u.client_id == update.client_id)
        {
            return Err(GateError::InvalidArgument(format!(
                "client {} already submitted to round {}",
                update.client_id, self.round_id
            )));
        }
        log::debug!(
            "round {}: submission from {} at {}",
            self.round_id,
            update.client_id,
            update.timestamp
        );
        self.submissions.push(update);
        Ok(())
    }

    /// Extend the deadline by `grace_ms`. Allowed once, while open.
    pub fn extend(&mut self, grace_ms: u64) -> Result<(), GateError> {
        self.require_open()?;
        if self.extension_ms.is_some() {
            return Err(GateError::InvalidArgument(format!(
                "round {} was already extended",
                self.round_id
            )));
        }
        self.extension_ms = Some(grace_ms);
        log::info!(
            "round {} extended by {} ms to {}",
            self.round_id,
            grace_ms,
            self.effective_deadline()
        );
        Ok(())
    }

    /// Cancel the round, discarding every submission.
    pub fn abort(&mut self) -> Result<(), GateError> {
        self.require_open()?;
        let dropped = self.submissions.len();
        self.submissions.clear();
        self.status = RoundStatus::Aborted;
        log::warn!(
            "round {} aborted, {} submissions discarded",
            self.round_id,
            dropped
        );
        Ok(())
    }

    /// Freeze the submission set and hand it over for aggregation.
    pub(crate) fn begin_aggregation(&mut self) -> Result<Vec<ClientUpdate>, GateError> {
        self.require_open()?;
        self.status = RoundStatus::Aggregating;
        Ok(std::mem::take(&mut self.submissions))
    }

    pub(crate) fn close(&mut self) {
        self.status = RoundStatus::Closed;
    }
}

/// A quarantined update together with the drift report that held it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuarantinedUpdate {
    /// The held update
    pub update: ClientUpdate,
    /// Why it was held
    pub report: DriftReport,
}

/// An update dropped before or during screening, with the reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    /// Excluded client
    pub client_id: String,
    /// Error message
    pub reason: String,
}

/// What happened to every submission of one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round identifier
    pub round_id: u64,
    /// Original admission deadline
    pub deadline: u64,
    /// Deadline actually applied
    pub effective_deadline: u64,
    /// Whether the grace extension was used
    pub extended: bool,
    /// Clients admitted by the deadline
    pub admitted: Vec<String>,
    /// Clients whose updates arrived after the deadline
    pub stragglers: Vec<String>,
    /// Clients whose updates were combined
    pub accepted: Vec<String>,
    /// Clients held for review
    pub quarantined: Vec<String>,
    /// Anomaly reports of rejected updates
    pub rejected: Vec<AnomalyReport>,
    /// Updates dropped for shape, norm, weight or screening errors
    pub excluded: Vec<ExclusionRecord>,
    /// Every screening performed, in admission order
    pub screenings: Vec<Screening>,
    /// Sum of aggregation weights of accepted updates
    pub total_samples: u64,
}

impl RoundSummary {
    /// Empty summary for a round.
    pub fn new(round_id: u64, deadline: u64) -> Self {
        Self {
            round_id,
            deadline,
            effective_deadline: deadline,
            extended: false,
            admitted: Vec::new(),
            stragglers: Vec::new(),
            accepted: Vec::new(),
            quarantined: Vec::new(),
            rejected: Vec::new(),
            excluded: Vec::new(),
            screenings: Vec::new(),
            total_samples: 0,
        }
    }

    /// Drift reports from every screening that ran drift detection.
    pub fn drift_reports(&self) -> impl Iterator<Item = (&str, &DriftReport)> {
        self.screenings
            .iter()
            .filter_map(|s| s.drift.as_ref().map(|d| (s.client_id.as_str(), d)))
    }

    /// Anomaly reports from every screening that scored the update.
    pub fn anomaly_reports(&self) -> impl Iterator<Item = &AnomalyReport> {
        self.screenings.iter().filter_map(|s| s.anomaly.as_ref())
    }
}

/// Result of a successful round.
#[derive(Clone, Debug)]
pub struct RoundOutcome<M> {
    /// New global model; the input model is untouched
    pub model: M,
    /// Audit summary
    pub summary: RoundSummary,
    /// Updates held for review
    pub quarantined: Vec<QuarantinedUpdate>,
    /// Flattened deltas of accepted updates, for the screening baseline
    pub accepted_deltas: Vec<Vec<f64>>,
}
