//! Error types for Qora-Gate

use thiserror::Error;

use crate::round::{RoundStatus, RoundSummary};

/// All possible errors in Qora-Gate
#[derive(Error, Debug)]
pub enum GateError {
    /// Empty or malformed input, unsupported method, invalid parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An update's layer set or layer sizes disagree with the global model
    #[error("Shape mismatch for client {client_id}: {detail}")]
    ShapeMismatch {
        /// Client whose update was malformed
        client_id: String,
        /// What disagreed
        detail: String,
    },

    /// Every update was straggling, excluded, rejected or quarantined
    #[error(
        "No viable updates in round {} ({} admitted, {} rejected, {} quarantined, {} stragglers)",
        .0.round_id,
        .0.admitted.len(),
        .0.rejected.len(),
        .0.quarantined.len(),
        .0.stragglers.len()
    )]
    NoViableUpdates(Box<RoundSummary>),

    /// Epsilon is non-positive, or a client has spent its budget
    #[error("Privacy budget exhausted (epsilon {epsilon})")]
    PrivacyBudgetExhausted {
        /// Client whose budget ran out, when known
        client_id: Option<String>,
        /// Epsilon that was requested or remained
        epsilon: f64,
    },

    /// Operation not allowed in the round's current state
    #[error("Round {round_id} is {actual:?}, expected {expected:?}")]
    InvalidRoundState {
        /// Round identifier
        round_id: u64,
        /// State the operation requires
        expected: RoundStatus,
        /// State the round is in
        actual: RoundStatus,
    },

    /// Submission to a round that no longer accepts updates
    #[error("Round {0} is closed")]
    RoundClosed(u64),

    /// Round was cancelled before aggregation
    #[error("Round {0} was aborted")]
    RoundAborted(u64),

    /// Round targets a model generation that is no longer current
    #[error("Stale round: targets generation {actual}, current is {expected}")]
    StaleGeneration {
        /// Current lineage generation
        expected: u64,
        /// Generation the round was opened against
        actual: u64,
    },

    /// Verification check failed
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Array shape mismatch
    #[error("Array shape error: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for GateError {
    fn from(e: ndarray::ShapeError) -> Self {
        GateError::Shape(e.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::Config(e.to_string())
    }
}
