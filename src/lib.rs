//! # Qora-Gate: trusted aggregation rounds for federated learning
//!
//! Qora-Gate decides which client updates are trusted enough to shape the
//! global model, and combines them.
//!
//! ## Pipeline
//!
//! - [`NoiseCalibrator`] - Laplace noise on updates before they leave the client
//! - [`StragglerPolicy`] - deadline admission with a one-time quorum grace
//! - [`UpdateGate`] - anomaly scoring on update deltas plus drift detection on
//!   client data profiles: accept, quarantine or reject
//! - [`FederatedAggregator`] - sample-count weighted federated averaging over
//!   the accepted updates
//!
//! ## High-Level API
//!
//! Use [`RoundCoordinator`] to own a model lineage: it opens rounds, runs
//! them one at a time, keeps the screening baseline and audits every round.

#![deny(missing_docs)]

pub mod aggregators;
pub mod anomaly;
pub mod config;
pub mod drift;
pub mod error;
pub mod gate;
pub mod math;
pub mod model;
pub mod privacy;
pub mod round;
pub mod verification;

// Re-exports
pub use aggregators::{fedavg, median, trimmed_mean, CombineMethod, FederatedAggregator};
pub use anomaly::{AnomalyMethod, AnomalyScorer, AnomalyThreshold};
pub use config::CoordinatorConfig;
pub use drift::{DriftDetector, DriftReport};
pub use error::GateError;
pub use gate::{AnomalyReport, GateDecision, ScreeningBaseline, UpdateGate};
pub use model::{ClientUpdate, DataPoint, LinearModel, Model, WeightMap};
pub use privacy::{NoiseCalibrator, PrivacyLedger};
pub use round::{Round, RoundCoordinator, RoundStatus, RoundSummary, StragglerPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
