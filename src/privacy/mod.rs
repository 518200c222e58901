//! Differential privacy for client updates.
//!
//! - [`noise`] - Laplace noise calibrated to `sensitivity / epsilon`
//! - [`budget`] - per-client epsilon accounting

pub mod budget;
pub mod noise;

pub use budget::{PrivacyBudget, PrivacyLedger};
pub use noise::NoiseCalibrator;
