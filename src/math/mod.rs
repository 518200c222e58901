//! Mathematical primitives for Qora-Gate.
//!
//! Provides shared math utilities used by aggregation, gating and drift
//! detection:
//!
//! - [`norms`] - L2 norm computations
//! - [`stats`] - moments, KS test, histograms, Jensen-Shannon divergence

pub mod norms;
pub mod stats;

pub use norms::{l2_norm, l2_norm_sq};
pub use stats::{
    euclidean, jensen_shannon, kolmogorov_q, ks_test, mean, percentile, std_dev, KsResult,
};
