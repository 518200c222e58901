//! Norm-bound verification for update deltas.
//!
//! Rejects updates whose change from the global model has an L2 norm above
//! a threshold, before they reach screening or aggregation.

use crate::error::GateError;
use crate::math::norms::l2_norm;
use crate::model::{ClientUpdate, WeightMap};

/// Check that the update's delta from `global` has L2 norm within `max_norm`.
///
/// Returns `Ok(norm)` when within bounds, or a [`GateError::Verification`]
/// when it exceeds the limit.
pub fn check_norm_bound(
    global: &WeightMap,
    update: &ClientUpdate,
    max_norm: f64,
) -> Result<f64, GateError> {
    let norm = l2_norm(&update.delta_from(global));
    if norm <= max_norm {
        Ok(norm)
    } else {
        Err(GateError::Verification(format!(
            "update from {} has delta norm {:.4} exceeding bound {:.4}",
            update.client_id, norm, max_norm
        )))
    }
}

/// Indices of updates whose delta norm is within `max_norm`.
pub fn filter_by_norm_bound(global: &WeightMap, updates: &[ClientUpdate], max_norm: f64) -> Vec<usize> {
    updates
        .iter()
        .enumerate()
        .filter(|(_, u)| check_norm_bound(global, u, max_norm).is_ok())
        .map(|(i, _)| i)
        .collect()
}
