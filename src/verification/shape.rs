//! Layer-set and layer-size verification against the global model.
//!
//! An update whose layers disagree with the global model in any way is a
//! [`GateError::ShapeMismatch`]: it is never zero-filled or truncated.

use crate::error::GateError;
use crate::model::{ClientUpdate, WeightMap};

/// Check that `update` carries exactly the layers of `global`, each with the
/// same length.
pub fn check_shape(global: &WeightMap, update: &ClientUpdate) -> Result<(), GateError> {
    let mismatch = |detail: String| GateError::ShapeMismatch {
        client_id: update.client_id.clone(),
        detail,
    };

    for (layer, base) in global {
        match update.weights.get(layer) {
            None => return Err(mismatch(format!("missing layer '{}'", layer))),
            Some(w) if w.len() != base.len() => {
                return Err(mismatch(format!(
                    "layer '{}' has {} weights, expected {}",
                    layer,
                    w.len(),
                    base.len()
                )))
            }
            Some(w) if w.iter().any(|v| !v.is_finite()) => {
                return Err(mismatch(format!("layer '{}' has non-finite weights", layer)))
            }
            Some(_) => {}
        }
    }

    if let Some(extra) = update.weights.keys().find(|k| !global.contains_key(*k)) {
        return Err(mismatch(format!("unexpected layer '{}'", extra)));
    }
    Ok(())
}
