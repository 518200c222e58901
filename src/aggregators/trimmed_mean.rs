//! Coordinate-wise trimmed mean.
//!
//! For every coordinate the values across updates are sorted and the top
//! and bottom `trim_fraction` are dropped before averaging.

use ndarray::Array1;
use rayon::prelude::*;

use super::layer_inputs;
use crate::error::GateError;
use crate::model::{ClientUpdate, WeightMap};

/// Coordinate-wise trimmed mean over every layer of `global`.
///
/// `trim_fraction` must lie in `[0, 0.5)`. At least one value is always kept
/// per coordinate, so small cohorts trim less than requested.
///
/// Sample counts are ignored: sorting breaks the link between a value and
/// its client. Use [`super::fedavg`] for weighted combination.
pub fn trimmed_mean(
    global: &WeightMap,
    updates: &[&ClientUpdate],
    trim_fraction: f32,
) -> Result<WeightMap, GateError> {
    if updates.is_empty() {
        return Err(GateError::InvalidArgument("no updates to combine".into()));
    }
    if !(0.0..0.5).contains(&trim_fraction) {
        return Err(GateError::InvalidArgument(format!(
            "trim fraction must be in [0, 0.5), got {}",
            trim_fraction
        )));
    }

    let n = updates.len();
    let n_trim = ((n as f32 * trim_fraction).ceil() as usize).min((n - 1) / 2);

    let mut result = WeightMap::new();
    for (layer, base) in global {
        let inputs = layer_inputs(layer, base.len(), updates)?;
        let values: Vec<f32> = (0..base.len())
            .into_par_iter()
            .map(|c| {
                let mut column: Vec<f32> = inputs.iter().map(|v| v[c]).collect();
                column.sort_by(|a, b| a.total_cmp(b));
                let kept = &column[n_trim..n - n_trim];
                kept.iter().map(|&v| v as f64).sum::<f64>() as f32 / kept.len() as f32
            })
            .collect();
        result.insert(layer.clone(), Array1::from_vec(values));
    }
    Ok(result)
}
