//! Sample-count weighted federated averaging (McMahan et al., 2017).
//!
//! `new[layer] = Σ(w_i[layer] · n_i) / Σ n_i`, accumulated in f64. Offers no
//! outlier tolerance on its own; the gate screens updates before they get
//! here.

use ndarray::Array1;
use rayon::prelude::*;

use super::layer_inputs;
use crate::error::GateError;
use crate::model::{ClientUpdate, WeightMap};

/// Weighted mean of `updates` over every layer of `global`.
///
/// Each update counts with [`ClientUpdate::aggregation_weight`]. Layers are
/// reduced in parallel.
pub fn fedavg(global: &WeightMap, updates: &[&ClientUpdate]) -> Result<WeightMap, GateError> {
    if updates.is_empty() {
        return Err(GateError::InvalidArgument("no updates to average".into()));
    }

    let total = updates
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.aggregation_weight()))
        .ok_or_else(|| GateError::InvalidArgument("total sample count overflows u64".into()))?;
    if total == 0 {
        return Err(GateError::InvalidArgument(
            "updates carry zero total sample count".into(),
        ));
    }
    let total = total as f64;

    global
        .par_iter()
        .map(|(layer, base)| {
            let inputs = layer_inputs(layer, base.len(), updates)?;
            let mut acc = Array1::<f64>::zeros(base.len());
            for (update, values) in updates.iter().zip(inputs) {
                let w = update.aggregation_weight() as f64;
                acc.zip_mut_with(values, |a, &v| *a += v as f64 * w);
            }
            Ok((layer.clone(), acc.mapv(|a| (a / total) as f32)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn global() -> WeightMap {
        let mut g = WeightMap::new();
        g.insert("w".to_string(), array![0.0, 0.0]);
        g.insert("b".to_string(), array![0.0]);
        g
    }

    fn update(id: &str, w: [f32; 2], b: f32, n: Option<u64>) -> ClientUpdate {
        let mut weights = WeightMap::new();
        weights.insert("w".to_string(), array![w[0], w[1]]);
        weights.insert("b".to_string(), array![b]);
        let u = ClientUpdate::new(id, weights, 0);
        match n {
            Some(n) => u.with_sample_count(n),
            None => u,
        }
    }

    #[test]
    fn test_fedavg_equal_counts() {
        let a = update("a", [1.0, 2.0], 0.0, Some(5));
        let b = update("b", [3.0, 4.0], 1.0, Some(5));
        let result = fedavg(&global(), &[&a, &b]).unwrap();
        assert!((result["w"][0] - 2.0).abs() < 1e-6);
        assert!((result["w"][1] - 3.0).abs() < 1e-6);
        assert!((result["b"][0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fedavg_weighted() {
        let a = update("a", [1.0, 1.0], 0.0, Some(1));
        let b = update("b", [3.0, 3.0], 0.0, Some(3));
        let result = fedavg(&global(), &[&a, &b]).unwrap();
        // (1*1 + 3*3) / 4 = 2.5
        assert!((result["w"][0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_count_weighs_one() {
        let a = update("a", [0.0, 0.0], 0.0, None);
        let b = update("b", [4.0, 4.0], 0.0, Some(3));
        let result = fedavg(&global(), &[&a, &b]).unwrap();
        assert!((result["w"][0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fedavg_vulnerable_to_attack() {
        let a = update("a", [1.0, 1.0], 0.0, None);
        let b = update("b", [1.0, 1.0], 0.0, None);
        let c = update("c", [100.0, 100.0], 0.0, None);
        let result = fedavg(&global(), &[&a, &b, &c]).unwrap();
        assert!(result["w"][0] > 10.0, "unscreened mean follows the attacker");
    }

    #[test]
    fn test_fedavg_empty() {
        assert!(matches!(
            fedavg(&global(), &[]),
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fedavg_zero_total() {
        let a = update("a", [1.0, 1.0], 0.0, Some(0));
        assert!(fedavg(&global(), &[&a]).is_err());
    }

    #[test]
    fn test_fedavg_total_overflow() {
        let a = update("a", [1.0, 1.0], 0.0, Some(u64::MAX));
        let b = update("b", [3.0, 3.0], 0.0, Some(2));
        assert!(matches!(
            fedavg(&global(), &[&a, &b]),
            Err(GateError::InvalidArgument(_))
        ));
        // A single huge count is still a valid weight
        let result = fedavg(&global(), &[&a]).unwrap();
        assert!((result["w"][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fedavg_missing_layer() {
        let mut weights = WeightMap::new();
        weights.insert("w".to_string(), array![1.0, 1.0]);
        let partial = ClientUpdate::new("p", weights, 0);
        assert!(matches!(
            fedavg(&global(), &[&partial]),
            Err(GateError::ShapeMismatch { .. })
        ));
    }
}
