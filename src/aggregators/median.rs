//! Coordinate-wise median.
//!
//! Unchanged by any minority of arbitrary values per coordinate; even
//! counts average the two middle values.

use ndarray::Array1;
use rayon::prelude::*;

use super::layer_inputs;
use crate::error::GateError;
use crate::model::{ClientUpdate, WeightMap};

/// Coordinate-wise median over every layer of `global`. Sample counts are
/// ignored.
pub fn median(global: &WeightMap, updates: &[&ClientUpdate]) -> Result<WeightMap, GateError> {
    if updates.is_empty() {
        return Err(GateError::InvalidArgument("no updates to combine".into()));
    }

    let mut result = WeightMap::new();
    for (layer, base) in global {
        let inputs = layer_inputs(layer, base.len(), updates)?;
        let values: Vec<f32> = (0..base.len())
            .into_par_iter()
            .map(|c| {
                let mut column: Vec<f32> = inputs.iter().map(|v| v[c]).collect();
                column.sort_by(|a, b| a.total_cmp(b));
                let mid = column.len() / 2;
                if column.len() % 2 == 0 {
                    (column[mid - 1] + column[mid]) / 2.0
                } else {
                    column[mid]
                }
            })
            .collect();
        result.insert(layer.clone(), Array1::from_vec(values));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> WeightMap {
        let mut g = WeightMap::new();
        g.insert("w".to_string(), Array1::zeros(1));
        g
    }

    fn run(values: &[f32]) -> f32 {
        let owned: Vec<ClientUpdate> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let mut w = WeightMap::new();
                w.insert("w".to_string(), Array1::from_vec(vec![v]));
                ClientUpdate::new(format!("c{}", i), w, 0)
            })
            .collect();
        let refs: Vec<&ClientUpdate> = owned.iter().collect();
        median(&global(), &refs).unwrap()["w"][0]
    }

    #[test]
    fn test_median_odd_count() {
        assert_eq!(run(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(run(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn test_median_ignores_outlier() {
        assert_eq!(run(&[1.0, 2.0, 100.0]), 2.0);
    }

    #[test]
    fn test_median_30_percent_outliers() {
        let mut values: Vec<f32> = (0..7).map(|i| 1.0 + i as f32 * 0.1).collect();
        values.extend([100.0; 3]);
        assert!(run(&values) < 2.0);
    }

    #[test]
    fn test_median_empty() {
        assert!(median(&global(), &[]).is_err());
    }
}
