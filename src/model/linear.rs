//! Minimal linear regressor implementing [`Model`].
//!
//! Two layers, `linear.weight` (one entry per feature) and `linear.bias`.
//! Training is a single pass of per-sample SGD on squared error; it exists so
//! tests and benches have a concrete model lineage to drive.

use ndarray::Array1;

use super::{DataPoint, Model, WeightMap};
use crate::error::GateError;

/// Weight layer name.
pub const WEIGHT_LAYER: &str = "linear.weight";
/// Bias layer name.
pub const BIAS_LAYER: &str = "linear.bias";

/// Linear model `y = w·x + b`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    weights: WeightMap,
    learning_rate: f32,
}

impl LinearModel {
    /// Zero-initialised model over `n_features` inputs.
    pub fn new(n_features: usize) -> Self {
        let mut weights = WeightMap::new();
        weights.insert(WEIGHT_LAYER.to_string(), Array1::zeros(n_features));
        weights.insert(BIAS_LAYER.to_string(), Array1::zeros(1));
        Self {
            weights,
            learning_rate: 0.01,
        }
    }

    /// Build from explicit weights.
    pub fn from_weights(weights: WeightMap) -> Result<Self, GateError> {
        let n_features = weights
            .get(WEIGHT_LAYER)
            .map(|w| w.len())
            .ok_or_else(|| GateError::InvalidArgument(format!("missing layer {}", WEIGHT_LAYER)))?;
        let mut model = Self::new(n_features);
        model.set_weights(weights)?;
        Ok(model)
    }

    /// Override the SGD step size.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    fn predict_one(&self, features: &[f64]) -> f64 {
        let w = &self.weights[WEIGHT_LAYER];
        let b = self.weights[BIAS_LAYER][0] as f64;
        w.iter()
            .zip(features)
            .map(|(wi, xi)| *wi as f64 * xi)
            .sum::<f64>()
            + b
    }

    fn sgd_pass(&mut self, points: &[DataPoint], learning_rate: f32) {
        for point in points {
            let Some(label) = point.label else { continue };
            let err = (self.predict_one(&point.features) - label) as f32;
            if let Some(w) = self.weights.get_mut(WEIGHT_LAYER) {
                for (wi, xi) in w.iter_mut().zip(&point.features) {
                    *wi -= learning_rate * err * *xi as f32;
                }
            }
            if let Some(b) = self.weights.get_mut(BIAS_LAYER) {
                b[0] -= learning_rate * err;
            }
        }
    }
}

impl Model for LinearModel {
    fn predict(&self, points: &[DataPoint]) -> Vec<f64> {
        points.iter().map(|p| self.predict_one(&p.features)).collect()
    }

    fn train(&mut self, points: &[DataPoint]) {
        self.sgd_pass(points, self.learning_rate);
    }

    fn fine_tune(&mut self, points: &[DataPoint]) {
        self.sgd_pass(points, self.learning_rate * 0.1);
    }

    fn weights(&self) -> &WeightMap {
        &self.weights
    }

    fn set_weights(&mut self, weights: WeightMap) -> Result<(), GateError> {
        if weights.len() != self.weights.len() {
            return Err(GateError::InvalidArgument(format!(
                "expected {} layers, got {}",
                self.weights.len(),
                weights.len()
            )));
        }
        for (layer, current) in &self.weights {
            match weights.get(layer) {
                Some(w) if w.len() == current.len() => {}
                Some(w) => {
                    return Err(GateError::InvalidArgument(format!(
                        "layer {} has length {}, expected {}",
                        layer,
                        w.len(),
                        current.len()
                    )))
                }
                None => {
                    return Err(GateError::InvalidArgument(format!("missing layer {}", layer)))
                }
            }
        }
        self.weights = weights;
        Ok(())
    }
}
