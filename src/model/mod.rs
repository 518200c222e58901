//! Model collaborator and the records exchanged with clients.
//!
//! The core never trains anything itself: it reads and replaces the layer
//! weights of a [`Model`] and combines [`ClientUpdate`]s into new weights.

pub mod linear;

pub use linear::LinearModel;

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Layer identifier to weight vector. Ordered so flattening is stable.
pub type WeightMap = BTreeMap<String, Array1<f32>>;

/// A single observation: feature vector plus optional label and timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Feature values
    pub features: Vec<f64>,
    /// Supervised target, if any
    #[serde(default)]
    pub label: Option<f64>,
    /// Observation time (milliseconds)
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl DataPoint {
    /// Unlabelled point.
    pub fn new(features: Vec<f64>) -> Self {
        Self {
            features,
            label: None,
            timestamp: None,
        }
    }

    /// Labelled point.
    pub fn labeled(features: Vec<f64>, label: f64) -> Self {
        Self {
            features,
            label: Some(label),
            timestamp: None,
        }
    }
}

/// Trainable entity exposing its weights by layer name.
///
/// Deep copies come from `Clone`; the aggregator clones before it writes so
/// the previous generation stays inspectable.
pub trait Model: Send + Sync {
    /// Predict one value per point.
    fn predict(&self, points: &[DataPoint]) -> Vec<f64>;

    /// Train on local data.
    fn train(&mut self, points: &[DataPoint]);

    /// Lightweight adaptation on a small dataset.
    fn fine_tune(&mut self, points: &[DataPoint]);

    /// Current weights.
    fn weights(&self) -> &WeightMap;

    /// Replace all weights. The layer set and per-layer lengths must match.
    fn set_weights(&mut self, weights: WeightMap) -> Result<(), GateError>;
}

/// A client's locally computed weights for one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Submitting client
    pub client_id: String,
    /// Locally trained weights, keyed like the global model
    pub weights: WeightMap,
    /// Number of local samples behind the update (absent counts as 1)
    #[serde(default)]
    pub sample_count: Option<u64>,
    /// Submission time (milliseconds)
    pub timestamp: u64,
    /// Summary of the client's recent data, used for drift screening
    #[serde(default)]
    pub data_profile: Option<Vec<DataPoint>>,
}

impl ClientUpdate {
    /// Create an update with default weight and no data profile.
    pub fn new(client_id: impl Into<String>, weights: WeightMap, timestamp: u64) -> Self {
        Self {
            client_id: client_id.into(),
            weights,
            sample_count: None,
            timestamp,
            data_profile: None,
        }
    }

    /// Set the sample count.
    pub fn with_sample_count(mut self, sample_count: u64) -> Self {
        self.sample_count = Some(sample_count);
        self
    }

    /// Attach a data profile.
    pub fn with_data_profile(mut self, profile: Vec<DataPoint>) -> Self {
        self.data_profile = Some(profile);
        self
    }

    /// Aggregation weight: `sample_count`, or 1 when absent.
    pub fn aggregation_weight(&self) -> u64 {
        self.sample_count.unwrap_or(1)
    }

    /// Flattened `self - reference` over the reference's layers, in layer order.
    ///
    /// Layers missing from `self` are skipped; run shape verification first.
    pub fn delta_from(&self, reference: &WeightMap) -> Vec<f64> {
        reference
            .iter()
            .filter_map(|(layer, base)| self.weights.get(layer).map(|w| (w, base)))
            .flat_map(|(w, base)| w.iter().zip(base.iter()).map(|(a, b)| (*a - *b) as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_weight_is_one() {
        let u = ClientUpdate::new("a", WeightMap::new(), 0);
        assert_eq!(u.aggregation_weight(), 1);
        assert_eq!(u.with_sample_count(7).aggregation_weight(), 7);
    }

    #[test]
    fn test_delta_is_layer_ordered() {
        let mut global = WeightMap::new();
        global.insert("b".to_string(), array![1.0, 1.0]);
        global.insert("a".to_string(), array![0.0]);

        let mut weights = WeightMap::new();
        weights.insert("a".to_string(), array![0.5]);
        weights.insert("b".to_string(), array![2.0, 3.0]);

        let delta = ClientUpdate::new("c", weights, 0).delta_from(&global);
        assert_eq!(delta, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_update_serde() {
        let mut weights = WeightMap::new();
        weights.insert("dense".to_string(), array![1.0, 2.0]);
        let update = ClientUpdate::new("client_0", weights, 10).with_sample_count(3);

        let json = serde_json::to_string(&update).unwrap();
        let restored: ClientUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, update);
    }
}
