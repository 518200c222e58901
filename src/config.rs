//! Configuration surface.
//!
//! All sections deserialize with `serde`, fall back to defaults for missing
//! fields, and are checked by `validate()` before use.
//!
//! ```rust
//! use qora_gate::config::CoordinatorConfig;
//!
//! let config = CoordinatorConfig::from_json_str(
//!     r#"{ "privacy": { "epsilon": 0.5 }, "round": { "min_clients": 3 } }"#,
//! ).unwrap();
//! assert_eq!(config.round.min_clients, 3);
//! assert_eq!(config.drift.p_value_threshold, 0.05);
//! ```

use serde::{Deserialize, Serialize};

use crate::aggregators::CombineMethod;
use crate::anomaly::AnomalyMethod;
use crate::error::GateError;

fn positive(name: &str, value: f64) -> Result<(), GateError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GateError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

/// Noise calibration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Privacy strength (smaller is stronger)
    pub epsilon: f64,
    /// Bound on the per-update weight change; noise scale basis
    pub sensitivity: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            sensitivity: 1.0,
        }
    }
}

impl PrivacyConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), GateError> {
        positive("privacy.epsilon", self.epsilon)?;
        positive("privacy.sensitivity", self.sensitivity)
    }
}

/// Drift detection thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// KS p-value below which drift is declared
    pub p_value_threshold: f64,
    /// Jensen-Shannon divergence above which drift is declared
    pub divergence_threshold: f64,
    /// Normalized per-feature mean shift above which drift is declared
    pub feature_drift_threshold: f64,
    /// Histogram bins per feature
    pub histogram_bins: usize,
    /// Optional names for features, by index
    pub feature_names: Vec<String>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            p_value_threshold: 0.05,
            divergence_threshold: 0.1,
            feature_drift_threshold: 0.5,
            histogram_bins: 20,
            feature_names: Vec::new(),
        }
    }
}

impl DriftConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), GateError> {
        if !(0.0..=1.0).contains(&self.p_value_threshold) {
            return Err(GateError::Config(format!(
                "drift.p_value_threshold must be in [0, 1], got {}",
                self.p_value_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.divergence_threshold) {
            return Err(GateError::Config(format!(
                "drift.divergence_threshold must be in [0, 1], got {}",
                self.divergence_threshold
            )));
        }
        positive("drift.feature_drift_threshold", self.feature_drift_threshold)?;
        if self.histogram_bins < 2 {
            return Err(GateError::Config("drift.histogram_bins must be >= 2".into()));
        }
        Ok(())
    }
}

/// Update screening settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Scoring method for update deltas
    pub anomaly_method: AnomalyMethod,
    /// Hard-reject score; `None` uses the method's default
    pub anomaly_reject_threshold: Option<f64>,
    /// Neighbourhood size for local outlier factor
    pub lof_neighbors: usize,
    /// Local outlier factor reachability floor, as a fraction of the median
    /// delta norm; differences below it are treated as noise
    pub lof_resolution: f64,
    /// Trees in the isolation forest
    pub isolation_trees: usize,
    /// Subsample size per isolation tree
    pub isolation_sample_size: usize,
    /// Principal components kept by the reconstruction method
    pub reconstruction_components: usize,
    /// Seed for randomized scoring
    pub seed: u64,
    /// Optional L2 bound on an update's delta from the global model
    pub max_update_norm: Option<f64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            anomaly_method: AnomalyMethod::LocalOutlierFactor,
            anomaly_reject_threshold: None,
            lof_neighbors: 3,
            lof_resolution: 0.01,
            isolation_trees: 100,
            isolation_sample_size: 256,
            reconstruction_components: 1,
            seed: 42,
            max_update_norm: None,
        }
    }
}

impl GateConfig {
    /// Reject threshold in effect.
    pub fn reject_threshold(&self) -> f64 {
        self.anomaly_reject_threshold
            .unwrap_or_else(|| self.anomaly_method.default_reject_threshold())
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), GateError> {
        if let Some(t) = self.anomaly_reject_threshold {
            positive("gate.anomaly_reject_threshold", t)?;
        }
        if let Some(n) = self.max_update_norm {
            positive("gate.max_update_norm", n)?;
        }
        if self.lof_neighbors == 0 {
            return Err(GateError::Config("gate.lof_neighbors must be >= 1".into()));
        }
        if !(0.0..1.0).contains(&self.lof_resolution) {
            return Err(GateError::Config(format!(
                "gate.lof_resolution must be in [0, 1), got {}",
                self.lof_resolution
            )));
        }
        if self.isolation_trees == 0 || self.isolation_sample_size < 2 {
            return Err(GateError::Config(
                "gate.isolation_trees must be >= 1 and isolation_sample_size >= 2".into(),
            ));
        }
        if self.reconstruction_components == 0 {
            return Err(GateError::Config(
                "gate.reconstruction_components must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Round timing, quorum and combination settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Minimum admitted updates before the round closes without extension
    pub min_clients: usize,
    /// Admission window length (milliseconds)
    pub round_deadline_ms: u64,
    /// One-time extension when quorum is short (milliseconds)
    pub grace_extension_ms: u64,
    /// How accepted updates are combined
    pub combine: CombineMethod,
    /// Recent accepted deltas kept as the screening baseline
    pub baseline_window: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            min_clients: 1,
            round_deadline_ms: 60_000,
            grace_extension_ms: 0,
            combine: CombineMethod::WeightedMean,
            baseline_window: 32,
        }
    }
}

impl RoundConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.min_clients == 0 {
            return Err(GateError::Config("round.min_clients must be >= 1".into()));
        }
        if let CombineMethod::TrimmedMean { trim_fraction } = self.combine {
            if !(0.0..0.5).contains(&trim_fraction) {
                return Err(GateError::Config(format!(
                    "round.combine trim_fraction must be in [0, 0.5), got {}",
                    trim_fraction
                )));
            }
        }
        Ok(())
    }
}

/// Complete configuration for a round coordinator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Noise calibration
    pub privacy: PrivacyConfig,
    /// Drift thresholds
    pub drift: DriftConfig,
    /// Screening
    pub gate: GateConfig,
    /// Round timing and combination
    pub round: RoundConfig,
}

impl CoordinatorConfig {
    /// Parse JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self, GateError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), GateError> {
        self.privacy.validate()?;
        self.drift.validate()?;
        self.gate.validate()?;
        self.round.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoordinatorConfig::from_json_str(
            r#"{
                "drift": { "p_value_threshold": 0.01 },
                "gate": { "anomaly_method": "isolation-forest", "seed": 7 },
                "round": { "grace_extension_ms": 500, "combine": { "trimmed_mean": { "trim_fraction": 0.2 } } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.drift.p_value_threshold, 0.01);
        assert_eq!(config.drift.divergence_threshold, 0.1);
        assert_eq!(config.gate.anomaly_method, AnomalyMethod::IsolationForest);
        assert_eq!(config.gate.reject_threshold(), 0.7);
        assert_eq!(config.round.grace_extension_ms, 500);
        assert_eq!(
            config.round.combine,
            CombineMethod::TrimmedMean { trim_fraction: 0.2 }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            CoordinatorConfig::from_json_str(r#"{ "privacy": { "epsilon": 0.0 } }"#),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            CoordinatorConfig::from_json_str(r#"{ "round": { "min_clients": 0 } }"#),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            CoordinatorConfig::from_json_str("not json"),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_anomaly_method_rejected() {
        assert!(CoordinatorConfig::from_json_str(
            r#"{ "gate": { "anomaly_method": "astrology" } }"#
        )
        .is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = CoordinatorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: CoordinatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
