//! Laplace noise calibration for client updates.
//!
//! Each scalar weight, and each feature of an attached data profile, gets
//! independent noise from `Laplace(0, b)` with `b = sensitivity / epsilon`,
//! sampled by inverse CDF from `u ~ Uniform(-0.5, 0.5)`:
//! `-b * sign(u) * ln(1 - 2|u|)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::PrivacyConfig;
use crate::error::GateError;
use crate::model::{ClientUpdate, DataPoint};

/// Largest `|u|` used by the sampler; keeps `ln(1 - 2|u|)` finite.
const MAX_ABS_U: f64 = 0.5 - 1e-12;

/// Adds calibrated Laplace noise to client updates.
///
/// # Example
///
/// ```rust
/// use qora_gate::privacy::NoiseCalibrator;
/// use qora_gate::model::{ClientUpdate, WeightMap};
/// use ndarray::array;
///
/// let mut weights = WeightMap::new();
/// weights.insert("dense".to_string(), array![1.0, 2.0]);
/// let update = ClientUpdate::new("client_0", weights, 0);
///
/// let mut calibrator = NoiseCalibrator::new(1.0).unwrap().with_seed(7);
/// let noised = calibrator.add_noise(&update, 0.5).unwrap();
/// assert_ne!(noised.weights["dense"], update.weights["dense"]);
/// ```
#[derive(Clone, Debug)]
pub struct NoiseCalibrator {
    sensitivity: f64,
    seed: u64,
    rng: StdRng,
}

impl NoiseCalibrator {
    /// Create a calibrator with the given sensitivity (must be positive).
    pub fn new(sensitivity: f64) -> Result<Self, GateError> {
        if !(sensitivity.is_finite() && sensitivity > 0.0) {
            return Err(GateError::InvalidArgument(format!(
                "sensitivity must be positive, got {}",
                sensitivity
            )));
        }
        let seed = rand::random();
        Ok(Self {
            sensitivity,
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Create from the privacy section of the configuration.
    pub fn from_config(config: &PrivacyConfig) -> Result<Self, GateError> {
        Self::new(config.sensitivity)
    }

    /// Reseed deterministically (for testing and reproducible runs).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Configured sensitivity.
    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Laplace scale `b = sensitivity / epsilon`.
    pub fn laplace_scale(&self, epsilon: f64) -> Result<f64, GateError> {
        check_epsilon(epsilon)?;
        Ok(self.sensitivity / epsilon)
    }

    /// Draw one Laplace sample with scale `b`.
    pub fn sample(&mut self, b: f64) -> f64 {
        laplace(&mut self.rng, b)
    }

    /// Return a noised copy of `update`; the input is left untouched.
    pub fn add_noise(
        &mut self,
        update: &ClientUpdate,
        epsilon: f64,
    ) -> Result<ClientUpdate, GateError> {
        let b = self.laplace_scale(epsilon)?;
        Ok(noised_copy(update, b, &mut self.rng))
    }

    /// Return noised copies of `points`; only features are perturbed.
    pub fn add_noise_points(
        &mut self,
        points: &[DataPoint],
        epsilon: f64,
    ) -> Result<Vec<DataPoint>, GateError> {
        let b = self.laplace_scale(epsilon)?;
        Ok(noised_points(points, b, &mut self.rng))
    }

    /// Noise many updates in parallel.
    ///
    /// Update `i` draws from its own stream seeded with `seed + i`, so the
    /// result does not depend on thread scheduling.
    pub fn add_noise_batch(
        &self,
        updates: &[ClientUpdate],
        epsilon: f64,
    ) -> Result<Vec<ClientUpdate>, GateError> {
        let b = self.laplace_scale(epsilon)?;
        let seed = self.seed;
        Ok(updates
            .par_iter()
            .enumerate()
            .map(|(i, update)| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                noised_copy(update, b, &mut rng)
            })
            .collect())
    }
}

fn check_epsilon(epsilon: f64) -> Result<(), GateError> {
    if epsilon.is_nan() || epsilon <= 0.0 {
        return Err(GateError::PrivacyBudgetExhausted {
            client_id: None,
            epsilon,
        });
    }
    Ok(())
}

fn laplace<R: Rng>(rng: &mut R, b: f64) -> f64 {
    let u: f64 = rng.gen::<f64>() - 0.5;
    let abs_u = u.abs().min(MAX_ABS_U);
    -b * u.signum() * (1.0 - 2.0 * abs_u).ln()
}

fn noised_copy<R: Rng>(update: &ClientUpdate, b: f64, rng: &mut R) -> ClientUpdate {
    let mut noised = update.clone();
    for layer in noised.weights.values_mut() {
        layer.mapv_inplace(|w| (w as f64 + laplace(rng, b)) as f32);
    }
    if let Some(profile) = update.data_profile.as_deref() {
        noised.data_profile = Some(noised_points(profile, b, rng));
    }
    noised
}

fn noised_points<R: Rng>(points: &[DataPoint], b: f64, rng: &mut R) -> Vec<DataPoint> {
    points
        .iter()
        .map(|p| {
            let mut noised = p.clone();
            noised.features.iter_mut().for_each(|v| *v += laplace(rng, b));
            noised
        })
        .collect()
}
