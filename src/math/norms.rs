//! Norm computations for vectors.
//!
//! Used by norm-bound verification on update deltas and by the anomaly
//! strategies.

/// Compute the L2 (Euclidean) norm of an f64 slice.
pub fn l2_norm(v: &[f64]) -> f64 {
    l2_norm_sq(v).sqrt()
}

/// Compute the squared L2 norm of an f64 slice (avoids sqrt).
pub fn l2_norm_sq(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_norm_3_4_5() {
        let v = vec![3.0, 4.0];
        assert!((l2_norm(&v) - 5.0).abs() < 1e-12);
        assert!((l2_norm_sq(&v) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_l2_norm_empty() {
        assert_eq!(l2_norm(&[]), 0.0);
    }
}
