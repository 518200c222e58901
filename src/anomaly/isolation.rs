//! Isolation forest scoring (Liu, Ting & Zhou, 2008).
//!
//! Anomalies are isolated by fewer random axis-aligned splits. The score is
//! `2^(-E[h(x)] / c(ψ))` where `h` is the path length and `c(ψ)` the average
//! path length of an unsuccessful BST search over `ψ` points.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::ScoringStrategy;

/// Euler-Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Average path length of an unsuccessful search in a BST of `n` nodes.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Isolation forest with a fixed seed.
#[derive(Clone, Debug)]
pub struct IsolationForest {
    n_trees: usize,
    sample_size: usize,
    seed: u64,
}

impl IsolationForest {
    /// Create a forest description; trees are grown per scoring call.
    pub fn new(n_trees: usize, sample_size: usize, seed: u64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            sample_size: sample_size.max(2),
            seed,
        }
    }

    fn grow(rows: &[Vec<f64>], idx: Vec<usize>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
        if depth >= limit || idx.len() <= 1 {
            return Node::Leaf { size: idx.len() };
        }

        let dim = rows[idx[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..dim)
            .filter_map(|f| {
                let (lo, hi) = idx.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(rows[i][f]), hi.max(rows[i][f]))
                });
                (lo < hi).then_some((f, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return Node::Leaf { size: idx.len() };
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|&i| rows[i][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow(rows, left, depth + 1, limit, rng)),
            right: Box::new(Self::grow(rows, right, depth + 1, limit, rng)),
        }
    }

    fn path_length(node: &Node, x: &[f64], depth: usize) -> f64 {
        match node {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] < *threshold {
                    Self::path_length(left, x, depth + 1)
                } else {
                    Self::path_length(right, x, depth + 1)
                }
            }
        }
    }
}

impl ScoringStrategy for IsolationForest {
    fn score_rows(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let n = rows.len();
        let psi = self.sample_size.min(n);
        let limit = (psi as f64).log2().ceil() as usize;

        // Tree t draws from its own stream so parallel growth stays deterministic
        let per_tree: Vec<Vec<f64>> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let sample = index::sample(&mut rng, n, psi).into_vec();
                let tree = Self::grow(rows, sample, 0, limit, &mut rng);
                rows.iter().map(|x| Self::path_length(&tree, x, 0)).collect()
            })
            .collect();

        let c = average_path_length(psi);
        (0..n)
            .map(|i| {
                let mean_path = per_tree.iter().map(|paths| paths[i]).sum::<f64>() / self.n_trees as f64;
                if c > 0.0 {
                    2f64.powf(-mean_path / c)
                } else {
                    0.5
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) ~= 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_identical_points_score_half() {
        let rows = vec![vec![1.0, 1.0]; 8];
        let scores = IsolationForest::new(10, 8, 0).score_rows(&rows);
        for s in scores {
            assert!((s - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_outlier_scores_high() {
        let mut rows: Vec<Vec<f64>> = (0..50).map(|i| vec![(i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1]).collect();
        rows.push(vec![50.0, 50.0]);
        let scores = IsolationForest::new(100, 64, 1).score_rows(&rows);
        let outlier = scores[50];
        assert!(outlier > 0.6, "outlier score {}", outlier);
        assert!(scores[..50].iter().all(|&s| s < outlier));
    }

    #[test]
    fn test_seed_changes_trees_not_ranking() {
        let mut rows: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64 * 0.01]).collect();
        rows.push(vec![9.0]);
        let a = IsolationForest::new(50, 32, 1).score_rows(&rows);
        let b = IsolationForest::new(50, 32, 2).score_rows(&rows);
        assert_ne!(a, b);
        assert!(a[30] > a[0] && b[30] > b[0]);
    }
}
