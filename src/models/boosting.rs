//! Gradient-boosted regression trees.
//!
//! Second-order boosting on squared error:
//!
//! 1. Start every prediction at the training-target mean (the base score)
//! 2. For each round, take gradients `g = pred - y` (hessians are 1)
//! 3. Grow a tree best-first, splitting where
//!    `0.5 * (GL²/(HL+λ) + GR²/(HR+λ) - G²/(H+λ)) - γ` is largest and positive
//! 4. Leaves hold `-G/(H+λ)` shrunk by the learning rate
//!
//! Growth stops at `max_depth`, at `max_leaves`, or when no split has positive gain.

use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Maximum leaves per tree (0 = unbounded)
    pub max_leaves: usize,
    /// Shrinkage applied to every leaf
    pub learning_rate: f64,
    /// Minimum loss reduction required to split
    pub gamma: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 512,
            max_depth: 24,
            max_leaves: 800,
            learning_rate: 0.125,
            gamma: 0.005,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree stored as a flat node array; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Walk from the root to a leaf.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Every split must read an existing feature and point forward to
    /// existing nodes, so traversal always ends at a leaf.
    fn check_consistency(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {} has a non-finite leaf value", idx));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} of {}",
                            idx, feature, n_features
                        ));
                    }
                    for child in [left, right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!(
                                "node {} points at node {} of {}",
                                idx,
                                child,
                                self.nodes.len()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Boosted tree ensemble for regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit `params.n_estimators` trees on squared-error gradients.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Result<Self> {
        if x.len() != y.len() {
            return Err(ServiceError::TrainingFailure(format!(
                "boosting got {} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(ServiceError::TrainingFailure(
                "cannot fit boosted trees on zero samples".to_string(),
            ));
        }

        let n_samples = x.len();
        let n_features = x[0].len();
        let base_score = y.iter().sum::<f64>() / n_samples as f64;

        let mut predictions = vec![base_score; n_samples];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let gradients: Vec<f64> = predictions
                .iter()
                .zip(y)
                .map(|(p, t)| p - t)
                .collect();

            let tree = TreeBuilder {
                x,
                gradients: &gradients,
                params,
            }
            .build();

            for (pred, row) in predictions.iter_mut().zip(x) {
                *pred += tree.predict_row(row);
            }
            if predictions.iter().any(|p| !p.is_finite()) {
                return Err(ServiceError::TrainingFailure(format!(
                    "boosting diverged at round {}",
                    round
                )));
            }

            trees.push(tree);
        }

        Ok(Self {
            base_score,
            n_features,
            trees,
        })
    }

    /// Number of input features.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of boosting rounds kept.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Starting prediction, the training-target mean.
    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Reject a deserialized ensemble whose trees could index out of bounds.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if !self.base_score.is_finite() {
            return Err("base score is not finite".to_string());
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.check_consistency(self.n_features)
                .map_err(|problem| format!("tree {}: {}", idx, problem))?;
        }
        Ok(())
    }

    /// Base score plus every tree's leaf value for one row.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    /// Estimates for every row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    node: usize,
    depth: usize,
    gain: f64,
    feature: usize,
    threshold: f64,
    left_rows: Vec<usize>,
    right_rows: Vec<usize>,
}

impl PartialEq for SplitCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SplitCandidate {}

impl PartialOrd for SplitCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SplitCandidate {
    // Highest gain first; earlier nodes win ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.node.cmp(&self.node))
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    gradients: &'a [f64],
    params: &'a BoostingParams,
}

impl TreeBuilder<'_> {
    fn build(&self) -> RegressionTree {
        let all_rows: Vec<usize> = (0..self.x.len()).collect();
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(&all_rows),
        }];

        let mut frontier = BinaryHeap::new();
        if let Some(candidate) = self.best_split(0, 0, all_rows) {
            frontier.push(candidate);
        }

        let mut leaves = 1;
        while let Some(candidate) = frontier.pop() {
            if self.params.max_leaves > 0 && leaves >= self.params.max_leaves {
                break;
            }

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf {
                value: self.leaf_value(&candidate.left_rows),
            });
            nodes.push(Node::Leaf {
                value: self.leaf_value(&candidate.right_rows),
            });
            nodes[candidate.node] = Node::Split {
                feature: candidate.feature,
                threshold: candidate.threshold,
                left,
                right,
            };
            leaves += 1;

            let depth = candidate.depth + 1;
            if let Some(next) = self.best_split(left, depth, candidate.left_rows) {
                frontier.push(next);
            }
            if let Some(next) = self.best_split(right, depth, candidate.right_rows) {
                frontier.push(next);
            }
        }

        RegressionTree { nodes }
    }

    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let g: f64 = rows.iter().map(|&i| self.gradients[i]).sum();
        let h = rows.len() as f64;
        -g / (h + self.params.lambda) * self.params.learning_rate
    }

    fn best_split(&self, node: usize, depth: usize, rows: Vec<usize>) -> Option<SplitCandidate> {
        if depth >= self.params.max_depth || rows.len() < 2 {
            return None;
        }

        let lambda = self.params.lambda;
        let g_total: f64 = rows.iter().map(|&i| self.gradients[i]).sum();
        let h_total = rows.len() as f64;
        let parent_score = g_total * g_total / (h_total + lambda);

        let n_features = self.x[rows[0]].len();
        let mut best: Option<(f64, usize, f64)> = None;
        let mut sorted = rows.clone();

        for feature in 0..n_features {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                g_left += self.gradients[i];
                h_left += 1.0;

                let current = self.x[i][feature];
                let next = self.x[sorted[pos + 1]][feature];
                if current == next {
                    continue;
                }

                let h_right = h_total - h_left;
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight
                {
                    continue;
                }

                let g_right = g_total - g_left;
                let gain = 0.5
                    * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                        - parent_score)
                    - self.params.gamma;

                if gain > 0.0 && best.map_or(true, |(b, _, _)| gain > b) {
                    best = Some((gain, feature, 0.5 * (current + next)));
                }
            }
        }

        let (gain, feature, threshold) = best?;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[i][feature] < threshold);

        Some(SplitCandidate {
            node,
            depth,
            gain,
            feature,
            threshold,
            left_rows,
            right_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 30,
            max_depth: 4,
            max_leaves: 8,
            learning_rate: 0.3,
            gamma: 0.0,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }

    #[test]
    fn test_fits_step_function() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] < 20.0 { 1.0 } else { 5.0 }).collect();

        let model = GradientBoostedTrees::fit(&x, &y, &small_params()).unwrap();

        assert!((model.predict_row(&[3.0, 1.0]) - 1.0).abs() < 0.1);
        assert!((model.predict_row(&[35.0, 1.0]) - 5.0).abs() < 0.1);
        assert_eq!(model.n_trees(), 30);
        assert!((model.base_score() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_leaf_budget_respected() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| (r[0] * 0.7).sin()).collect();

        let params = BoostingParams {
            max_leaves: 5,
            max_depth: 10,
            ..small_params()
        };
        let model = GradientBoostedTrees::fit(&x, &y, &params).unwrap();

        assert!(model.trees.iter().all(|t| t.leaf_count() <= 5));
    }

    #[test]
    fn test_constant_target_never_splits() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![2.5; 10];

        let model = GradientBoostedTrees::fit(&x, &y, &small_params()).unwrap();

        assert!(model.trees.iter().all(|t| t.leaf_count() == 1));
        assert_eq!(model.predict_row(&[100.0]), 2.5);
    }

    #[test]
    fn test_consistency_rejects_bad_indices() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] < 20.0 { 1.0 } else { 5.0 }).collect();
        let model = GradientBoostedTrees::fit(&x, &y, &small_params()).unwrap();
        assert!(model.check_consistency().is_ok());

        let mut wide = model.clone();
        wide.trees[0].nodes[0] = Node::Split {
            feature: 9,
            threshold: 0.0,
            left: 1,
            right: 2,
        };
        assert!(wide.check_consistency().unwrap_err().contains("feature 9"));

        let mut looping = model;
        looping.trees[0].nodes[0] = Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 1,
        };
        assert!(looping.check_consistency().is_err());
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x: Vec<Vec<f64>> = (0..50)
            .map(|i| vec![(i % 7) as f64, (i % 3) as f64, i as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| r[0] * 2.0 - r[1] + 0.1 * r[2]).collect();

        let a = GradientBoostedTrees::fit(&x, &y, &small_params()).unwrap();
        let b = GradientBoostedTrees::fit(&x, &y, &small_params()).unwrap();

        assert_eq!(a, b);
    }
}
