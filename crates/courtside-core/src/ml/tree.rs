//! Tree models: CART regression trees, random forest, gradient boosting

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::calibrate::sigmoid;

const MIN_SAMPLES_SPLIT: usize = 8;
const MAX_THRESHOLDS_PER_FEATURE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeNode {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
    is_leaf: bool,
}

/// A CART regression tree grown on variance reduction with quantile
/// candidate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
    /// Accumulated variance reduction per feature.
    gains: Vec<f64>,
}

impl RegressionTree {
    pub fn fit(x: &[Vec<f64>], y: &[f64], max_depth: usize) -> Self {
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut tree = Self {
            nodes: Vec::new(),
            n_features,
            gains: vec![0.0; n_features],
        };
        let indices: Vec<usize> = (0..x.len()).collect();
        tree.grow(x, y, &indices, max_depth);
        tree
    }

    fn leaf(&mut self, value: f64) -> usize {
        self.nodes.push(TreeNode {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            is_leaf: true,
        });
        self.nodes.len() - 1
    }

    fn grow(&mut self, x: &[Vec<f64>], y: &[f64], indices: &[usize], depth: usize) -> usize {
        let mean = indices.iter().map(|i| y[*i]).sum::<f64>() / indices.len().max(1) as f64;
        if depth == 0 || indices.len() < MIN_SAMPLES_SPLIT {
            return self.leaf(mean);
        }

        let parent_sse: f64 = indices.iter().map(|i| (y[*i] - mean).powi(2)).sum();
        if parent_sse < 1e-12 {
            return self.leaf(mean);
        }

        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, sse)
        for feature in 0..self.n_features {
            let mut values: Vec<f64> = indices.iter().map(|i| x[*i][feature]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() < 2 {
                continue;
            }
            let step = (values.len() / MAX_THRESHOLDS_PER_FEATURE).max(1);
            for w in values.windows(2).step_by(step) {
                let threshold = (w[0] + w[1]) / 2.0;
                let mut left_sum = 0.0;
                let mut left_n = 0.0;
                let mut left_sq = 0.0;
                let mut right_sum = 0.0;
                let mut right_n = 0.0;
                let mut right_sq = 0.0;
                for &i in indices {
                    let v = y[i];
                    if x[i][feature] <= threshold {
                        left_sum += v;
                        left_sq += v * v;
                        left_n += 1.0;
                    } else {
                        right_sum += v;
                        right_sq += v * v;
                        right_n += 1.0;
                    }
                }
                if left_n < 1.0 || right_n < 1.0 {
                    continue;
                }
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);
                if best.map(|(_, _, b)| sse < b).unwrap_or(true) {
                    best = Some((feature, threshold, sse));
                }
            }
        }

        let (feature, threshold, sse) = match best {
            Some(b) if b.2 < parent_sse - 1e-12 => b,
            _ => return self.leaf(mean),
        };
        self.gains[feature] += parent_sse - sse;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| x[i][feature] <= threshold);

        let node = self.nodes.len();
        self.nodes.push(TreeNode {
            feature,
            threshold,
            left: 0,
            right: 0,
            value: mean,
            is_leaf: false,
        });
        let left = self.grow(x, y, &left_idx, depth - 1);
        let right = self.grow(x, y, &right_idx, depth - 1);
        self.nodes[node].left = left;
        self.nodes[node].right = right;
        node
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        // The root is always the first node pushed by the top-level grow.
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return node.value;
            }
            idx = if row.get(node.feature).copied().unwrap_or(0.0) <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }
}

/// Bootstrap-aggregated regression trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl RandomForestRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], n_estimators: usize, max_depth: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.len();
        let mut trees = Vec::with_capacity(n_estimators);
        for _ in 0..n_estimators {
            let mut bx = Vec::with_capacity(n);
            let mut by = Vec::with_capacity(n);
            for _ in 0..n {
                let i = rng.gen_range(0..n);
                bx.push(x[i].clone());
                by.push(y[i]);
            }
            trees.push(RegressionTree::fit(&bx, &by, max_depth));
        }
        Self {
            trees,
            n_estimators,
            max_depth,
            seed,
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
                    / self.trees.len().max(1) as f64
            })
            .collect()
    }

    pub fn importances(&self) -> Vec<f64> {
        normalize_gains(self.trees.iter())
    }
}

/// Gradient-boosted regression trees (squared loss).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    init: f64,
    trees: Vec<RegressionTree>,
    pub learning_rate: f64,
}

impl GradientBoostingRegressor {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
        _seed: u64,
    ) -> Self {
        let init = y.iter().sum::<f64>() / y.len().max(1) as f64;
        let mut current: Vec<f64> = vec![init; y.len()];
        let mut trees = Vec::with_capacity(n_estimators);
        for _ in 0..n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::fit(x, &residuals, max_depth);
            for (c, row) in current.iter_mut().zip(x) {
                *c += learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }
        Self {
            init,
            trees,
            learning_rate,
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.init
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect()
    }

    pub fn importances(&self) -> Vec<f64> {
        normalize_gains(self.trees.iter())
    }
}

/// Gradient-boosted classifier: logit boosting with trees fit to the
/// probability residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    init: f64,
    trees: Vec<RegressionTree>,
    pub learning_rate: f64,
}

impl GradientBoostingClassifier {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
        _seed: u64,
    ) -> Self {
        let pos = y.iter().sum::<f64>() / y.len().max(1) as f64;
        let clamped = pos.clamp(1e-6, 1.0 - 1e-6);
        let init = (clamped / (1.0 - clamped)).ln();
        let mut logits: Vec<f64> = vec![init; y.len()];
        let mut trees = Vec::with_capacity(n_estimators);
        for _ in 0..n_estimators {
            let residuals: Vec<f64> = y
                .iter()
                .zip(&logits)
                .map(|(t, f)| t - sigmoid(*f))
                .collect();
            let tree = RegressionTree::fit(x, &residuals, max_depth);
            for (f, row) in logits.iter_mut().zip(x) {
                *f += learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }
        Self {
            init,
            trees,
            learning_rate,
        }
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let logit = self.init
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>();
                sigmoid(logit)
            })
            .collect()
    }

    pub fn importances(&self) -> Vec<f64> {
        normalize_gains(self.trees.iter())
    }
}

fn normalize_gains<'a, I: Iterator<Item = &'a RegressionTree>>(trees: I) -> Vec<f64> {
    let mut total: Vec<f64> = Vec::new();
    for tree in trees {
        if total.is_empty() {
            total = vec![0.0; tree.gains().len()];
        }
        for (t, g) in total.iter_mut().zip(tree.gains()) {
            *t += g;
        }
    }
    let sum: f64 = total.iter().sum();
    if sum > 0.0 {
        for t in &mut total {
            *t /= sum;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, (i % 5) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] > 50.0 { 10.0 } else { 2.0 }).collect();
        (x, y)
    }

    #[test]
    fn tree_learns_a_step_function() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, 3);
        assert!((tree.predict_row(&[10.0, 0.0]) - 2.0).abs() < 0.5);
        assert!((tree.predict_row(&[90.0, 0.0]) - 10.0).abs() < 0.5);
    }

    #[test]
    fn tree_importance_identifies_the_informative_feature() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, 3);
        assert!(tree.gains()[0] > tree.gains()[1]);
    }

    #[test]
    fn forest_is_deterministic_for_a_seed() {
        let (x, y) = step_data();
        let a = RandomForestRegressor::fit(&x, &y, 10, 4, 42);
        let b = RandomForestRegressor::fit(&x, &y, 10, 4, 42);
        assert_eq!(a.predict(&x), b.predict(&x));
    }

    #[test]
    fn boosting_reduces_error_with_more_trees() {
        let (x, y) = step_data();
        let small = GradientBoostingRegressor::fit(&x, &y, 5, 0.1, 2, 1);
        let large = GradientBoostingRegressor::fit(&x, &y, 80, 0.1, 2, 1);
        let mae = |m: &GradientBoostingRegressor| {
            m.predict(&x)
                .iter()
                .zip(&y)
                .map(|(p, t)| (p - t).abs())
                .sum::<f64>()
                / y.len() as f64
        };
        assert!(mae(&large) < mae(&small));
    }

    #[test]
    fn boosted_classifier_outputs_probabilities() {
        let (x, y) = step_data();
        let labels: Vec<f64> = y.iter().map(|v| if *v > 5.0 { 1.0 } else { 0.0 }).collect();
        let model = GradientBoostingClassifier::fit(&x, &labels, 30, 0.2, 2, 3);
        let probs = model.predict_proba(&x);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(probs[5] < 0.5 && probs[95] > 0.5);
    }
}
