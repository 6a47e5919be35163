//! Linear models: logistic regression, linear SVM, ridge, elastic net

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use courtside_types::{CourtsideError, Result};

use super::calibrate::sigmoid;

const GD_ITERATIONS: usize = 2000;
const GD_LEARNING_RATE: f64 = 0.1;
const CD_ITERATIONS: usize = 500;
const CD_TOLERANCE: f64 = 1e-6;

fn dot(w: &[f64], row: &[f64]) -> f64 {
    w.iter().zip(row).map(|(a, b)| a * b).sum()
}

/// L2-regularized logistic regression fit by full-batch gradient descent.
/// `c` is the inverse regularization strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub c: f64,
}

impl LogisticRegression {
    pub fn fit(x: &[Vec<f64>], y: &[f64], c: f64) -> Self {
        let n = x.len() as f64;
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;
        let reg = 1.0 / (c.max(1e-6) * n);

        for _ in 0..GD_ITERATIONS {
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;
            for (row, label) in x.iter().zip(y) {
                let err = sigmoid(dot(&weights, row) + intercept) - label;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= GD_LEARNING_RATE * (g / n + reg * *w);
            }
            intercept -= GD_LEARNING_RATE * grad_b / n;
        }

        Self {
            weights,
            intercept,
            c,
        }
    }

    pub fn decision(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.intercept
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| sigmoid(self.decision(row))).collect()
    }
}

/// Linear SVM fit by sub-gradient descent on the hinge loss, with Platt
/// scaling fit on the training decision values so it exposes calibrated
/// probabilities like the other classifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub c: f64,
    pub platt_a: f64,
    pub platt_b: f64,
}

impl LinearSvm {
    pub fn fit(x: &[Vec<f64>], y: &[f64], c: f64) -> Self {
        let n = x.len() as f64;
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let signed: Vec<f64> = y.iter().map(|v| if *v > 0.5 { 1.0 } else { -1.0 }).collect();
        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;
        let reg = 1.0 / (c.max(1e-6) * n);

        for iter in 0..GD_ITERATIONS {
            let lr = GD_LEARNING_RATE / (1.0 + iter as f64 / 500.0);
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;
            for (row, label) in x.iter().zip(&signed) {
                let margin = label * (dot(&weights, row) + intercept);
                if margin < 1.0 {
                    for (g, v) in grad_w.iter_mut().zip(row) {
                        *g -= label * v;
                    }
                    grad_b -= label;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= lr * (g / n + reg * *w);
            }
            intercept -= lr * grad_b / n;
        }

        // Platt scaling on the training decision values.
        let scores: Vec<f64> = x.iter().map(|row| dot(&weights, row) + intercept).collect();
        let (platt_a, platt_b) = fit_platt(&scores, y);

        Self {
            weights,
            intercept,
            c,
            platt_a,
            platt_b,
        }
    }

    pub fn decision(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.intercept
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| sigmoid(self.platt_a * self.decision(row) + self.platt_b))
            .collect()
    }
}

/// One-dimensional logistic fit of labels on scores (Platt's method).
pub fn fit_platt(scores: &[f64], y: &[f64]) -> (f64, f64) {
    let mut a = 1.0;
    let mut b = 0.0;
    let n = scores.len().max(1) as f64;
    for _ in 0..GD_ITERATIONS {
        let mut grad_a = 0.0;
        let mut grad_b = 0.0;
        for (s, label) in scores.iter().zip(y) {
            let err = sigmoid(a * s + b) - label;
            grad_a += err * s;
            grad_b += err;
        }
        a -= GD_LEARNING_RATE * grad_a / n;
        b -= GD_LEARNING_RATE * grad_b / n;
    }
    (a, b)
}

/// Ridge regression solved in closed form with nalgebra.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub alpha: f64,
}

impl RidgeRegression {
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self> {
        let n = x.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        if n == 0 || n_features == 0 {
            return Err(CourtsideError::Run(
                "ridge regression requires a non-empty matrix".to_string(),
            ));
        }
        // Center so the intercept is the target mean.
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let mut col_means = vec![0.0; n_features];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                col_means[i] += v;
            }
        }
        for m in &mut col_means {
            *m /= n as f64;
        }

        let mut centered = Vec::with_capacity(n * n_features);
        for row in x {
            for (i, v) in row.iter().enumerate() {
                centered.push(v - col_means[i]);
            }
        }
        let xm = DMatrix::from_row_slice(n, n_features, &centered);
        let yv = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let xtx = xm.transpose() * &xm;
        let mut lhs = xtx;
        for i in 0..n_features {
            lhs[(i, i)] += alpha;
        }
        let rhs = xm.transpose() * yv;
        let solution = lhs
            .lu()
            .solve(&rhs)
            .ok_or_else(|| CourtsideError::Run("ridge normal equations are singular".to_string()))?;

        let weights: Vec<f64> = solution.iter().copied().collect();
        let intercept = y_mean - dot(&weights, &col_means);
        Ok(Self {
            weights,
            intercept,
            alpha,
        })
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| dot(&self.weights, row) + self.intercept)
            .collect()
    }
}

/// Elastic net fit by cyclic coordinate descent on centered data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticNet {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub alpha: f64,
    pub l1_ratio: f64,
}

impl ElasticNet {
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64, l1_ratio: f64) -> Self {
        let n = x.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let n_f = n.max(1) as f64;
        let y_mean = y.iter().sum::<f64>() / n_f;
        let mut col_means = vec![0.0; n_features];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                col_means[i] += v;
            }
        }
        for m in &mut col_means {
            *m /= n_f;
        }

        // Column-major centered copy plus column squared norms.
        let mut cols: Vec<Vec<f64>> = vec![Vec::with_capacity(n); n_features];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                cols[i].push(v - col_means[i]);
            }
        }
        let norms: Vec<f64> = cols
            .iter()
            .map(|c| c.iter().map(|v| v * v).sum::<f64>() / n_f)
            .collect();

        let l1 = alpha * l1_ratio;
        let l2 = alpha * (1.0 - l1_ratio);
        let mut weights = vec![0.0; n_features];
        let mut residual: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        for _ in 0..CD_ITERATIONS {
            let mut max_delta: f64 = 0.0;
            for j in 0..n_features {
                if norms[j] < 1e-12 {
                    continue;
                }
                let old = weights[j];
                // Partial residual correlation with column j.
                let mut rho = 0.0;
                for (r, v) in residual.iter().zip(&cols[j]) {
                    rho += (r + old * v) * v;
                }
                rho /= n_f;
                let new = soft_threshold(rho, l1) / (norms[j] + l2);
                if (new - old).abs() > 1e-15 {
                    for (r, v) in residual.iter_mut().zip(&cols[j]) {
                        *r += (old - new) * v;
                    }
                    weights[j] = new;
                    max_delta = max_delta.max((new - old).abs());
                }
            }
            if max_delta < CD_TOLERANCE {
                break;
            }
        }

        let intercept = y_mean - dot(&weights, &col_means);
        Self {
            weights,
            intercept,
            alpha,
            l1_ratio,
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| dot(&self.weights, row) + self.intercept)
            .collect()
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}
