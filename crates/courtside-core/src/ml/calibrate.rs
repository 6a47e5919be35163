//! Probability calibration
//!
//! Platt-style sigmoid and isotonic calibrators fit on a held-out
//! calibration set, per the year-based calibration protocol.

use serde::{Deserialize, Serialize};

use super::linear::fit_platt;

pub fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Which calibration method a config requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Sigmoid,
    Isotonic,
}

impl Default for CalibrationMethod {
    fn default() -> Self {
        CalibrationMethod::Sigmoid
    }
}

/// A fitted calibrator mapping raw scores to calibrated probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Calibrator {
    Sigmoid { a: f64, b: f64 },
    Isotonic { thresholds: Vec<f64>, values: Vec<f64> },
}

impl Calibrator {
    pub fn fit(method: CalibrationMethod, scores: &[f64], labels: &[f64]) -> Self {
        match method {
            CalibrationMethod::Sigmoid => {
                let (a, b) = fit_platt(scores, labels);
                Calibrator::Sigmoid { a, b }
            }
            CalibrationMethod::Isotonic => {
                let (thresholds, values) = fit_isotonic(scores, labels);
                Calibrator::Isotonic { thresholds, values }
            }
        }
    }

    pub fn apply(&self, score: f64) -> f64 {
        match self {
            Calibrator::Sigmoid { a, b } => sigmoid(a * score + b),
            Calibrator::Isotonic { thresholds, values } => {
                if thresholds.is_empty() {
                    return score.clamp(0.0, 1.0);
                }
                let idx = thresholds.partition_point(|t| *t <= score);
                if idx == 0 {
                    values[0]
                } else {
                    values[idx - 1]
                }
            }
        }
    }

    pub fn apply_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|s| self.apply(*s)).collect()
    }
}

/// Pool-adjacent-violators isotonic fit: returns block thresholds (left
/// edges, sorted) and their calibrated values.
fn fit_isotonic(scores: &[f64], labels: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    if pairs.is_empty() {
        return (Vec::new(), Vec::new());
    }

    // Each block: (mean value, weight, left score edge).
    let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs.len());
    for (score, label) in pairs {
        blocks.push((label, 1.0, score));
        while blocks.len() >= 2 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.0 <= last.0 {
                break;
            }
            let merged_weight = prev.1 + last.1;
            let merged_value = (prev.0 * prev.1 + last.0 * last.1) / merged_weight;
            blocks.truncate(blocks.len() - 2);
            blocks.push((merged_value, merged_weight, prev.2));
        }
    }

    let thresholds: Vec<f64> = blocks.iter().map(|b| b.2).collect();
    let values: Vec<f64> = blocks.iter().map(|b| b.0.clamp(0.0, 1.0)).collect();
    (thresholds, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_calibrator_is_monotone() {
        let scores: Vec<f64> = (-10..=10).map(|i| i as f64 / 2.0).collect();
        let labels: Vec<f64> = scores.iter().map(|s| if *s > 0.0 { 1.0 } else { 0.0 }).collect();
        let cal = Calibrator::fit(CalibrationMethod::Sigmoid, &scores, &labels);
        let out = cal.apply_all(&scores);
        assert!(out.windows(2).all(|w| w[0] <= w[1] + 1e-9));
        assert!(out.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn isotonic_calibrator_is_monotone_and_pools_violators() {
        let scores = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let labels = vec![0.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        let cal = Calibrator::fit(CalibrationMethod::Isotonic, &scores, &labels);
        let out = cal.apply_all(&scores);
        assert!(out.windows(2).all(|w| w[0] <= w[1] + 1e-9));
    }

    #[test]
    fn isotonic_extrapolates_with_edge_blocks() {
        let scores = vec![0.2, 0.4, 0.6, 0.8];
        let labels = vec![0.0, 0.0, 1.0, 1.0];
        let cal = Calibrator::fit(CalibrationMethod::Isotonic, &scores, &labels);
        assert!(cal.apply(0.0) <= cal.apply(1.0));
    }
}
