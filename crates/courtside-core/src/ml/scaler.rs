//! Feature standardization

use serde::{Deserialize, Serialize};

/// Column-wise standard scaler. Columns with zero variance pass through
/// centered but unscaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; n_features];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                mean[i] += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let mut std = vec![0.0; n_features];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                std[i] += (v - mean[i]).powi(2);
            }
        }
        for s in &mut std {
            *s = (*s / n).sqrt();
            if *s < 1e-12 {
                *s = 1.0;
            }
        }
        Self { mean, std }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.mean.get(i).unwrap_or(&0.0)) / self.std.get(i).unwrap_or(&1.0))
            .collect()
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter().map(|row| self.transform_row(row)).collect()
    }

    pub fn fit_transform(x: &[Vec<f64>]) -> (Self, Vec<Vec<f64>>) {
        let scaler = Self::fit(x);
        let scaled = scaler.transform(x);
        (scaler, scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_columns_have_zero_mean_unit_variance() {
        let x = vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0], vec![4.0, 40.0]];
        let (_, scaled) = StandardScaler::fit_transform(&x);
        for col in 0..2 {
            let mean: f64 = scaled.iter().map(|r| r[col]).sum::<f64>() / scaled.len() as f64;
            let var: f64 =
                scaled.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / scaled.len() as f64;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_column_is_not_scaled() {
        let x = vec![vec![5.0], vec![5.0], vec![5.0]];
        let scaler = StandardScaler::fit(&x);
        assert_eq!(scaler.transform_row(&[5.0]), vec![0.0]);
        assert_eq!(scaler.transform_row(&[6.0]), vec![1.0]);
    }
}
