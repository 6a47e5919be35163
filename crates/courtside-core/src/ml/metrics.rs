//! Classification and regression metrics

const PROB_EPS: f64 = 1e-15;

/// Accuracy (percent) of thresholded probabilities against binary labels.
pub fn accuracy(y_true: &[f64], probs: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(probs)
        .filter(|(t, p)| {
            let pred = if **p >= 0.5 { 1.0 } else { 0.0 };
            (pred - **t).abs() < 1e-9
        })
        .count();
    100.0 * correct as f64 / y_true.len() as f64
}

pub fn log_loss(y_true: &[f64], probs: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(probs)
        .map(|(t, p)| {
            let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / y_true.len() as f64
}

pub fn brier_score(y_true: &[f64], probs: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(probs)
        .map(|(t, p)| (p - t).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// ROC AUC via the rank-sum formulation with midrank tie handling.
/// Returns 0.0 when only one class is present.
pub fn roc_auc(y_true: &[f64], probs: &[f64]) -> f64 {
    let n_pos = y_true.iter().filter(|t| **t > 0.5).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.0;
    }
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|a, b| probs[*a].partial_cmp(&probs[*b]).unwrap_or(std::cmp::Ordering::Equal));

    // Midranks over tied scores.
    let mut ranks = vec![0.0; probs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && (probs[order[j + 1]] - probs[order[i]]).abs() < 1e-15 {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = midrank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t > 0.5)
        .map(|(_, r)| r)
        .sum();
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

pub fn mae(y_true: &[f64], preds: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(preds)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / y_true.len() as f64
}

pub fn rmse(y_true: &[f64], preds: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    (y_true
        .iter()
        .zip(preds)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64)
        .sqrt()
}

pub fn r2(y_true: &[f64], preds: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot < 1e-12 {
        return 0.0;
    }
    let ss_res: f64 = y_true.iter().zip(preds).map(|(t, p)| (t - p).powi(2)).sum();
    1.0 - ss_res / ss_tot
}

/// Mean absolute percentage error; zero targets are skipped.
pub fn mape(y_true: &[f64], preds: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut count = 0.0;
    for (t, p) in y_true.iter().zip(preds) {
        if t.abs() > 1e-9 {
            total += ((t - p) / t).abs();
            count += 1.0;
        }
    }
    if count > 0.0 {
        100.0 * total / count
    } else {
        0.0
    }
}

/// ANOVA F-score per feature column for a binary target. Degenerate
/// columns (or classes) score 0.0.
pub fn anova_f_scores(x: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
    let n_features = x.first().map(|r| r.len()).unwrap_or(0);
    let n = x.len();
    let mut scores = vec![0.0; n_features];
    let pos: Vec<usize> = (0..n).filter(|i| y[*i] > 0.5).collect();
    let neg: Vec<usize> = (0..n).filter(|i| y[*i] <= 0.5).collect();
    if pos.len() < 2 || neg.len() < 2 {
        return scores;
    }
    for f in 0..n_features {
        let grand: f64 = x.iter().map(|r| r[f]).sum::<f64>() / n as f64;
        let mean_of = |idx: &[usize]| idx.iter().map(|i| x[*i][f]).sum::<f64>() / idx.len() as f64;
        let m_pos = mean_of(&pos);
        let m_neg = mean_of(&neg);
        let between = pos.len() as f64 * (m_pos - grand).powi(2)
            + neg.len() as f64 * (m_neg - grand).powi(2);
        let within: f64 = pos.iter().map(|i| (x[*i][f] - m_pos).powi(2)).sum::<f64>()
            + neg.iter().map(|i| (x[*i][f] - m_neg).powi(2)).sum::<f64>();
        let df_within = (n - 2) as f64;
        if within > 1e-12 {
            scores[f] = between / (within / df_within);
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_and_losses_on_perfect_predictions() {
        let y = vec![1.0, 0.0, 1.0, 0.0];
        let p = vec![0.9, 0.1, 0.8, 0.2];
        assert_eq!(accuracy(&y, &p), 100.0);
        assert!(log_loss(&y, &p) < 0.25);
        assert!(brier_score(&y, &p) < 0.05);
        assert_eq!(roc_auc(&y, &p), 1.0);
    }

    #[test]
    fn auc_is_half_for_random_scores() {
        let y = vec![1.0, 0.0, 1.0, 0.0];
        let p = vec![0.5, 0.5, 0.5, 0.5];
        assert!((roc_auc(&y, &p) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn auc_zero_with_one_class() {
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.4, 0.6]), 0.0);
    }

    #[test]
    fn regression_metrics_sanity() {
        let y = vec![100.0, 110.0, 120.0];
        let p = vec![102.0, 108.0, 121.0];
        assert!((mae(&y, &p) - (2.0 + 2.0 + 1.0) / 3.0).abs() < 1e-9);
        assert!(rmse(&y, &p) >= mae(&y, &p));
        assert!(r2(&y, &p) > 0.9);
        assert!(mape(&y, &p) < 3.0);
    }

    #[test]
    fn anova_ranks_the_separating_feature_first() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let label = if i < 20 { 0.0 } else { 1.0 };
            // Feature 0 separates the classes; feature 1 is noise-ish.
            x.push(vec![label * 10.0 + (i % 3) as f64, (i % 5) as f64]);
            y.push(label);
        }
        let scores = anova_f_scores(&x, &y);
        assert!(scores[0] > scores[1]);
    }
}
