//! Classification metrics over a `ScoreSet`.
//!
//! - accuracy
//! - macro F1 over the union of true and predicted labels
//! - ROC-AUC by the rank statistic (mid-ranks for ties), positive class `1`
//! - ROC curve points for plotting
//!
//! ROC-AUC is never reported as NaN: unusable input is a `DataError`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::model::ScoreSet;

/// Persisted metrics. Serializes to exactly `accuracy`, `f1`, `roc_auc`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub accuracy: f64,
    pub f1: f64,
    pub roc_auc: f64,
}

/// Fraction of rows with `y_pred == y_true`; `0.0` for no rows.
pub fn accuracy(scores: &ScoreSet) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let hits = scores
        .y_true()
        .iter()
        .zip(scores.y_pred())
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / scores.len() as f64
}

/// Unweighted mean of per-class F1. A class with no true positives scores 0.
pub fn macro_f1(scores: &ScoreSet) -> f64 {
    let cm = ConfusionMatrix::from_scores(scores);
    if cm.labels.is_empty() {
        return 0.0;
    }
    let total: f64 = (0..cm.labels.len()).map(|k| cm.f1(k)).sum();
    total / cm.labels.len() as f64
}

pub fn roc_auc(scores: &ScoreSet) -> Result<f64, AppError> {
    let (proba, n_pos, n_neg) = binary_inputs(scores)?;
    let y = scores.y_true();
    let n = y.len();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| proba[a].partial_cmp(&proba[b]).unwrap_or(std::cmp::Ordering::Equal));

    // Ascending 1-based ranks; tied scores share their mean rank.
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && proba[order[j]] == proba[order[i]] {
            j += 1;
        }
        let mid_rank = (i + 1 + j) as f64 / 2.0;
        rank_sum_pos += mid_rank * order[i..j].iter().filter(|&&k| y[k] == 1).count() as f64;
        i = j;
    }

    let (p, q) = (n_pos as f64, n_neg as f64);
    Ok((rank_sum_pos - p * (p + 1.0) / 2.0) / (p * q))
}

/// ROC curve as `(false positive rate, true positive rate)` points, from
/// `(0, 0)` to `(1, 1)`, one point per distinct threshold.
pub fn roc_curve(scores: &ScoreSet) -> Result<Vec<(f64, f64)>, AppError> {
    let (proba, n_pos, n_neg) = binary_inputs(scores)?;
    let y = scores.y_true();

    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|&a, &b| proba[b].partial_cmp(&proba[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut points = vec![(0.0, 0.0)];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &k) in order.iter().enumerate() {
        if y[k] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_tie = order.get(pos + 1).is_none_or(|&next| proba[next] != proba[k]);
        if last_of_tie {
            points.push((fp as f64 / n_neg as f64, tp as f64 / n_pos as f64));
        }
    }
    Ok(points)
}

/// Compute accuracy, macro F1 and ROC-AUC.
pub fn evaluate_performance(scores: &ScoreSet) -> Result<MetricsReport, AppError> {
    if scores.is_empty() {
        return Err(AppError::data("Cannot evaluate an empty score set."));
    }
    let report = MetricsReport {
        accuracy: accuracy(scores),
        f1: macro_f1(scores),
        roc_auc: roc_auc(scores)?,
    };
    debug!(?report, "Metrics computed");
    info!(
        accuracy = report.accuracy,
        f1 = report.f1,
        roc_auc = report.roc_auc,
        "Performance evaluated"
    );
    Ok(report)
}

/// Per-label confusion counts; `counts[t][p]` is rows with true label
/// `labels[t]` predicted as `labels[p]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    pub labels: Vec<i64>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_scores(scores: &ScoreSet) -> Self {
        let mut labels: Vec<i64> = scores.y_true().iter().chain(scores.y_pred()).copied().collect();
        labels.sort_unstable();
        labels.dedup();

        let k = labels.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (t, p) in scores.y_true().iter().zip(scores.y_pred()) {
            if let (Ok(ti), Ok(pi)) = (labels.binary_search(t), labels.binary_search(p)) {
                counts[ti][pi] += 1;
            }
        }
        Self { labels, counts }
    }

    /// F1 for the label at index `k`: `2tp / (2tp + fp + fn)`.
    pub fn f1(&self, k: usize) -> f64 {
        let tp = self.counts[k][k];
        let fp: usize = (0..self.labels.len()).filter(|&t| t != k).map(|t| self.counts[t][k]).sum();
        let fn_: usize = (0..self.labels.len()).filter(|&p| p != k).map(|p| self.counts[k][p]).sum();
        let denom = 2 * tp + fp + fn_;
        if denom == 0 {
            return 0.0;
        }
        (2 * tp) as f64 / denom as f64
    }
}

/// Probabilities plus positive/negative counts, validated for ROC analysis.
fn binary_inputs(scores: &ScoreSet) -> Result<(&[f64], usize, usize), AppError> {
    let proba = scores
        .y_proba()
        .ok_or_else(|| AppError::data("ROC analysis requires predicted probabilities (no `y_proba`)."))?;
    if let Some(bad) = scores.y_true().iter().find(|y| **y != 0 && **y != 1) {
        return Err(AppError::data(format!(
            "ROC analysis requires binary labels {{0, 1}}; found {bad}."
        )));
    }
    if proba.iter().any(|p| !p.is_finite()) {
        return Err(AppError::data("ROC analysis found a non-finite probability."));
    }
    let n_pos = scores.y_true().iter().filter(|y| **y == 1).count();
    let n_neg = scores.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(AppError::data(
            "ROC-AUC is undefined when only one class is present in `y_true`.",
        ));
    }
    Ok((proba, n_pos, n_neg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn scores(y_true: &[i64], y_pred: &[i64], proba: Option<&[f64]>) -> ScoreSet {
        ScoreSet::new(y_true.to_vec(), y_pred.to_vec(), proba.map(<[f64]>::to_vec)).unwrap()
    }

    #[test]
    fn accuracy_counts_matches() {
        let s = scores(&[0, 1, 1, 0], &[0, 1, 0, 0], None);
        assert!((accuracy(&s) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn macro_f1_averages_classes() {
        // class 0: tp=2 fp=1 fn=0 -> 0.8 ; class 1: tp=1 fp=0 fn=1 -> 2/3
        let s = scores(&[0, 1, 1, 0], &[0, 1, 0, 0], None);
        assert!((macro_f1(&s) - (0.8 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn macro_f1_includes_predicted_only_labels() {
        // label 2 never occurs in y_true: its F1 is 0 and still counts.
        let s = scores(&[0, 0], &[0, 2], None);
        let cm = ConfusionMatrix::from_scores(&s);
        assert_eq!(cm.labels, vec![0, 2]);
        assert!((macro_f1(&s) - (2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn auc_perfect_and_inverted() {
        let s = scores(&[0, 0, 1, 1], &[0, 0, 1, 1], Some(&[0.1, 0.2, 0.8, 0.9]));
        assert!((roc_auc(&s).unwrap() - 1.0).abs() < 1e-12);

        let s = scores(&[1, 1, 0, 0], &[0, 0, 1, 1], Some(&[0.1, 0.2, 0.8, 0.9]));
        assert!(roc_auc(&s).unwrap().abs() < 1e-12);
    }

    #[test]
    fn auc_ties_use_mid_ranks() {
        let s = scores(&[0, 1, 0, 1], &[0, 0, 0, 0], Some(&[0.5, 0.5, 0.5, 0.5]));
        assert!((roc_auc(&s).unwrap() - 0.5).abs() < 1e-12);

        // Known value: pairs (pos, neg) with pos > neg: 3 of 4, one tie -> 3.5/4
        let s = scores(&[0, 0, 1, 1], &[0, 0, 1, 1], Some(&[0.1, 0.6, 0.6, 0.9]));
        assert!((roc_auc(&s).unwrap() - 0.875).abs() < 1e-12);
    }

    #[test]
    fn auc_matches_trapezoid_of_curve() {
        let s = scores(
            &[0, 1, 0, 1, 1, 0, 1],
            &[0; 7],
            Some(&[0.2, 0.7, 0.4, 0.4, 0.9, 0.1, 0.3]),
        );
        let curve = roc_curve(&s).unwrap();
        let area: f64 = curve
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[1].1 + w[0].1) / 2.0)
            .sum();
        assert!((roc_auc(&s).unwrap() - area).abs() < 1e-12);
        assert_eq!(curve.first(), Some(&(0.0, 0.0)));
        assert_eq!(curve.last(), Some(&(1.0, 1.0)));
    }

    #[test]
    fn missing_probabilities_only_fail_auc() {
        let s = scores(&[0, 1], &[0, 1], None);
        assert!((accuracy(&s) - 1.0).abs() < 1e-12);
        assert!((macro_f1(&s) - 1.0).abs() < 1e-12);
        assert_eq!(roc_auc(&s).unwrap_err().kind(), ErrorKind::Data);
        assert_eq!(evaluate_performance(&s).unwrap_err().kind(), ErrorKind::Data);
    }

    #[test]
    fn auc_rejects_single_class_and_non_binary() {
        let s = scores(&[1, 1], &[1, 1], Some(&[0.2, 0.9]));
        assert_eq!(roc_auc(&s).unwrap_err().kind(), ErrorKind::Data);

        let s = scores(&[0, 2], &[0, 2], Some(&[0.2, 0.9]));
        assert_eq!(roc_auc(&s).unwrap_err().kind(), ErrorKind::Data);
    }

    #[test]
    fn report_serializes_three_keys() {
        let report = MetricsReport {
            accuracy: 0.5,
            f1: 0.25,
            roc_auc: 0.75,
        };
        let v = serde_json::to_value(report).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["roc_auc"], 0.75);
    }
}
