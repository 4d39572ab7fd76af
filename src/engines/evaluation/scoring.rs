//! Scoring metrics, penalty policies, the linear coefficient correction and
//! dimensional fitness.

use crate::dim::Dim;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Accuracy metric over `(y_true, y_pred)`; higher-is-better under
/// `ScorePenalty::PositiveBest`.
pub type ScoringFn = fn(&[f64], &[f64]) -> f64;

/// Coefficient of determination. Returns NaN for a constant target, which
/// the engine absorbs as the worst score.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return f64::NAN;
    }
    let mean = y_true[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = y_true[..n].iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = y_true[..n]
        .iter()
        .zip(&y_pred[..n])
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

/// Root mean squared error; lower-is-better, pair with
/// `ScorePenalty::NegativeBest`.
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return f64::NAN;
    }
    let mse: f64 = y_true[..n]
        .iter()
        .zip(&y_pred[..n])
        .map(|(y, p)| (y - p).powi(2))
        .sum::<f64>()
        / n as f64;
    mse.sqrt()
}

/// Direction of the scoring metric, fixing which sentinel stands in for a
/// failed evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScorePenalty {
    /// Best scores are large and positive; failures become `-inf`.
    PositiveBest,
    /// Best scores are small (error metrics); failures become `+inf`.
    NegativeBest,
    /// Best scores are positive, floor at zero; failures become `0`.
    ZeroBest,
}

impl ScorePenalty {
    pub fn worst(self) -> f64 {
        match self {
            ScorePenalty::PositiveBest => f64::NEG_INFINITY,
            ScorePenalty::NegativeBest => f64::INFINITY,
            ScorePenalty::ZeroBest => 0.0,
        }
    }
}

/// Least-squares fit of `y ≈ slope * pred + intercept`. A constant
/// prediction degrades to slope 0 with the target mean (or zero) as
/// intercept.
pub fn fit_linear(pred: &[f64], y: &[f64], fit_intercept: bool) -> (f64, f64) {
    let n = pred.len().min(y.len());
    if n == 0 {
        return (1.0, 0.0);
    }
    let nf = n as f64;
    if fit_intercept {
        let mp = pred[..n].iter().sum::<f64>() / nf;
        let my = y[..n].iter().sum::<f64>() / nf;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (p, t) in pred[..n].iter().zip(&y[..n]) {
            sxx += (p - mp) * (p - mp);
            sxy += (p - mp) * (t - my);
        }
        if sxx <= f64::EPSILON * nf {
            (0.0, my)
        } else {
            let slope = sxy / sxx;
            (slope, my - slope * mp)
        }
    } else {
        let sxx: f64 = pred[..n].iter().map(|p| p * p).sum();
        let sxy: f64 = pred[..n].iter().zip(&y[..n]).map(|(p, t)| p * t).sum();
        if sxx <= f64::EPSILON * nf {
            (0.0, 0.0)
        } else {
            (sxy / sxx, 0.0)
        }
    }
}

/// Dimensional fitness of a combined dimension against the target: exact
/// match scores 1.0, a valid but different dimension scores the configured
/// penalty, an invalid combination scores 0.
pub fn dim_fitness(dim: &Dim, target: &Dim, penalty: f64) -> f64 {
    if dim.is_invalid() {
        0.0
    } else if dim == target {
        1.0
    } else {
        penalty
    }
}

/// Result of the detailed pass's coefficient correction. The pure
/// (uncorrected) prediction stays cached on the tree alongside this.
#[derive(Debug, Clone)]
pub struct CoefCorrection {
    pub slope: f64,
    pub intercept: f64,
    pub pre_y: Arc<Vec<f64>>,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2_of_exact_prediction_is_one() {
        let y = [1.0, 2.0, 3.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn r2_of_mean_prediction_is_zero() {
        let y = [1.0, 2.0, 3.0];
        let p = [2.0, 2.0, 2.0];
        assert!(r2_score(&y, &p).abs() < 1e-12);
    }

    #[test]
    fn r2_of_constant_target_is_nan() {
        let y = [2.0, 2.0, 2.0];
        let p = [1.0, 2.0, 3.0];
        assert!(r2_score(&y, &p).is_nan());
    }

    #[test]
    fn rmse_measures_error() {
        let y = [1.0, 2.0, 3.0];
        let p = [2.0, 3.0, 4.0];
        assert!((rmse(&y, &p) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn worst_scores_follow_the_penalty_policy() {
        assert_eq!(ScorePenalty::PositiveBest.worst(), f64::NEG_INFINITY);
        assert_eq!(ScorePenalty::NegativeBest.worst(), f64::INFINITY);
        assert_eq!(ScorePenalty::ZeroBest.worst(), 0.0);
    }

    #[test]
    fn linear_fit_recovers_slope_and_intercept() {
        let pred: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = pred.iter().map(|p| 3.0 * p - 5.0).collect();
        let (a, b) = fit_linear(&pred, &y, true);
        assert!((a - 3.0).abs() < 1e-9);
        assert!((b + 5.0).abs() < 1e-9);

        let (a, b) = fit_linear(&pred, &y, false);
        assert_eq!(b, 0.0);
        assert!(a.is_finite());
    }

    #[test]
    fn constant_prediction_degrades_gracefully() {
        let pred = [1.0; 5];
        let y = [2.0, 3.0, 4.0, 5.0, 6.0];
        let (a, b) = fit_linear(&pred, &y, true);
        assert_eq!(a, 0.0);
        assert!((b - 4.0).abs() < 1e-12);
    }

    #[test]
    fn dim_fitness_grades_match_penalty_invalid() {
        let length = Dim::from_exponents(&[1.0]);
        let time = Dim::from_exponents(&[0.0, 1.0]);
        assert_eq!(dim_fitness(&length, &length, 0.2), 1.0);
        assert_eq!(dim_fitness(&time, &length, 0.2), 0.2);
        assert_eq!(dim_fitness(&Dim::Invalid, &length, 0.2), 0.0);
    }
}
