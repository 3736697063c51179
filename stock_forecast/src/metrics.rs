//! Forecast evaluation metrics

use crate::error::{ForecastError, Result};
use std::fmt;

/// Standard point-forecast accuracy metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastMetrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent
    pub mape: f64,
    /// Symmetric MAPE, in percent
    pub smape: f64,
}

/// Compare predictions against actuals of the same length
pub fn evaluate_forecast(actual: &[f64], predicted: &[f64]) -> Result<ForecastMetrics> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return Err(ForecastError::InvalidParameter(format!(
            "evaluation needs equal-length non-empty series, got {} and {}",
            actual.len(),
            predicted.len()
        )));
    }

    let n = actual.len() as f64;
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut ape_sum = 0.0;
    let mut sape_sum = 0.0;

    for (a, p) in actual.iter().zip(predicted) {
        let err = a - p;
        abs_sum += err.abs();
        sq_sum += err * err;
        if a.abs() > f64::EPSILON {
            ape_sum += (err / a).abs();
        }
        let denom = (a.abs() + p.abs()) / 2.0;
        if denom > f64::EPSILON {
            sape_sum += err.abs() / denom;
        }
    }

    let mse = sq_sum / n;
    Ok(ForecastMetrics {
        mae: abs_sum / n,
        mse,
        rmse: mse.sqrt(),
        mape: ape_sum / n * 100.0,
        smape: sape_sum / n * 100.0,
    })
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MAE:   {:.4}", self.mae)?;
        writeln!(f, "MSE:   {:.4}", self.mse)?;
        writeln!(f, "RMSE:  {:.4}", self.rmse)?;
        writeln!(f, "MAPE:  {:.2}%", self.mape)?;
        write!(f, "SMAPE: {:.2}%", self.smape)
    }
}

/// Area under the ROC curve for binary labels and real-valued scores.
///
/// Computed as the normalized Mann-Whitney U statistic; ties contribute a
/// half count.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Result<f64> {
    if labels.len() != scores.len() || labels.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "AUC needs equal-length non-empty labels and scores".to_string(),
        ));
    }
    let positives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|(l, _)| **l)
        .map(|(_, s)| *s)
        .collect();
    let negatives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|(l, _)| !**l)
        .map(|(_, s)| *s)
        .collect();

    if positives.is_empty() || negatives.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "AUC needs both classes present".to_string(),
        ));
    }

    let mut wins = 0.0;
    for p in &positives {
        for q in &negatives {
            if p > q {
                wins += 1.0;
            } else if (p - q).abs() <= f64::EPSILON {
                wins += 0.5;
            }
        }
    }
    Ok(wins / (positives.len() * negatives.len()) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_perfect_forecast_has_zero_error() {
        let data = vec![1.0, 2.0, 3.0];
        let metrics = evaluate_forecast(&data, &data).unwrap();
        assert_approx_eq!(metrics.mae, 0.0);
        assert_approx_eq!(metrics.rmse, 0.0);
        assert_approx_eq!(metrics.smape, 0.0);
    }

    #[test]
    fn test_known_errors() {
        let actual = vec![100.0, 100.0];
        let predicted = vec![90.0, 110.0];
        let metrics = evaluate_forecast(&actual, &predicted).unwrap();
        assert_approx_eq!(metrics.mae, 10.0);
        assert_approx_eq!(metrics.mse, 100.0);
        assert_approx_eq!(metrics.rmse, 10.0);
        assert_approx_eq!(metrics.mape, 10.0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(evaluate_forecast(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_auc_extremes() {
        let labels = vec![true, true, false, false];
        let perfect = vec![0.9, 0.8, 0.2, 0.1];
        let reversed = vec![0.1, 0.2, 0.8, 0.9];
        assert_approx_eq!(roc_auc(&labels, &perfect).unwrap(), 1.0);
        assert_approx_eq!(roc_auc(&labels, &reversed).unwrap(), 0.0);
    }

    #[test]
    fn test_auc_single_class_is_error() {
        assert!(roc_auc(&[true, true], &[0.5, 0.6]).is_err());
    }
}
