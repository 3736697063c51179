//! Shared statistical primitives
//!
//! Regression, stationarity testing, returns and split helpers used across
//! the model implementations.

use crate::error::{ForecastError, Result};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance
pub fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64
}

pub fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Simple percentage returns: `(x_t - x_{t-1}) / x_{t-1}`
pub fn pct_change(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub fn log_returns(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// First difference
pub fn difference(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Reverse of [`difference`]: cumulative sum anchored at `base`
pub fn integrate(base: f64, diffs: &[f64]) -> Vec<f64> {
    let mut level = base;
    diffs
        .iter()
        .map(|d| {
            level += d;
            level
        })
        .collect()
}

pub fn rolling_mean(data: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || data.len() < window {
        return Vec::new();
    }
    data.windows(window).map(mean).collect()
}

pub fn rolling_std(data: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || data.len() < window {
        return Vec::new();
    }
    data.windows(window).map(std_dev).collect()
}

/// Chronological split at `train_ratio` (no shuffling)
pub fn train_test_split(data: &[f64], train_ratio: f64) -> (&[f64], &[f64]) {
    let split = ((data.len() as f64) * train_ratio).round() as usize;
    let split = split.min(data.len());
    (&data[..split], &data[split..])
}

/// Expanding-window cross-validation splits over `n` samples.
///
/// Each fold trains on everything before its test block; test blocks tile
/// the tail of the series in order.
pub fn time_series_cv_splits(n: usize, folds: usize) -> Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    if folds == 0 || n < (folds + 1) * 2 {
        return Vec::new();
    }
    let block = n / (folds + 1);
    (1..=folds)
        .map(|k| {
            let test_start = k * block;
            let test_end = if k == folds { n } else { (k + 1) * block };
            (0..test_start, test_start..test_end)
        })
        .collect()
}

/// Two-sided normal quantile for a confidence level, e.g. 0.95 -> 1.96
pub fn normal_quantile(confidence: f64) -> Result<f64> {
    if !(0.0..1.0).contains(&confidence) {
        return Err(ForecastError::InvalidParameter(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ForecastError::Numerical(e.to_string()))?;
    Ok(normal.inverse_cdf(0.5 + confidence / 2.0))
}

/// Ordinary least squares fit
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Standard error of each coefficient
    pub std_errors: Vec<f64>,
    pub sigma2: f64,
}

/// OLS over row-major regressors. `ridge` adds L2 regularization on the
/// diagonal (0.0 for plain OLS).
pub fn ols(rows: &[Vec<f64>], y: &[f64], ridge: f64) -> Result<OlsFit> {
    let n = rows.len();
    if n == 0 || n != y.len() {
        return Err(ForecastError::InsufficientData(
            "regression needs matching, non-empty X and y".to_string(),
        ));
    }
    let k = rows[0].len();
    if k == 0 || n <= k {
        return Err(ForecastError::InsufficientData(format!(
            "regression needs more rows ({}) than regressors ({})",
            n, k
        )));
    }

    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    let x = DMatrix::from_row_slice(n, k, &flat);
    let y_vec = DVector::from_column_slice(y);

    let mut xtx = x.transpose() * &x;
    for i in 0..k {
        xtx[(i, i)] += ridge;
    }
    let xty = x.transpose() * &y_vec;

    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| ForecastError::Numerical("singular design matrix".to_string()))?;
    let beta = &xtx_inv * xty;

    let fitted = &x * &beta;
    let residuals: Vec<f64> = (&y_vec - fitted).iter().copied().collect();
    let sse: f64 = residuals.iter().map(|r| r * r).sum();
    let dof = (n - k).max(1);
    let sigma2 = sse / dof as f64;

    let std_errors = (0..k).map(|i| (sigma2 * xtx_inv[(i, i)]).sqrt()).collect();

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        residuals,
        std_errors,
        sigma2,
    })
}

/// Augmented Dickey-Fuller test result
#[derive(Debug, Clone)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    /// (label, value) critical values at 1%, 5%, 10%
    pub critical_values: Vec<(&'static str, f64)>,
}

impl AdfResult {
    pub fn is_stationary(&self) -> bool {
        self.p_value < 0.05
    }
}

/// Augmented Dickey-Fuller unit-root test with constant.
///
/// Regresses the first difference on the lagged level and lagged
/// differences, and compares the t-statistic of the level coefficient
/// against interpolated critical values.
pub fn adf_test(data: &[f64], max_lag: Option<usize>) -> Result<AdfResult> {
    let n = data.len();
    if n < 16 {
        return Err(ForecastError::InsufficientData(format!(
            "ADF test needs at least 16 observations, got {}",
            n
        )));
    }

    let diff = difference(data);
    let lag = max_lag
        .unwrap_or_else(|| ((n as f64).powf(1.0 / 3.0) * 2.0) as usize)
        .clamp(1, n / 4);

    let effective = diff.len() - lag;
    if effective < lag + 3 {
        return Err(ForecastError::InsufficientData(
            "ADF test has too few effective observations for the lag order".to_string(),
        ));
    }

    let mut rows = Vec::with_capacity(effective);
    let mut y = Vec::with_capacity(effective);
    for t in lag..diff.len() {
        let mut row = Vec::with_capacity(2 + lag);
        row.push(1.0);
        row.push(data[t]); // level y_{t-1}
        for i in 1..=lag {
            row.push(diff[t - i]);
        }
        rows.push(row);
        y.push(diff[t]);
    }

    let fit = ols(&rows, &y, 0.0)?;
    let t_stat = fit.coefficients[1] / fit.std_errors[1];

    Ok(AdfResult {
        statistic: t_stat,
        p_value: adf_p_value(t_stat, n),
        critical_values: vec![("1%", -3.43), ("5%", -2.86), ("10%", -2.57)],
    })
}

/// Interpolated p-value from small-sample-adjusted critical values
fn adf_p_value(t_stat: f64, n: usize) -> f64 {
    let cv_1 = -3.43 - 6.0 / n as f64;
    let cv_5 = -2.86 - 4.0 / n as f64;
    let cv_10 = -2.57 - 3.0 / n as f64;

    if t_stat < cv_1 {
        0.01 * (cv_1 - t_stat).exp().recip()
    } else if t_stat < cv_5 {
        0.01 + (0.05 - 0.01) * (t_stat - cv_1) / (cv_5 - cv_1)
    } else if t_stat < cv_10 {
        0.05 + (0.10 - 0.05) * (t_stat - cv_5) / (cv_10 - cv_5)
    } else {
        0.10 + 0.90 * (1.0 - (-0.5 * (t_stat - cv_10)).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal as NormalDist};

    #[test]
    fn test_difference_and_integrate_are_inverse() {
        let data = vec![10.0, 11.5, 11.0, 12.2, 13.0];
        let diffs = difference(&data);
        let rebuilt = integrate(data[0], &diffs);
        for (a, b) in data[1..].iter().zip(rebuilt.iter()) {
            assert_approx_eq!(a, b, 1e-12);
        }
    }

    #[test]
    fn test_normal_quantile_95() {
        assert_approx_eq!(normal_quantile(0.95).unwrap(), 1.959964, 1e-4);
    }

    #[test]
    fn test_ols_recovers_line() {
        // y = 2 + 3x
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..50).map(|i| 2.0 + 3.0 * i as f64).collect();
        let fit = ols(&rows, &y, 0.0).unwrap();
        assert_approx_eq!(fit.coefficients[0], 2.0, 1e-8);
        assert_approx_eq!(fit.coefficients[1], 3.0, 1e-8);
    }

    #[test]
    fn test_adf_rejects_unit_root_on_white_noise() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = NormalDist::new(0.0, 1.0).unwrap();
        let data: Vec<f64> = (0..400).map(|_| noise.sample(&mut rng)).collect();
        let result = adf_test(&data, None).unwrap();
        assert!(result.is_stationary(), "t={}", result.statistic);
    }

    #[test]
    fn test_adf_keeps_unit_root_on_random_walk() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = NormalDist::new(0.0, 1.0).unwrap();
        let mut level = 0.0;
        let data: Vec<f64> = (0..400)
            .map(|_| {
                level += noise.sample(&mut rng);
                level
            })
            .collect();
        let result = adf_test(&data, None).unwrap();
        assert!(!result.is_stationary(), "t={}", result.statistic);
    }

    #[test]
    fn test_cv_splits_are_chronological() {
        let splits = time_series_cv_splits(100, 4);
        assert_eq!(splits.len(), 4);
        for (train, test) in &splits {
            assert_eq!(train.start, 0);
            assert_eq!(train.end, test.start);
            assert!(test.end <= 100);
        }
        assert_eq!(splits.last().unwrap().1.end, 100);
    }

    #[test]
    fn test_train_test_split_ratio() {
        let data: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let (train, test) = train_test_split(&data, 0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test[0], 8.0);
    }
}
