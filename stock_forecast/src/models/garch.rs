//! GARCH volatility forecaster
//!
//! Works on percentage returns (x100). The (p, q) order is grid-searched by
//! AIC on the first 80% of returns, parameters are estimated by
//! numerical-gradient ascent on the Gaussian likelihood under the
//! stationarity constraint, and the held-out tail is walked one step at a
//! time as a backtest. Forecasts project the conditional variance forward
//! and report annualized volatility with a fixed relative band.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use crate::stats;
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use tracing::{debug, info, warn};

const TRADING_DAYS: f64 = 252.0;
const BAND_FRACTION: f64 = 0.10;
const STATIONARITY_CAP: f64 = 0.999;

#[derive(Debug, Clone)]
pub struct GarchParams {
    pub max_order: usize,
    pub optimizer_iterations: usize,
    /// Iterations for the warm-started backtest refits
    pub backtest_iterations: usize,
    pub learning_rate: f64,
}

impl Default for GarchParams {
    fn default() -> Self {
        Self {
            max_order: 3,
            optimizer_iterations: 300,
            backtest_iterations: 40,
            learning_rate: 1e-3,
        }
    }
}

/// Estimated GARCH(p, q) coefficients
#[derive(Debug, Clone)]
pub struct GarchFit {
    pub p: usize,
    pub q: usize,
    pub omega: f64,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub log_likelihood: f64,
    pub aic: f64,
}

impl GarchFit {
    pub fn persistence(&self) -> f64 {
        self.alpha.iter().sum::<f64>() + self.beta.iter().sum::<f64>()
    }

    /// Conditional variance series over the given returns
    fn conditional_variance(&self, returns: &[f64]) -> Vec<f64> {
        let unconditional = stats::variance(returns).max(1e-8);
        let mut sigma2 = Vec::with_capacity(returns.len());
        for t in 0..returns.len() {
            let mut v = self.omega;
            for (i, a) in self.alpha.iter().enumerate() {
                let eps2 = if t > i {
                    returns[t - 1 - i].powi(2)
                } else {
                    unconditional
                };
                v += a * eps2;
            }
            for (j, b) in self.beta.iter().enumerate() {
                let prev = if t > j {
                    sigma2[t - 1 - j]
                } else {
                    unconditional
                };
                v += b * prev;
            }
            sigma2.push(v.max(1e-10));
        }
        sigma2
    }

    fn log_likelihood_on(&self, returns: &[f64]) -> f64 {
        let sigma2 = self.conditional_variance(returns);
        returns
            .iter()
            .zip(&sigma2)
            .map(|(r, v)| -0.5 * ((2.0 * std::f64::consts::PI * v).ln() + r * r / v))
            .sum()
    }

    /// Variance forecast `horizon` steps ahead, mean-reverting recursion
    fn forecast_variance(&self, returns: &[f64], horizon: usize) -> Vec<f64> {
        let sigma2 = self.conditional_variance(returns);
        let unconditional = stats::variance(returns).max(1e-8);
        let mut eps2: Vec<f64> = returns.iter().rev().map(|r| r * r).collect();
        let mut vars: Vec<f64> = sigma2.iter().rev().copied().collect();

        let mut out = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let mut v = self.omega;
            for (i, a) in self.alpha.iter().enumerate() {
                v += a * eps2.get(i).copied().unwrap_or(unconditional);
            }
            for (j, b) in self.beta.iter().enumerate() {
                v += b * vars.get(j).copied().unwrap_or(unconditional);
            }
            let v = v.max(1e-10);
            out.push(v);
            // Future squared shocks are replaced by their expectation
            eps2.insert(0, v);
            vars.insert(0, v);
        }
        out
    }
}

/// Project coefficients onto the stationary region
fn project(fit: &mut GarchFit) {
    fit.omega = fit.omega.max(1e-6);
    for a in &mut fit.alpha {
        *a = a.max(0.0);
    }
    for b in &mut fit.beta {
        *b = b.max(0.0);
    }
    let persistence = fit.persistence();
    if persistence >= STATIONARITY_CAP {
        let scale = STATIONARITY_CAP / persistence;
        for a in &mut fit.alpha {
            *a *= scale;
        }
        for b in &mut fit.beta {
            *b *= scale;
        }
    }
}

/// Maximum likelihood via central-difference gradient ascent
fn optimize(
    returns: &[f64],
    p: usize,
    q: usize,
    iterations: usize,
    learning_rate: f64,
    warm_start: Option<&GarchFit>,
) -> Result<GarchFit> {
    if returns.len() < 50 + p + q {
        return Err(ForecastError::InsufficientData(format!(
            "{} returns cannot support GARCH({},{})",
            returns.len(),
            p,
            q
        )));
    }

    let variance = stats::variance(returns).max(1e-8);
    let mut fit = match warm_start {
        Some(prev) if prev.p == p && prev.q == q => prev.clone(),
        _ => GarchFit {
            p,
            q,
            omega: 0.1 * variance,
            alpha: vec![0.1 / p as f64; p],
            beta: vec![0.8 / q as f64; q],
            log_likelihood: f64::NEG_INFINITY,
            aic: f64::INFINITY,
        },
    };
    project(&mut fit);

    let eps = 1e-6;
    for _ in 0..iterations {
        let base = fit.log_likelihood_on(returns);
        if !base.is_finite() {
            return Err(ForecastError::Numerical(
                "GARCH likelihood is non-finite".to_string(),
            ));
        }

        let mut candidate = fit.clone();
        let params = 1 + p + q;
        for idx in 0..params {
            let read = |f: &GarchFit, i: usize| -> f64 {
                if i == 0 {
                    f.omega
                } else if i <= f.p {
                    f.alpha[i - 1]
                } else {
                    f.beta[i - 1 - f.p]
                }
            };
            let write = |f: &mut GarchFit, i: usize, v: f64| {
                if i == 0 {
                    f.omega = v;
                } else if i <= f.p {
                    f.alpha[i - 1] = v;
                } else {
                    f.beta[i - 1 - f.p] = v;
                }
            };

            let original = read(&fit, idx);
            let mut probe = fit.clone();
            write(&mut probe, idx, original + eps);
            project(&mut probe);
            let up = probe.log_likelihood_on(returns);
            write(&mut probe, idx, original - eps);
            project(&mut probe);
            let down = probe.log_likelihood_on(returns);
            let gradient = (up - down) / (2.0 * eps);
            write(
                &mut candidate,
                idx,
                original + learning_rate * gradient.clamp(-1e3, 1e3),
            );
        }
        project(&mut candidate);

        let improved = candidate.log_likelihood_on(returns);
        if improved <= base + 1e-9 {
            break;
        }
        fit = candidate;
        fit.log_likelihood = improved;
    }

    fit.log_likelihood = fit.log_likelihood_on(returns);
    let k = (1 + p + q) as f64;
    fit.aic = -2.0 * fit.log_likelihood + 2.0 * k;
    if !fit.aic.is_finite() {
        return Err(ForecastError::Numerical(
            "GARCH fit produced a non-finite AIC".to_string(),
        ));
    }
    Ok(fit)
}

/// One backtest record: predicted next-day volatility vs what happened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestPoint {
    pub predicted_vol: f64,
    pub realized_abs_return: f64,
}

pub struct GarchForecaster {
    config: ForecasterConfig,
    history: LoadedHistory,
    /// Percentage returns (x100) over the full history
    returns: Vec<f64>,
    fit: GarchFit,
    backtest: Vec<BacktestPoint>,
    last: Option<ForecastResult>,
}

impl GarchForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, GarchParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: GarchParams,
    ) -> Result<Self> {
        let returns: Vec<f64> = stats::pct_change(&history.target)
            .iter()
            .map(|r| r * 100.0)
            .collect();
        if returns.len() < 120 {
            return Err(ForecastError::InsufficientData(format!(
                "GARCH needs at least 120 returns, got {}",
                returns.len()
            )));
        }

        let (train, test) = stats::train_test_split(&returns, 0.8);

        // Order selection on the training slice
        let mut best: Option<GarchFit> = None;
        for p in 1..=params.max_order {
            for q in 1..=params.max_order {
                match optimize(
                    train,
                    p,
                    q,
                    params.optimizer_iterations,
                    params.learning_rate,
                    None,
                ) {
                    Ok(fit) => {
                        debug!(p, q, aic = fit.aic, "GARCH candidate");
                        if best.as_ref().map_or(true, |b| fit.aic < b.aic) {
                            best = Some(fit);
                        }
                    }
                    Err(err) => warn!(p, q, error = %err, "skipping GARCH candidate"),
                }
            }
        }
        let selected = best.ok_or_else(|| {
            ForecastError::NoViableModel("every GARCH candidate failed to fit".to_string())
        })?;

        // Walk the held-out tail one step at a time, warm-started refits
        let mut backtest = Vec::with_capacity(test.len());
        let mut rolling_fit = selected.clone();
        for i in 0..test.len() {
            let observed = &returns[..train.len() + i];
            rolling_fit = optimize(
                observed,
                selected.p,
                selected.q,
                params.backtest_iterations,
                params.learning_rate,
                Some(&rolling_fit),
            )?;
            let next_var = rolling_fit.forecast_variance(observed, 1)[0];
            backtest.push(BacktestPoint {
                predicted_vol: next_var.sqrt(),
                realized_abs_return: test[i].abs(),
            });
        }

        // Final fit on everything
        let fit = optimize(
            &returns,
            selected.p,
            selected.q,
            params.optimizer_iterations,
            params.learning_rate,
            Some(&rolling_fit),
        )?;
        info!(
            symbol = %config.symbol,
            p = fit.p,
            q = fit.q,
            persistence = fit.persistence(),
            aic = fit.aic,
            "selected GARCH order"
        );

        Ok(Self {
            config,
            history,
            returns,
            fit,
            backtest,
            last: None,
        })
    }

    pub fn fit(&self) -> &GarchFit {
        &self.fit
    }

    pub fn backtest_results(&self) -> &[BacktestPoint] {
        &self.backtest
    }
}

impl Forecaster for GarchForecaster {
    fn name(&self) -> &'static str {
        "garch"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Forecasts annualized volatility in percent, not price
    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let variances = self.fit.forecast_variance(&self.returns, horizon_days);

        let dates = business_days_after(self.history.last_date, horizon_days);
        let points: Vec<ForecastPoint> = dates
            .into_iter()
            .zip(&variances)
            .map(|(date, &var)| {
                let annualized = (var * TRADING_DAYS).sqrt();
                ForecastPoint {
                    date,
                    predicted: annualized,
                    lower: annualized * (1.0 - BAND_FRACTION),
                    upper: annualized * (1.0 + BAND_FRACTION),
                }
            })
            .collect();

        let result = ForecastResult::new(
            &self.config.symbol,
            self.name(),
            &self.config.target_column,
            self.history.last_date,
            points,
        )?;
        self.last = Some(result.clone());
        Ok(result)
    }

    fn last_forecast(&self) -> Option<&ForecastResult> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data::generate_ohlcv;

    fn fast_params() -> GarchParams {
        GarchParams {
            max_order: 1,
            optimizer_iterations: 60,
            backtest_iterations: 5,
            learning_rate: 1e-3,
        }
    }

    fn fitted() -> GarchForecaster {
        let series = generate_ohlcv(250, 100.0, 0.02, 29);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        GarchForecaster::from_history(ForecasterConfig::new("TEST"), history, fast_params())
            .unwrap()
    }

    #[test]
    fn test_fit_is_stationary() {
        let model = fitted();
        assert!(model.fit().persistence() < 1.0);
        assert!(model.fit().omega > 0.0);
    }

    #[test]
    fn test_backtest_covers_tail() {
        let model = fitted();
        let expected = model.returns.len() - (model.returns.len() as f64 * 0.8).round() as usize;
        assert_eq!(model.backtest_results().len(), expected);
        for point in model.backtest_results() {
            assert!(point.predicted_vol > 0.0);
        }
    }

    #[test]
    fn test_forecast_is_annualized_and_banded() {
        let mut model = fitted();
        let result = model.forecast(5).unwrap();
        for p in result.points() {
            assert!(p.predicted > 0.0);
            // 2%-daily-vol data should annualize into a sane percent range
            assert!(p.predicted < 200.0, "vol={}", p.predicted);
            assert!((p.lower - p.predicted * 0.9).abs() < 1e-9);
            assert!((p.upper - p.predicted * 1.1).abs() < 1e-9);
        }
    }

    #[test]
    fn test_variance_forecast_mean_reverts() {
        let model = fitted();
        let vars = model.fit.forecast_variance(&model.returns, 60);
        let early = vars[0];
        let late = *vars.last().unwrap();
        let unconditional = stats::variance(&model.returns);
        // The late forecast should sit no further from the unconditional
        // variance than the first step does
        assert!((late - unconditional).abs() <= (early - unconditional).abs() + 1e-6);
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(60, 100.0, 0.02, 5);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result =
            GarchForecaster::from_history(ForecasterConfig::new("TEST"), history, fast_params());
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
