//! ARIMA forecaster
//!
//! Works in the log-price domain. The integration order is chosen by
//! repeated differencing until an ADF test rejects the unit root (at most
//! three passes); the AR and MA orders are grid-searched by AIC with
//! Hannan-Rissanen estimation. Forecasts are produced in the differenced
//! log domain and reversed back to price levels.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use crate::stats;
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use tracing::{debug, info, warn};

const MAX_DIFF_ORDER: usize = 3;
const MAX_AR_ORDER: usize = 2;
const MAX_MA_ORDER: usize = 2;
const CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone)]
struct ArmaFit {
    p: usize,
    q: usize,
    intercept: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    residuals: Vec<f64>,
    sigma2: f64,
    aic: f64,
}

#[derive(Debug, Clone)]
struct FittedArima {
    d: usize,
    /// Last value of each integration layer, outermost (log level) first
    integration_bases: Vec<f64>,
    /// The d-times differenced log series the ARMA part was fit on
    stationary: Vec<f64>,
    arma: ArmaFit,
}

pub struct ArimaForecaster {
    config: ForecasterConfig,
    history: LoadedHistory,
    fitted: FittedArima,
    last: Option<ForecastResult>,
}

impl ArimaForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history)
    }

    /// Fit on an already-loaded history
    pub fn from_history(config: ForecasterConfig, history: LoadedHistory) -> Result<Self> {
        if history.target.len() < 60 {
            return Err(ForecastError::InsufficientData(format!(
                "ARIMA needs at least 60 observations, got {}",
                history.target.len()
            )));
        }
        if history.target.iter().any(|v| *v <= 0.0) {
            return Err(ForecastError::InvalidParameter(
                "log transform requires strictly positive values".to_string(),
            ));
        }

        let log_prices: Vec<f64> = history.target.iter().map(|v| v.ln()).collect();
        let (d, integration_bases, stationary) = select_diff_order(&log_prices)?;
        let arma = select_arma(&stationary)?;
        info!(
            symbol = %config.symbol,
            p = arma.p,
            d,
            q = arma.q,
            aic = arma.aic,
            "selected ARIMA order"
        );

        Ok(Self {
            config,
            history,
            fitted: FittedArima {
                d,
                integration_bases,
                stationary,
                arma,
            },
            last: None,
        })
    }

    pub fn order(&self) -> (usize, usize, usize) {
        (self.fitted.arma.p, self.fitted.d, self.fitted.arma.q)
    }

    pub fn aic(&self) -> f64 {
        self.fitted.arma.aic
    }
}

/// Difference until the ADF test rejects the unit root, up to
/// `MAX_DIFF_ORDER` passes, recording the base needed to reverse each pass.
fn select_diff_order(log_prices: &[f64]) -> Result<(usize, Vec<f64>, Vec<f64>)> {
    let mut series = log_prices.to_vec();
    let mut bases = Vec::new();

    for d in 0..=MAX_DIFF_ORDER {
        let adf = stats::adf_test(&series, None)?;
        debug!(d, statistic = adf.statistic, p_value = adf.p_value, "ADF pass");
        if adf.is_stationary() {
            return Ok((d, bases, series));
        }
        if d == MAX_DIFF_ORDER {
            break;
        }
        let last = *series
            .last()
            .ok_or_else(|| ForecastError::InsufficientData("empty series".to_string()))?;
        bases.push(last);
        series = stats::difference(&series);
    }

    Err(ForecastError::NonStationarySeries(format!(
        "series still has a unit root after {} differencing passes",
        MAX_DIFF_ORDER
    )))
}

/// Grid-search (p, q) by AIC; candidates that fail to fit are skipped
fn select_arma(series: &[f64]) -> Result<ArmaFit> {
    let mut best: Option<ArmaFit> = None;
    for p in 0..=MAX_AR_ORDER {
        for q in 0..=MAX_MA_ORDER {
            if p == 0 && q == 0 {
                continue;
            }
            match fit_arma(series, p, q) {
                Ok(fit) => {
                    debug!(p, q, aic = fit.aic, "ARMA candidate");
                    if best.as_ref().map_or(true, |b| fit.aic < b.aic) {
                        best = Some(fit);
                    }
                }
                Err(err) => {
                    warn!(p, q, error = %err, "skipping ARMA candidate");
                }
            }
        }
    }
    best.ok_or_else(|| {
        ForecastError::NoViableModel("every ARMA candidate failed to fit".to_string())
    })
}

/// Hannan-Rissanen two-stage estimation. A pure AR model falls back to a
/// single OLS stage.
fn fit_arma(series: &[f64], p: usize, q: usize) -> Result<ArmaFit> {
    let n = series.len();
    let proxy_residuals = if q > 0 {
        // Stage one: long-AR residuals stand in for the unobserved shocks
        let long_order = (p.max(q) + 5).min(n / 4);
        ar_residuals(series, long_order)?
    } else {
        vec![0.0; n]
    };

    let start = p.max(q);
    if n <= start + p + q + 2 {
        return Err(ForecastError::InsufficientData(format!(
            "{} observations cannot support ARMA({},{})",
            n, p, q
        )));
    }

    let mut rows = Vec::with_capacity(n - start);
    let mut y = Vec::with_capacity(n - start);
    for t in start..n {
        let mut row = Vec::with_capacity(1 + p + q);
        row.push(1.0);
        for i in 1..=p {
            row.push(series[t - i]);
        }
        for j in 1..=q {
            row.push(proxy_residuals[t - j]);
        }
        rows.push(row);
        y.push(series[t]);
    }

    let fit = stats::ols(&rows, &y, 0.0)?;
    let intercept = fit.coefficients[0];
    let ar = fit.coefficients[1..=p].to_vec();
    let ma = fit.coefficients[1 + p..].to_vec();

    // Residuals aligned with the full series (zeros over the warm-up)
    let mut residuals = vec![0.0; start];
    residuals.extend(fit.residuals.iter());

    let sigma2 = fit.sigma2.max(1e-12);
    let k = (p + q + 1) as f64;
    let aic = (n - start) as f64 * sigma2.ln() + 2.0 * k;

    if !aic.is_finite() || ar.iter().chain(&ma).any(|c| !c.is_finite()) {
        return Err(ForecastError::Numerical(
            "non-finite ARMA coefficients".to_string(),
        ));
    }

    Ok(ArmaFit {
        p,
        q,
        intercept,
        ar,
        ma,
        residuals,
        sigma2,
        aic,
    })
}

/// Residuals of a pure AR(order) OLS fit, aligned with the input
fn ar_residuals(series: &[f64], order: usize) -> Result<Vec<f64>> {
    let order = order.max(1);
    let n = series.len();
    if n <= order + 2 {
        return Err(ForecastError::InsufficientData(
            "series too short for the long-AR stage".to_string(),
        ));
    }
    let mut rows = Vec::with_capacity(n - order);
    let mut y = Vec::with_capacity(n - order);
    for t in order..n {
        let mut row = Vec::with_capacity(order + 1);
        row.push(1.0);
        for i in 1..=order {
            row.push(series[t - i]);
        }
        rows.push(row);
        y.push(series[t]);
    }
    let fit = stats::ols(&rows, &y, 0.0)?;
    let mut residuals = vec![0.0; order];
    residuals.extend(fit.residuals.iter());
    Ok(residuals)
}

impl Forecaster for ArimaForecaster {
    fn name(&self) -> &'static str {
        "arima"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let fitted = &self.fitted;
        let arma = &fitted.arma;

        // Recursion over the stationary series with future shocks at zero
        let mut extended = fitted.stationary.clone();
        let mut shocks = arma.residuals.clone();
        let mut point = Vec::with_capacity(horizon_days);
        for _ in 0..horizon_days {
            let t = extended.len();
            let mut value = arma.intercept;
            for (i, coef) in arma.ar.iter().enumerate() {
                value += coef * extended[t - 1 - i];
            }
            for (j, coef) in arma.ma.iter().enumerate() {
                value += coef * shocks[t - 1 - j];
            }
            extended.push(value);
            shocks.push(0.0);
            point.push(value);
        }

        // Reverse the differencing, innermost layer first, back to log
        // levels; the margin is applied to the integrated path so it grows
        // with sqrt(h) rather than compounding per step
        let mut log_levels = point;
        for base in fitted.integration_bases.iter().rev() {
            log_levels = stats::integrate(*base, &log_levels);
        }

        let z = stats::normal_quantile(CONFIDENCE)?;
        let sigma = arma.sigma2.sqrt();

        let dates = business_days_after(self.history.last_date, horizon_days);
        let points: Vec<ForecastPoint> = dates
            .into_iter()
            .zip(&log_levels)
            .enumerate()
            .map(|(h, (date, level))| {
                let margin = z * sigma * ((h + 1) as f64).sqrt();
                ForecastPoint {
                    date,
                    predicted: level.exp(),
                    lower: (level - margin).exp(),
                    upper: (level + margin).exp(),
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
    use assert_approx_eq::assert_approx_eq;
    use market_data::generate_ohlcv;

    fn fitted_forecaster() -> ArimaForecaster {
        let series = generate_ohlcv(500, 100.0, 0.015, 21);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        ArimaForecaster::from_history(ForecasterConfig::new("TEST"), history).unwrap()
    }

    #[test]
    fn test_random_walk_needs_one_difference() {
        let model = fitted_forecaster();
        let (_, d, _) = model.order();
        assert!(d >= 1, "log random walk should require differencing");
    }

    #[test]
    fn test_forecast_shape_and_bands() {
        let mut model = fitted_forecaster();
        let result = model.forecast(10).unwrap();
        assert_eq!(result.horizon(), 10);
        for p in result.points() {
            assert!(p.lower <= p.predicted && p.predicted <= p.upper);
            assert!(p.predicted > 0.0);
        }
        // Interval widens with the horizon
        let first_width = result.points()[0].upper - result.points()[0].lower;
        let last_width = result.points()[9].upper - result.points()[9].lower;
        assert!(last_width > first_width);
    }

    #[test]
    fn test_interval_is_symmetric_in_log_domain() {
        // The band is centered on the integrated point path, so the upper
        // and lower bounds are the same multiplicative distance from it
        let mut model = fitted_forecaster();
        let result = model.forecast(10).unwrap();
        for p in result.points() {
            assert_approx_eq!(p.upper / p.predicted, p.predicted / p.lower, 1e-9);
        }
        // Margin at step h is z * sigma * sqrt(h + 1), not a cumulative sum
        let sigma = model.fitted.arma.sigma2.sqrt();
        let z = stats::normal_quantile(CONFIDENCE).unwrap();
        let log_width = |p: &ForecastPoint| (p.upper / p.lower).ln();
        assert_approx_eq!(log_width(&result.points()[0]), 2.0 * z * sigma, 1e-9);
        assert_approx_eq!(
            log_width(&result.points()[3]),
            2.0 * z * sigma * 4.0_f64.sqrt(),
            1e-9
        );
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let mut model = fitted_forecaster();
        assert!(matches!(
            model.forecast(0),
            Err(ForecastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_mapping_before_forecast_is_error() {
        let model = fitted_forecaster();
        assert!(matches!(
            model.to_mapping(),
            Err(ForecastError::NotForecastedYet)
        ));
    }

    #[test]
    fn test_mapping_after_forecast() {
        let mut model = fitted_forecaster();
        model.forecast(5).unwrap();
        let mapping = model.to_mapping().unwrap();
        assert_eq!(mapping.len(), 5);
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(30, 100.0, 0.015, 3);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result = ArimaForecaster::from_history(ForecasterConfig::new("TEST"), history);
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }

    #[test]
    fn test_fit_arma_recovers_ar1_sign() {
        // AR(1) with phi = 0.6
        let mut rng_state = 1u64;
        let mut noise = || {
            // xorshift, deterministic without pulling rand into the test
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            (rng_state % 1000) as f64 / 1000.0 - 0.5
        };
        let mut series = vec![0.0];
        for _ in 0..400 {
            let prev = *series.last().unwrap();
            series.push(0.6 * prev + noise());
        }
        let fit = fit_arma(&series, 1, 0).unwrap();
        assert!(fit.ar[0] > 0.3 && fit.ar[0] < 0.9, "phi={}", fit.ar[0]);
    }
}
