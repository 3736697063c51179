//! Kalman-filter forecaster
//!
//! A scalar random-walk filter over daily percentage returns. Observation
//! noise is the sample return variance; process noise is a tenth of it.
//! Forecasts propagate the last filtered return with uncertainty growing by
//! the process noise each step.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use crate::metrics::{evaluate_forecast, ForecastMetrics};
use crate::stats;
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use tracing::info;

const PROCESS_NOISE_FRACTION: f64 = 0.1;
const BAND_SIGMAS: f64 = 2.0;

pub struct KalmanForecaster {
    config: ForecasterConfig,
    history: LoadedHistory,
    returns: Vec<f64>,
    /// One-step-ahead (prior) return estimates, aligned with `returns`
    predictions: Vec<f64>,
    /// Filtered state and covariance after the last observation
    state: f64,
    covariance: f64,
    obs_noise: f64,
    process_noise: f64,
    last: Option<ForecastResult>,
}

impl KalmanForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history)
    }

    pub fn from_history(config: ForecasterConfig, history: LoadedHistory) -> Result<Self> {
        let returns = stats::pct_change(&history.target);
        if returns.len() < 30 {
            return Err(ForecastError::InsufficientData(format!(
                "Kalman filter needs at least 30 returns, got {}",
                returns.len()
            )));
        }

        let obs_noise = stats::variance(&returns).max(1e-12);
        let process_noise = PROCESS_NOISE_FRACTION * obs_noise;

        // Forward filter
        let mut state = returns[0];
        let mut covariance = 1.0;
        let mut predictions = Vec::with_capacity(returns.len());
        for &observed in &returns {
            covariance += process_noise;
            predictions.push(state);
            let gain = covariance / (covariance + obs_noise);
            state += gain * (observed - state);
            covariance *= 1.0 - gain;
        }

        info!(
            symbol = %config.symbol,
            obs_noise,
            process_noise,
            filtered_return = state,
            "kalman filter fitted"
        );

        Ok(Self {
            config,
            history,
            returns,
            predictions,
            state,
            covariance,
            obs_noise,
            process_noise,
            last: None,
        })
    }

    /// Accuracy of the one-step-ahead return estimates over the history
    pub fn evaluate(&self) -> Result<ForecastMetrics> {
        evaluate_forecast(&self.returns, &self.predictions)
    }

    pub fn filtered_return(&self) -> f64 {
        self.state
    }
}

impl Forecaster for KalmanForecaster {
    fn name(&self) -> &'static str {
        "kalman"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let last_price = *self
            .history
            .target
            .last()
            .ok_or_else(|| ForecastError::InsufficientData("empty target".to_string()))?;

        let dates = business_days_after(self.history.last_date, horizon_days);
        let mut points = Vec::with_capacity(horizon_days);
        let mut price = last_price;
        let mut variance = self.covariance;

        for date in dates {
            variance += self.process_noise;
            price *= 1.0 + self.state;
            // Predictive sigma in return space, mapped onto the price
            let sigma = (variance + self.obs_noise).sqrt();
            let spread = (BAND_SIGMAS * sigma).min(0.99);
            points.push(ForecastPoint {
                date,
                predicted: price,
                lower: price * (1.0 - spread),
                upper: price * (1.0 + spread),
            });
        }

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

    fn fitted() -> KalmanForecaster {
        let series = generate_ohlcv(250, 100.0, 0.015, 17);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        KalmanForecaster::from_history(ForecasterConfig::new("TEST"), history).unwrap()
    }

    #[test]
    fn test_filtered_return_is_plausible() {
        let model = fitted();
        // Daily returns of a 1.5%-vol walk stay well inside +/-10%
        assert!(model.filtered_return().abs() < 0.1);
    }

    #[test]
    fn test_uncertainty_grows_with_horizon() {
        let mut model = fitted();
        let result = model.forecast(15).unwrap();
        let rel_width = |p: &ForecastPoint| (p.upper - p.lower) / p.predicted;
        let first = rel_width(&result.points()[0]);
        let last = rel_width(&result.points()[14]);
        assert!(last > first, "first={} last={}", first, last);
    }

    #[test]
    fn test_forecast_compounds_from_last_price() {
        let mut model = fitted();
        let last_price = *model.history.target.last().unwrap();
        let result = model.forecast(1).unwrap();
        let expected = last_price * (1.0 + model.filtered_return());
        assert!((result.points()[0].predicted - expected).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_produces_finite_metrics() {
        let model = fitted();
        let metrics = model.evaluate().unwrap();
        assert!(metrics.rmse.is_finite());
        assert!(metrics.mae >= 0.0);
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(10, 100.0, 0.015, 2);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result = KalmanForecaster::from_history(ForecasterConfig::new("TEST"), history);
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
