//! Seasonal-decomposition forecaster
//!
//! A multiplicative trend/seasonality model fit in the log domain by ridge
//! regression: piecewise-linear trend with changepoints, day-of-week
//! effects, yearly Fourier terms and a US-holiday indicator. Short horizons
//! add a damped carryover of the last residual; horizons beyond a month add
//! monthly Fourier terms. Intervals come from the residual sigma at the
//! configured confidence.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use crate::stats;
use chrono::{Datelike, NaiveDate, Weekday};
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use tracing::info;

const SHORT_HORIZON: usize = 7;
const LONG_HORIZON: usize = 30;
const RESIDUAL_DAMPING: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SeasonalParams {
    pub changepoints: usize,
    pub yearly_order: usize,
    pub monthly_order: usize,
    pub interval_width: f64,
    pub ridge: f64,
}

impl Default for SeasonalParams {
    fn default() -> Self {
        Self {
            changepoints: 8,
            yearly_order: 6,
            monthly_order: 3,
            interval_width: 0.95,
            ridge: 1.0,
        }
    }
}

/// Observed US market holidays with fixed or rule-based dates
fn us_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let fixed = [
        (1, 1),   // New Year's Day
        (6, 19),  // Juneteenth
        (7, 4),   // Independence Day
        (12, 25), // Christmas
    ];
    for (month, day) in fixed {
        if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
            days.push(d);
        }
    }
    let nth_weekday = |month: u32, weekday: Weekday, nth: u32| {
        NaiveDate::from_weekday_of_month_opt(year, month, weekday, nth as u8)
    };
    // MLK, Presidents Day, Labor Day, Thanksgiving
    days.extend(nth_weekday(1, Weekday::Mon, 3));
    days.extend(nth_weekday(2, Weekday::Mon, 3));
    days.extend(nth_weekday(9, Weekday::Mon, 1));
    days.extend(nth_weekday(11, Weekday::Thu, 4));
    // Memorial Day: last Monday of May
    let mut d = NaiveDate::from_ymd_opt(year, 5, 31);
    while let Some(date) = d {
        if date.weekday() == Weekday::Mon {
            days.push(date);
            break;
        }
        d = date.pred_opt();
    }
    days
}

fn near_holiday(date: NaiveDate) -> bool {
    let holidays = us_holidays(date.year());
    holidays
        .iter()
        .any(|h| (date - *h).num_days().abs() <= 1)
}

pub struct SeasonalForecaster {
    config: ForecasterConfig,
    params: SeasonalParams,
    history: LoadedHistory,
    log_target: Vec<f64>,
    /// Changepoint positions in scaled time [0, 1]
    changepoint_times: Vec<f64>,
    last: Option<ForecastResult>,
}

impl SeasonalForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, SeasonalParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: SeasonalParams,
    ) -> Result<Self> {
        if history.target.len() < 120 {
            return Err(ForecastError::InsufficientData(format!(
                "seasonal model needs at least 120 observations, got {}",
                history.target.len()
            )));
        }
        if history.target.iter().any(|v| *v <= 0.0) {
            return Err(ForecastError::InvalidParameter(
                "multiplicative model requires strictly positive values".to_string(),
            ));
        }

        let log_target: Vec<f64> = history.target.iter().map(|v| v.ln()).collect();
        let changepoint_times: Vec<f64> = (1..=params.changepoints)
            .map(|i| i as f64 / (params.changepoints + 1) as f64)
            .collect();

        Ok(Self {
            config,
            params,
            history,
            log_target,
            changepoint_times,
            last: None,
        })
    }

    /// Scaled time for a date: 0 at the first bar, 1 at the last
    fn scaled_time(&self, date: NaiveDate) -> f64 {
        let first = self.history.series.dates()[0];
        let span = (self.history.last_date - first).num_days().max(1) as f64;
        (date - first).num_days() as f64 / span
    }

    fn design_row(&self, date: NaiveDate, with_monthly: bool) -> Vec<f64> {
        let mut row = Vec::new();
        row.push(1.0);

        let t = self.scaled_time(date);
        row.push(t);
        for cp in &self.changepoint_times {
            row.push((t - cp).max(0.0));
        }

        // Day-of-week effects, Monday as baseline
        for weekday in [Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            row.push(if date.weekday() == weekday { 1.0 } else { 0.0 });
        }

        let yearly_phase = date.ordinal() as f64 / 365.25;
        for k in 1..=self.params.yearly_order {
            let angle = 2.0 * std::f64::consts::PI * k as f64 * yearly_phase;
            row.push(angle.sin());
            row.push(angle.cos());
        }

        if with_monthly {
            let monthly_phase = date.day() as f64 / 30.44;
            for k in 1..=self.params.monthly_order {
                let angle = 2.0 * std::f64::consts::PI * k as f64 * monthly_phase;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }

        row.push(if near_holiday(date) { 1.0 } else { 0.0 });
        row
    }
}

impl Forecaster for SeasonalForecaster {
    fn name(&self) -> &'static str {
        "seasonal"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let with_monthly = horizon_days > LONG_HORIZON;

        let rows: Vec<Vec<f64>> = self
            .history
            .series
            .dates()
            .iter()
            .map(|d| self.design_row(*d, with_monthly))
            .collect();
        let fit = stats::ols(&rows, &self.log_target, self.params.ridge)?;

        let sigma = fit.sigma2.sqrt();
        let z = stats::normal_quantile(self.params.interval_width)?;
        let last_residual = fit.residuals.last().copied().unwrap_or(0.0);
        info!(
            symbol = %self.config.symbol,
            horizon = horizon_days,
            sigma,
            with_monthly,
            "seasonal model fitted"
        );

        let dates = business_days_after(self.history.last_date, horizon_days);
        let mut points = Vec::with_capacity(horizon_days);
        for (h, date) in dates.into_iter().enumerate() {
            let row = self.design_row(date, with_monthly);
            let mut log_pred: f64 = row
                .iter()
                .zip(&fit.coefficients)
                .map(|(x, b)| x * b)
                .sum();
            // Short horizons carry a damped share of the latest residual
            if horizon_days <= SHORT_HORIZON {
                log_pred += last_residual * RESIDUAL_DAMPING.powi(h as i32 + 1);
            }
            points.push(ForecastPoint {
                date,
                predicted: log_pred.exp(),
                lower: (log_pred - z * sigma).exp(),
                upper: (log_pred + z * sigma).exp(),
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

    fn fitted() -> SeasonalForecaster {
        let series = generate_ohlcv(400, 100.0, 0.01, 23);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        SeasonalForecaster::from_history(
            ForecasterConfig::new("TEST"),
            history,
            SeasonalParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_holiday_calendar_contains_fixtures() {
        let days = us_holidays(2023);
        assert!(days.contains(&NaiveDate::from_ymd_opt(2023, 7, 4).unwrap()));
        // Thanksgiving 2023 was November 23rd
        assert!(days.contains(&NaiveDate::from_ymd_opt(2023, 11, 23).unwrap()));
        // Memorial Day 2023 was May 29th
        assert!(days.contains(&NaiveDate::from_ymd_opt(2023, 5, 29).unwrap()));
    }

    #[test]
    fn test_forecast_brackets_prediction() {
        let mut model = fitted();
        let result = model.forecast(10).unwrap();
        for p in result.points() {
            assert!(p.lower < p.predicted && p.predicted < p.upper);
            assert!(p.predicted > 0.0);
        }
    }

    #[test]
    fn test_long_horizon_adds_monthly_terms() {
        let model = fitted();
        let date = NaiveDate::from_ymd_opt(2023, 3, 7).unwrap();
        let short = model.design_row(date, false);
        let long = model.design_row(date, true);
        assert_eq!(long.len(), short.len() + 2 * model.params.monthly_order);
    }

    #[test]
    fn test_forecast_near_recent_level() {
        // A low-vol series should not forecast far from its last price
        let mut model = fitted();
        let last = *model.history.target.last().unwrap();
        let result = model.forecast(5).unwrap();
        let predicted = result.points()[0].predicted;
        assert!(
            (predicted - last).abs() / last < 0.2,
            "last={} predicted={}",
            last,
            predicted
        );
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(60, 100.0, 0.01, 2);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result = SeasonalForecaster::from_history(
            ForecasterConfig::new("TEST"),
            history,
            SeasonalParams::default(),
        );
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
