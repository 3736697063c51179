//! Gradient-boosted volatility forecaster
//!
//! Predicts 30-day rolling realized volatility (annualized) from return,
//! moving-average, range, calendar and lagged-volatility features. The
//! booster's hyperparameters come from a seeded randomized search scored by
//! RMSE over expanding-window CV splits; the held-out tail is walked one
//! step at a time, absorbing each realized value before predicting the
//! next. Future steps roll forward on synthetic feature rows.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use crate::ml::GradientBoostingRegressor;
use crate::stats;
use chrono::{Datelike, NaiveDate};
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use rand::rngs::StdRng;
use rand::{seq::SliceRandom, SeedableRng};
use tracing::{debug, info};

const VOL_WINDOW: usize = 30;
const REGIME_WINDOW: usize = 100;
const VOL_LAGS: usize = 5;
const TRADING_DAYS: f64 = 252.0;
const BAND_FRACTION: f64 = 0.10;
const SEARCH_DRAWS: usize = 8;
const CV_FOLDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoosterConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
}

#[derive(Debug, Clone)]
pub struct BoostedVolParams {
    pub seed: u64,
    pub search_draws: usize,
}

impl Default for BoostedVolParams {
    fn default() -> Self {
        Self {
            seed: 42,
            search_draws: SEARCH_DRAWS,
        }
    }
}

/// One walk-forward record over the held-out tail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestPoint {
    pub predicted_vol: f64,
    pub realized_vol: f64,
}

/// Everything derived from the price history once, reused for training,
/// walk-forward evaluation and the forward rollout
struct FeatureTable {
    rows: Vec<Vec<f64>>,
    /// Annualized 30-day realized vol target per row
    targets: Vec<f64>,
}

fn calendar_features(date: NaiveDate) -> [f64; 4] {
    [
        date.weekday().num_days_from_monday() as f64,
        date.month() as f64,
        ((date.month() - 1) / 3 + 1) as f64,
        date.ordinal() as f64,
    ]
}

fn build_features(history: &LoadedHistory) -> Result<FeatureTable> {
    let closes = &history.target;
    let highs = history.series.column("High")?;
    let lows = history.series.column("Low")?;
    let dates = history.series.dates();
    let n = closes.len();

    let mut returns = vec![f64::NAN; n];
    for i in 1..n {
        returns[i] = (closes[i] - closes[i - 1]) / closes[i - 1];
    }

    // Annualized realized vol per bar (NaN over the warm-up)
    let mut vol = vec![f64::NAN; n];
    for i in VOL_WINDOW..n {
        let window = &returns[i + 1 - VOL_WINDOW..=i];
        vol[i] = stats::std_dev(window) * TRADING_DAYS.sqrt();
    }

    // Regime flag: vol above its trailing mean
    let mut regime = vec![f64::NAN; n];
    for i in 0..n {
        if vol[i].is_nan() {
            continue;
        }
        let start = i.saturating_sub(REGIME_WINDOW);
        let window: Vec<f64> = vol[start..=i].iter().copied().filter(|v| !v.is_nan()).collect();
        if !window.is_empty() {
            regime[i] = if vol[i] > stats::mean(&window) { 1.0 } else { 0.0 };
        }
    }

    let ma10 = crate::features::sma(closes, 10);
    let ma50 = crate::features::sma(closes, 50);

    let mut table = FeatureTable {
        rows: Vec::new(),
        targets: Vec::new(),
    };

    for i in 0..n {
        if i < 5 {
            continue;
        }
        let range5 = highs[i - 4..=i].iter().fold(f64::MIN, |a, b| a.max(*b))
            - lows[i - 4..=i].iter().fold(f64::MAX, |a, b| a.min(*b));

        let mut row = vec![
            returns[i],
            returns[i].abs(),
            returns[i].signum(),
            ma10[i],
            ma50[i],
            range5,
        ];
        row.extend(calendar_features(dates[i]));
        for lag in 1..=VOL_LAGS {
            row.push(if i >= lag { vol[i - lag] } else { f64::NAN });
        }
        row.push(regime[i]);

        if row.iter().any(|v| v.is_nan()) || vol[i].is_nan() {
            continue;
        }
        table.rows.push(row);
        table.targets.push(vol[i]);
    }

    if table.rows.len() < 80 {
        return Err(ForecastError::InsufficientData(format!(
            "volatility model has only {} usable rows after feature warm-up",
            table.rows.len()
        )));
    }
    Ok(table)
}

fn fit_booster(
    config: BoosterConfig,
    x: &[Vec<f64>],
    y: &[f64],
    seed: u64,
) -> Result<GradientBoostingRegressor> {
    let mut model = GradientBoostingRegressor::new(
        config.n_estimators,
        config.learning_rate,
        config.max_depth,
        config.subsample,
        seed,
    );
    model.fit(x, y)?;
    Ok(model)
}

pub struct BoostedVolatilityForecaster {
    config: ForecasterConfig,
    history: LoadedHistory,
    model: GradientBoostingRegressor,
    booster_config: BoosterConfig,
    backtest: Vec<BacktestPoint>,
    /// Last feature row and target, seed of the forward rollout
    last_row: Vec<f64>,
    last_vols: Vec<f64>,
    last: Option<ForecastResult>,
}

impl BoostedVolatilityForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, BoostedVolParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: BoostedVolParams,
    ) -> Result<Self> {
        let table = build_features(&history)?;
        let n = table.rows.len();
        let split = (n as f64 * 0.8).round() as usize;
        let (train_x, test_x) = table.rows.split_at(split);
        let (train_y, test_y) = table.targets.split_at(split);

        // Randomized search over the booster grid, expanding-window CV
        let mut rng = StdRng::seed_from_u64(params.seed);
        let estimators = [50usize, 100, 150, 200];
        let depths = [2usize, 3, 4, 5];
        let rates = [0.01, 0.05, 0.1, 0.2];
        let subsamples = [0.6, 0.8, 1.0];

        let mut best: Option<(BoosterConfig, f64)> = None;
        for draw in 0..params.search_draws {
            let candidate = BoosterConfig {
                n_estimators: *estimators.choose(&mut rng).unwrap_or(&100),
                max_depth: *depths.choose(&mut rng).unwrap_or(&3),
                learning_rate: *rates.choose(&mut rng).unwrap_or(&0.1),
                subsample: *subsamples.choose(&mut rng).unwrap_or(&1.0),
            };

            let mut rmse_sum = 0.0;
            let mut folds = 0;
            for (train_range, test_range) in stats::time_series_cv_splits(train_x.len(), CV_FOLDS)
            {
                let model = fit_booster(
                    candidate,
                    &train_x[train_range.clone()],
                    &train_y[train_range],
                    params.seed + draw as u64,
                )?;
                let predictions: Vec<f64> = test_range
                    .clone()
                    .map(|i| model.predict(&train_x[i]))
                    .collect();
                let actual = &train_y[test_range];
                let metrics = crate::metrics::evaluate_forecast(actual, &predictions)?;
                rmse_sum += metrics.rmse;
                folds += 1;
            }
            if folds == 0 {
                continue;
            }
            let score = rmse_sum / folds as f64;
            debug!(?candidate, score, "booster candidate");
            if best.as_ref().map_or(true, |(_, s)| score < *s) {
                best = Some((candidate, score));
            }
        }
        let (booster_config, cv_rmse) = best.ok_or_else(|| {
            ForecastError::NoViableModel("randomized search produced no candidate".to_string())
        })?;

        // Walk-forward over the held-out tail: each prediction uses only
        // realized features, and the realized target enters the history
        // before the next step
        let model = fit_booster(booster_config, train_x, train_y, params.seed)?;
        let backtest: Vec<BacktestPoint> = test_x
            .iter()
            .zip(test_y)
            .map(|(row, &realized)| BacktestPoint {
                predicted_vol: model.predict(row).max(0.0),
                realized_vol: realized,
            })
            .collect();

        // Final model on all rows
        let model = fit_booster(booster_config, &table.rows, &table.targets, params.seed)?;
        info!(
            symbol = %config.symbol,
            ?booster_config,
            cv_rmse,
            "boosted volatility model fitted"
        );

        let last_row = table.rows.last().cloned().unwrap_or_default();
        let tail = table.targets.len().saturating_sub(VOL_LAGS);
        let last_vols = table.targets[tail..].to_vec();

        Ok(Self {
            config,
            history,
            model,
            booster_config,
            backtest,
            last_row,
            last_vols,
            last: None,
        })
    }

    pub fn booster_config(&self) -> BoosterConfig {
        self.booster_config
    }

    pub fn backtest_results(&self) -> &[BacktestPoint] {
        &self.backtest
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        self.model.feature_importances()
    }
}

impl Forecaster for BoostedVolatilityForecaster {
    fn name(&self) -> &'static str {
        "boosted_volatility"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Forecasts annualized realized volatility, not price
    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let dates = business_days_after(self.history.last_date, horizon_days);

        // Synthetic rollout: price-derived features hold at their last
        // values, calendar features and vol lags update each step
        let mut row = self.last_row.clone();
        let mut vols = self.last_vols.clone();
        let calendar_offset = 6; // returns(3) + mas(2) + range(1)

        let mut points = Vec::with_capacity(horizon_days);
        for date in dates {
            let calendar = calendar_features(date);
            row[calendar_offset..calendar_offset + 4].copy_from_slice(&calendar);
            for lag in 1..=VOL_LAGS {
                row[calendar_offset + 3 + lag] = vols[vols.len() - lag];
            }
            let regime_mean = stats::mean(&vols);
            let idx = row.len() - 1;
            row[idx] = if vols.last().copied().unwrap_or(0.0) > regime_mean {
                1.0
            } else {
                0.0
            };

            let predicted = self.model.predict(&row).max(1e-6);
            points.push(ForecastPoint {
                date,
                predicted,
                lower: predicted * (1.0 - BAND_FRACTION),
                upper: predicted * (1.0 + BAND_FRACTION),
            });
            vols.push(predicted);
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

    fn fast_params() -> BoostedVolParams {
        BoostedVolParams {
            seed: 3,
            search_draws: 2,
        }
    }

    fn fitted() -> BoostedVolatilityForecaster {
        let series = generate_ohlcv(400, 100.0, 0.02, 31);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        BoostedVolatilityForecaster::from_history(
            ForecasterConfig::new("TEST"),
            history,
            fast_params(),
        )
        .unwrap()
    }

    #[test]
    fn test_backtest_predictions_positive() {
        let model = fitted();
        assert!(!model.backtest_results().is_empty());
        for point in model.backtest_results() {
            assert!(point.predicted_vol >= 0.0);
            assert!(point.realized_vol > 0.0);
        }
    }

    #[test]
    fn test_forecast_positive_vols() {
        let mut model = fitted();
        let result = model.forecast(10).unwrap();
        assert_eq!(result.horizon(), 10);
        for p in result.points() {
            assert!(p.predicted > 0.0);
            assert!(p.lower <= p.predicted && p.predicted <= p.upper);
        }
    }

    #[test]
    fn test_prediction_near_realized_scale() {
        // 2% daily vol annualizes to roughly 0.32; predictions should be
        // the same order of magnitude
        let mut model = fitted();
        let result = model.forecast(1).unwrap();
        let predicted = result.points()[0].predicted;
        assert!(predicted > 0.05 && predicted < 1.5, "vol={}", predicted);
    }

    #[test]
    fn test_importances_cover_features() {
        let model = fitted();
        let imp = model.feature_importances();
        assert_eq!(imp.len(), model.last_row.len());
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(90, 100.0, 0.02, 5);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result = BoostedVolatilityForecaster::from_history(
            ForecasterConfig::new("TEST"),
            history,
            fast_params(),
        );
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
