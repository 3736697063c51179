//! The shared forecaster contract
//!
//! Every model is constructed from a [`market_data::MarketDataProvider`] and
//! a [`ForecasterConfig`], loads its lookback window up front, and exposes
//! the same `forecast` / `to_mapping` / `save_csv` surface through the
//! [`Forecaster`] trait.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastEntry, ForecastResult};
use chrono::{Duration, NaiveDate, Utc};
use market_data::{DataError, Interval, MarketDataProvider, TimeSeries};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_TARGET_COLUMN: &str = "Close";
pub const DEFAULT_LOOKBACK_YEARS: u32 = 5;

/// Per-instance forecaster settings, fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub struct ForecasterConfig {
    pub symbol: String,
    pub target_column: String,
    pub lookback_years: u32,
}

impl ForecasterConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            lookback_years: DEFAULT_LOOKBACK_YEARS,
        }
    }

    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    pub fn lookback_years(mut self, years: u32) -> Self {
        self.lookback_years = years;
        self
    }
}

/// History loaded and validated for one forecaster instance
#[derive(Debug, Clone)]
pub struct LoadedHistory {
    pub series: TimeSeries,
    pub target: Vec<f64>,
    pub last_date: NaiveDate,
}

impl LoadedHistory {
    /// Validate an already-loaded series against a target column
    pub fn from_series(series: TimeSeries, target_column: &str) -> Result<Self> {
        if series.is_empty() {
            return Err(ForecastError::DataUnavailable(
                "series is empty".to_string(),
            ));
        }
        if !series.has_column(target_column) {
            return Err(ForecastError::ColumnNotFound {
                column: target_column.to_string(),
                available: series
                    .column_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }
        let target = series.column(target_column)?.to_vec();
        let last_date = series.last_date().ok_or_else(|| {
            ForecastError::InsufficientData("series has no dates".to_string())
        })?;
        Ok(Self {
            series,
            target,
            last_date,
        })
    }

    /// OHLC column shortcut used by models that need full bars
    pub fn ohlc(&self) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
        Ok((
            self.series.column("Open")?.to_vec(),
            self.series.column("High")?.to_vec(),
            self.series.column("Low")?.to_vec(),
            self.series.column("Close")?.to_vec(),
        ))
    }
}

/// Pull the configured lookback window (ending yesterday) and validate it.
///
/// An unknown symbol or empty window maps to `DataUnavailable`; a missing
/// target column reports the columns that do exist.
pub fn load_history(
    provider: &dyn MarketDataProvider,
    config: &ForecasterConfig,
) -> Result<LoadedHistory> {
    let end = Utc::now().date_naive() - Duration::days(1);
    let start = end - Duration::days(365 * i64::from(config.lookback_years));

    let series = provider
        .historical_data(&config.symbol, start, end, Interval::Daily)
        .map_err(|err| match err {
            DataError::NoData(symbol) => ForecastError::DataUnavailable(symbol),
            other => ForecastError::Data(other),
        })?;

    if series.is_empty() {
        return Err(ForecastError::DataUnavailable(config.symbol.clone()));
    }
    LoadedHistory::from_series(series, &config.target_column)
}

/// Common surface of every price forecaster
pub trait Forecaster {
    /// Technique name, stable across releases
    fn name(&self) -> &'static str;

    fn symbol(&self) -> &str;

    /// Produce a forecast for the next `horizon_days` business days.
    /// The result is also retained for [`Forecaster::last_forecast`].
    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult>;

    /// Most recent result, if `forecast` has been called
    fn last_forecast(&self) -> Option<&ForecastResult>;

    /// ISO-date mapping of the most recent forecast
    fn to_mapping(&self) -> Result<BTreeMap<String, ForecastEntry>> {
        self.last_forecast()
            .map(ForecastResult::to_mapping)
            .ok_or(ForecastError::NotForecastedYet)
    }

    /// Export the most recent forecast as CSV into `dir`
    fn save_forecast(&self, dir: &Path) -> Result<PathBuf> {
        self.last_forecast()
            .ok_or(ForecastError::NotForecastedYet)?
            .save_csv(dir)
    }
}

/// Reject a zero-day horizon before any model work happens
pub(crate) fn validate_horizon(horizon_days: usize) -> Result<()> {
    if horizon_days == 0 {
        return Err(ForecastError::InvalidParameter(
            "horizon must be at least one business day".to_string(),
        ));
    }
    Ok(())
}

/// Forecasting technique selected by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technique {
    Arima,
    Hmm,
    Kalman,
    Lstm,
    Seasonal,
    Garch,
    BoostedVolatility,
    Direction,
    Rsi,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Arima => "arima",
            Technique::Hmm => "hmm",
            Technique::Kalman => "kalman",
            Technique::Lstm => "lstm",
            Technique::Seasonal => "seasonal",
            Technique::Garch => "garch",
            Technique::BoostedVolatility => "boosted_volatility",
            Technique::Direction => "direction",
            Technique::Rsi => "rsi",
        }
    }

    /// Whether the technique produces a [`ForecastResult`] price/level path
    /// (as opposed to a classification or oscillator report)
    pub fn is_price_forecaster(&self) -> bool {
        !matches!(self, Technique::Direction | Technique::Rsi)
    }

    pub fn all() -> &'static [Technique] {
        &[
            Technique::Arima,
            Technique::Hmm,
            Technique::Kalman,
            Technique::Lstm,
            Technique::Seasonal,
            Technique::Garch,
            Technique::BoostedVolatility,
            Technique::Direction,
            Technique::Rsi,
        ]
    }
}

impl FromStr for Technique {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "arima" => Ok(Technique::Arima),
            "hmm" => Ok(Technique::Hmm),
            "kalman" => Ok(Technique::Kalman),
            "lstm" => Ok(Technique::Lstm),
            "seasonal" | "prophet" => Ok(Technique::Seasonal),
            "garch" => Ok(Technique::Garch),
            "boosted_volatility" | "volatility" => Ok(Technique::BoostedVolatility),
            "direction" | "classification" => Ok(Technique::Direction),
            "rsi" => Ok(Technique::Rsi),
            other => Err(ForecastError::InvalidParameter(format!(
                "unknown technique '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data::{generate_ohlcv, InMemoryProvider};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn recent_provider(symbol: &str) -> InMemoryProvider {
        // Shift the sample series so it ends just before "yesterday"
        let template = generate_ohlcv(300, 100.0, 0.02, 11);
        let shift = Utc::now().date_naive() - Duration::days(2) - template.last_date().unwrap();
        let dates: Vec<NaiveDate> = template.dates().iter().map(|d| *d + shift).collect();
        let columns = template
            .column_names()
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    template.column(name).unwrap().to_vec(),
                )
            })
            .collect();
        let shifted = TimeSeries::new(dates, columns).unwrap();
        InMemoryProvider::new().with_series(symbol, shifted)
    }

    #[test]
    fn test_load_history_validates_symbol() {
        let provider = InMemoryProvider::new();
        let config = ForecasterConfig::new("GHOST");
        let result = load_history(&provider, &config);
        assert!(matches!(
            result,
            Err(ForecastError::DataUnavailable(s)) if s == "GHOST"
        ));
    }

    #[test]
    fn test_empty_series_is_data_unavailable() {
        let series = TimeSeries::new(vec![], vec![]).unwrap();
        let result = LoadedHistory::from_series(series, "Close");
        assert!(matches!(result, Err(ForecastError::DataUnavailable(_))));
    }

    #[test]
    fn test_load_history_reports_available_columns() {
        let provider = recent_provider("TEST");
        let config = ForecasterConfig::new("TEST").target_column("AdjClose");
        match load_history(&provider, &config) {
            Err(ForecastError::ColumnNotFound { column, available }) => {
                assert_eq!(column, "AdjClose");
                assert!(available.contains(&"Close".to_string()));
                assert!(available.contains(&"Volume".to_string()));
            }
            other => panic!("expected ColumnNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_history_returns_target() {
        let provider = recent_provider("TEST");
        let config = ForecasterConfig::new("TEST").lookback_years(2);
        let history = load_history(&provider, &config).unwrap();
        assert!(!history.target.is_empty());
        assert_eq!(history.target.len(), history.series.len());
        assert_eq!(Some(history.last_date), history.series.last_date());
    }

    #[rstest]
    #[case("arima", Technique::Arima)]
    #[case("ARIMA", Technique::Arima)]
    #[case("prophet", Technique::Seasonal)]
    #[case("boosted_volatility", Technique::BoostedVolatility)]
    #[case("rsi", Technique::Rsi)]
    fn test_technique_from_str(#[case] input: &str, #[case] expected: Technique) {
        assert_eq!(input.parse::<Technique>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_technique_is_error() {
        assert!("prophecy9000".parse::<Technique>().is_err());
    }
}
