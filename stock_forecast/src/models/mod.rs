//! Forecasting techniques
//!
//! Price forecasters implement [`Forecaster`](crate::Forecaster) and are
//! constructed through [`build_forecaster`]. The direction ensemble and the
//! RSI analyzer produce their own result types and are used directly.

pub mod arima;
pub mod boosted_volatility;
pub mod direction;
pub mod garch;
pub mod hmm;
pub mod kalman;
pub mod lstm;
pub mod rsi;
pub mod seasonal;

pub use arima::ArimaForecaster;
pub use boosted_volatility::{BoostedVolParams, BoostedVolatilityForecaster, BoosterConfig};
pub use direction::{Direction, DirectionClassifier, DirectionPrediction, ModelVote};
pub use garch::{GarchFit, GarchForecaster, GarchParams};
pub use hmm::{HmmForecaster, HmmParams};
pub use kalman::KalmanForecaster;
pub use lstm::{LstmForecaster, LstmParams};
pub use rsi::{Confidence, RsiAnalysis, RsiAnalyzer, RsiParams, RsiSignal};
pub use seasonal::{SeasonalForecaster, SeasonalParams};

use crate::error::{ForecastError, Result};
use crate::forecaster::{Forecaster, ForecasterConfig, Technique};
use market_data::MarketDataProvider;

/// Builds the price/volatility forecaster for a technique.
///
/// The direction ensemble and RSI analyzer do not produce dated price
/// bands and are rejected here; construct them directly instead.
pub fn build_forecaster(
    technique: Technique,
    provider: &dyn MarketDataProvider,
    config: ForecasterConfig,
) -> Result<Box<dyn Forecaster>> {
    match technique {
        Technique::Arima => Ok(Box::new(ArimaForecaster::new(provider, config)?)),
        Technique::Hmm => Ok(Box::new(HmmForecaster::new(provider, config)?)),
        Technique::Kalman => Ok(Box::new(KalmanForecaster::new(provider, config)?)),
        Technique::Lstm => Ok(Box::new(LstmForecaster::new(provider, config)?)),
        Technique::Seasonal => Ok(Box::new(SeasonalForecaster::new(provider, config)?)),
        Technique::Garch => Ok(Box::new(GarchForecaster::new(provider, config)?)),
        Technique::BoostedVolatility => {
            Ok(Box::new(BoostedVolatilityForecaster::new(provider, config)?))
        }
        Technique::Direction | Technique::Rsi => Err(ForecastError::InvalidParameter(format!(
            "{} does not produce a price forecast",
            technique.as_str()
        ))),
    }
}
