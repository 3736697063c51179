//! # stock_forecast
//!
//! Statistical and machine-learning forecasters for daily equity data.
//!
//! Every price technique implements the [`Forecaster`] trait: it loads a
//! lookback window from a [`MarketDataProvider`](market_data::MarketDataProvider),
//! fits on construction and produces a [`ForecastResult`] whose points cover
//! the next `horizon` business days with `lower <= predicted <= upper`.
//!
//! ```no_run
//! use market_data::{CsvProvider, MarketDataProvider};
//! use stock_forecast::{build_forecaster, ForecasterConfig, Technique};
//!
//! fn main() -> stock_forecast::Result<()> {
//!     let provider = CsvProvider::new("data");
//!     let config = ForecasterConfig::new("AAPL");
//!     let mut model = build_forecaster(Technique::Arima, &provider, config)?;
//!     let result = model.forecast(30)?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod features;
pub mod forecast;
pub mod forecaster;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod stats;

pub use error::{ForecastError, Result};
pub use forecast::{ForecastEntry, ForecastPoint, ForecastResult};
pub use forecaster::{Forecaster, ForecasterConfig, Technique};
pub use metrics::ForecastMetrics;
pub use models::build_forecaster;
