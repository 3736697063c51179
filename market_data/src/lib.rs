//! # Market Data
//!
//! `market_data` provides the data layer for the stock forecasting toolkit:
//! OHLCV bar types, a business-day-indexed [`TimeSeries`], and the
//! [`MarketDataProvider`] contract with CSV and in-memory implementations.
//!
//! Forecasting models never talk to a data source directly; they receive a
//! provider and ask it for history, quotes or news. This keeps every model
//! testable against fixed in-memory data.
//!
//! ## Usage Example
//!
//! ```no_run
//! use market_data::{CsvProvider, Interval, MarketDataProvider};
//! use chrono::NaiveDate;
//!
//! let provider = CsvProvider::new("data/");
//! let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
//! let end = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
//! let series = provider.historical_data("AAPL", start, end, Interval::Daily).unwrap();
//! println!("{} rows of {:?}", series.len(), series.column_names());
//! ```

use thiserror::Error;

pub mod calendar;
mod csv;
mod provider;
mod sample;
mod series;
mod types;

pub use crate::csv::CsvProvider;
pub use provider::{InMemoryProvider, Interval, MarketDataProvider};
pub use sample::generate_ohlcv;
pub use series::TimeSeries;
pub use types::{NewsItem, OhlcvBar};

/// Errors that can occur while loading or shaping market data
#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data available for symbol '{0}'")]
    NoData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data processing error: {0}")]
    Processing(String),
}

impl From<polars::error::PolarsError> for DataError {
    fn from(err: polars::error::PolarsError) -> Self {
        DataError::Processing(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
