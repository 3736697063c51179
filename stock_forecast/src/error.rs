//! Error types for forecasting operations

use thiserror::Error;

/// Errors that can occur during model fitting and forecasting
#[derive(Error, Debug)]
pub enum ForecastError {
    /// The provider returned nothing, or the loaded series has no rows.
    /// Not retried.
    #[error("No historical data available: {0}")]
    DataUnavailable(String),

    /// The requested target column does not exist in the loaded history.
    #[error("Column '{column}' not found; available columns: {}", available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("Series is not stationary: {0}")]
    NonStationarySeries(String),

    #[error("No viable model: {0}")]
    NoViableModel(String),

    #[error("No forecast yet; call forecast() first")]
    NotForecastedYet,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Data error: {0}")]
    Data(#[from] market_data::DataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
