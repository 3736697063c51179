//! Provider contract and the in-memory implementation

use crate::{DataError, NewsItem, Result, TimeSeries};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Sampling interval for historical requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }
}

/// Source of historical bars, quote snapshots and news.
///
/// Forecasters take `&dyn MarketDataProvider` at construction; swapping the
/// live source for [`InMemoryProvider`] is how the model tests run.
pub trait MarketDataProvider {
    /// Historical series for `symbol` over `[start, end]`, business-day
    /// indexed with gaps forward-filled. `NoData` if the symbol is unknown
    /// or the range is empty.
    fn historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<TimeSeries>;

    /// Latest quote snapshot as provider-native key/value pairs
    fn quote(&self, symbol: &str) -> Result<serde_json::Value>;

    /// Recent news headlines for the symbol
    fn news(&self, symbol: &str) -> Result<Vec<NewsItem>>;
}

/// Fixed per-symbol data, for tests and demos
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    series: HashMap<String, TimeSeries>,
    quotes: HashMap<String, serde_json::Value>,
    news: HashMap<String, Vec<NewsItem>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, series: TimeSeries) -> Self {
        self.series.insert(symbol.to_string(), series);
        self
    }

    pub fn with_quote(mut self, symbol: &str, quote: serde_json::Value) -> Self {
        self.quotes.insert(symbol.to_string(), quote);
        self
    }

    pub fn with_news(mut self, symbol: &str, items: Vec<NewsItem>) -> Self {
        self.news.insert(symbol.to_string(), items);
        self
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<TimeSeries> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| DataError::NoData(symbol.to_string()))?;

        let dates = series.dates();
        let from = dates.partition_point(|d| *d < start);
        let to = dates.partition_point(|d| *d <= end);
        if from >= to {
            return Err(DataError::NoData(symbol.to_string()));
        }
        series.slice(from, to)?.reindex_business_days()
    }

    fn quote(&self, symbol: &str) -> Result<serde_json::Value> {
        self.quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| DataError::NoData(symbol.to_string()))
    }

    fn news(&self, symbol: &str) -> Result<Vec<NewsItem>> {
        self.news
            .get(symbol)
            .cloned()
            .ok_or_else(|| DataError::NoData(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_ohlcv;

    #[test]
    fn test_unknown_symbol_is_no_data() {
        let provider = InMemoryProvider::new();
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let result = provider.historical_data("NOPE", start, end, Interval::Daily);
        assert!(matches!(result, Err(DataError::NoData(s)) if s == "NOPE"));
    }

    #[test]
    fn test_window_is_clipped_to_range() {
        let series = generate_ohlcv(250, 100.0, 0.02, 7);
        let provider = InMemoryProvider::new().with_series("TEST", series.clone());

        let start = series.dates()[50];
        let end = series.dates()[99];
        let window = provider
            .historical_data("TEST", start, end, Interval::Daily)
            .unwrap();
        assert_eq!(window.dates().first(), Some(&start));
        assert_eq!(window.last_date(), Some(end));
    }

    #[test]
    fn test_empty_range_is_no_data() {
        let series = generate_ohlcv(10, 100.0, 0.02, 7);
        let provider = InMemoryProvider::new().with_series("TEST", series.clone());
        let after = series.last_date().unwrap() + chrono::Duration::days(30);
        let result =
            provider.historical_data("TEST", after, after + chrono::Duration::days(5), Interval::Daily);
        assert!(matches!(result, Err(DataError::NoData(_))));
    }
}
