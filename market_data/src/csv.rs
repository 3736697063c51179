//! CSV-backed provider
//!
//! Reads one OHLCV CSV per symbol (`{SYMBOL}.csv` under a data directory),
//! detecting the date and price columns by name so exports from different
//! vendors load without reshaping.

use crate::{DataError, Interval, MarketDataProvider, NewsItem, OhlcvBar, Result, TimeSeries};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::File;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CsvProvider {
    data_dir: PathBuf,
}

impl CsvProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn load_frame(&self, symbol: &str) -> Result<DataFrame> {
        let path = self.data_dir.join(format!("{}.csv", symbol));
        let file = File::open(&path).map_err(|_| DataError::NoData(symbol.to_string()))?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;
        Ok(df)
    }

    fn detect_column(df: &DataFrame, needle: &str) -> Result<String> {
        df.get_column_names()
            .iter()
            .find(|name| name.to_lowercase().contains(needle))
            .map(|name| name.to_string())
            .ok_or_else(|| DataError::ColumnNotFound(needle.to_string()))
    }

    fn column_as_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
        let col = df
            .column(name)
            .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
        let values = match col.dtype() {
            DataType::Float64 => col.f64()?.into_iter().flatten().collect(),
            DataType::Int64 => col.i64()?.into_iter().flatten().map(|v| v as f64).collect(),
            DataType::Int32 => col.i32()?.into_iter().flatten().map(|v| v as f64).collect(),
            other => {
                return Err(DataError::InvalidData(format!(
                    "column '{}' has non-numeric dtype {:?}",
                    name, other
                )))
            }
        };
        Ok(values)
    }

    fn column_as_dates(df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>> {
        let col = df
            .column(name)
            .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
        match col.dtype() {
            DataType::Date => {
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                    .ok_or_else(|| DataError::InvalidData("epoch".to_string()))?;
                Ok(col
                    .date()?
                    .into_iter()
                    .flatten()
                    .map(|days| epoch + chrono::Duration::days(days as i64))
                    .collect())
            }
            DataType::Utf8 => col
                .utf8()?
                .into_iter()
                .flatten()
                .map(|s| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
                        .map_err(|_| {
                            DataError::InvalidData(format!("unparseable date '{}'", s))
                        })
                })
                .collect(),
            other => Err(DataError::InvalidData(format!(
                "column '{}' has non-date dtype {:?}",
                name, other
            ))),
        }
    }

    fn load_series(&self, symbol: &str) -> Result<TimeSeries> {
        let df = self.load_frame(symbol)?;

        let date_col = Self::detect_column(&df, "date")?;
        let dates = Self::column_as_dates(&df, &date_col)?;

        let mut bars = Vec::with_capacity(dates.len());
        let opens = Self::column_as_f64(&df, &Self::detect_column(&df, "open")?)?;
        let highs = Self::column_as_f64(&df, &Self::detect_column(&df, "high")?)?;
        let lows = Self::column_as_f64(&df, &Self::detect_column(&df, "low")?)?;
        let closes = Self::column_as_f64(&df, &Self::detect_column(&df, "close")?)?;
        let volumes = match Self::detect_column(&df, "vol") {
            Ok(name) => Self::column_as_f64(&df, &name)?,
            Err(_) => vec![0.0; dates.len()],
        };

        let n = dates
            .len()
            .min(opens.len())
            .min(highs.len())
            .min(lows.len())
            .min(closes.len())
            .min(volumes.len());
        for i in 0..n {
            bars.push(OhlcvBar::new(
                dates[i], opens[i], highs[i], lows[i], closes[i], volumes[i],
            ));
        }
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);

        if bars.is_empty() {
            return Err(DataError::NoData(symbol.to_string()));
        }
        TimeSeries::from_bars(&bars)
    }
}

impl MarketDataProvider for CsvProvider {
    fn historical_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<TimeSeries> {
        let series = self.load_series(symbol)?;
        let dates = series.dates();
        let from = dates.partition_point(|d| *d < start);
        let to = dates.partition_point(|d| *d <= end);
        if from >= to {
            return Err(DataError::NoData(symbol.to_string()));
        }
        series.slice(from, to)?.reindex_business_days()
    }

    /// Quote derived from the most recent bar on file
    fn quote(&self, symbol: &str) -> Result<serde_json::Value> {
        let series = self.load_series(symbol)?;
        let last = series.len() - 1;
        let close = series.column("Close")?[last];
        let open = series.column("Open")?[last];
        let volume = series.column("Volume")?[last];
        Ok(serde_json::json!({
            "symbol": symbol,
            "date": series.dates()[last].to_string(),
            "regularMarketPrice": close,
            "regularMarketOpen": open,
            "regularMarketVolume": volume,
        }))
    }

    fn news(&self, _symbol: &str) -> Result<Vec<NewsItem>> {
        // Flat files carry no headlines
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, symbol: &str, body: &str) {
        let path = dir.path().join(format!("{}.csv", symbol));
        let mut file = File::create(path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_loads_and_forward_fills() {
        let dir = TempDir::new().unwrap();
        // Friday 2023-06-09 missing; Monday follows
        write_csv(
            &dir,
            "TEST",
            "Date,Open,High,Low,Close,Volume\n\
             2023-06-07,10,11,9,10.5,1000\n\
             2023-06-08,10.5,12,10,11.0,1100\n\
             2023-06-12,11.0,13,11,12.5,900\n",
        );

        let provider = CsvProvider::new(dir.path());
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let series = provider
            .historical_data("TEST", start, end, Interval::Daily)
            .unwrap();

        assert_eq!(series.len(), 4);
        let closes = series.column("Close").unwrap();
        assert_eq!(closes[2], 11.0); // filled Friday
    }

    #[test]
    fn test_missing_file_is_no_data() {
        let dir = TempDir::new().unwrap();
        let provider = CsvProvider::new(dir.path());
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let result = provider.historical_data("GHOST", start, end, Interval::Daily);
        assert!(matches!(result, Err(DataError::NoData(_))));
    }

    #[test]
    fn test_quote_reflects_last_bar() {
        let dir = TempDir::new().unwrap();
        write_csv(
            &dir,
            "TEST",
            "Date,Open,High,Low,Close,Volume\n2023-06-07,10,11,9,10.5,1000\n",
        );
        let provider = CsvProvider::new(dir.path());
        let quote = provider.quote("TEST").unwrap();
        assert_eq!(quote["regularMarketPrice"], 10.5);
    }
}
