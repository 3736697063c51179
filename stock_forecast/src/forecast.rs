//! The forecast result envelope
//!
//! Every price forecaster produces a [`ForecastResult`]: one record per
//! future business day with a point prediction and an interval. The
//! constructor enforces the band and calendar invariants so downstream
//! consumers never re-validate.

use crate::error::{ForecastError, Result};
use chrono::{NaiveDate, Utc};
use market_data::calendar::business_days_after;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One forecast record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Mapping value used by [`ForecastResult::to_mapping`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForecastEntry {
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

/// An immutable multi-day forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    symbol: String,
    technique: String,
    target_column: String,
    last_history_date: NaiveDate,
    points: Vec<ForecastPoint>,
}

impl ForecastResult {
    /// Validate and seal a forecast.
    ///
    /// The points must cover exactly the consecutive business days after
    /// `last_history_date`, and each record must satisfy
    /// `lower <= predicted <= upper` with finite values.
    pub fn new(
        symbol: impl Into<String>,
        technique: impl Into<String>,
        target_column: impl Into<String>,
        last_history_date: NaiveDate,
        points: Vec<ForecastPoint>,
    ) -> Result<Self> {
        if points.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "forecast must contain at least one point".to_string(),
            ));
        }

        let expected = business_days_after(last_history_date, points.len());
        for (point, expected_date) in points.iter().zip(&expected) {
            if point.date != *expected_date {
                return Err(ForecastError::InvalidParameter(format!(
                    "forecast dates must be consecutive business days after {}; got {} where {} was expected",
                    last_history_date, point.date, expected_date
                )));
            }
            if !point.predicted.is_finite() || !point.lower.is_finite() || !point.upper.is_finite()
            {
                return Err(ForecastError::Numerical(format!(
                    "non-finite forecast value on {}",
                    point.date
                )));
            }
            if point.lower > point.predicted || point.predicted > point.upper {
                return Err(ForecastError::InvalidParameter(format!(
                    "interval must bracket the prediction on {}: {} <= {} <= {} violated",
                    point.date, point.lower, point.predicted, point.upper
                )));
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            technique: technique.into(),
            target_column: target_column.into(),
            last_history_date,
            points,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn technique(&self) -> &str {
        &self.technique
    }

    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    pub fn last_history_date(&self) -> NaiveDate {
        self.last_history_date
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn horizon(&self) -> usize {
        self.points.len()
    }

    /// ISO-date-keyed mapping of the forecast, ordered by date
    pub fn to_mapping(&self) -> BTreeMap<String, ForecastEntry> {
        self.points
            .iter()
            .map(|p| {
                (
                    p.date.format("%Y-%m-%d").to_string(),
                    ForecastEntry {
                        predicted: p.predicted,
                        lower: p.lower,
                        upper: p.upper,
                    },
                )
            })
            .collect()
    }

    /// Write the forecast to `dir` as CSV, two decimal places, returning
    /// the path. The filename carries the symbol, column and a timestamp.
    pub fn save_csv(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!(
            "{}_{}_forecast_{}.csv",
            self.symbol, self.target_column, stamp
        );
        let path = dir.as_ref().join(filename);

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["Date", "Predicted", "Lower", "Upper"])?;
        for point in &self.points {
            writer.write_record([
                point.date.format("%Y-%m-%d").to_string(),
                format!("{:.2}", point.predicted),
                format!("{:.2}", point.lower),
                format!("{:.2}", point.upper),
            ])?;
        }
        writer.flush()?;
        Ok(path)
    }
}

impl fmt::Display for ForecastResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} forecast for {} ({}), {} business days:",
            self.technique,
            self.symbol,
            self.target_column,
            self.points.len()
        )?;
        writeln!(
            f,
            "{:<12} {:>12} {:>12} {:>12}",
            "Date", "Predicted", "Lower", "Upper"
        )?;
        for p in &self.points {
            writeln!(
                f,
                "{:<12} {:>12.2} {:>12.2} {:>12.2}",
                p.date.format("%Y-%m-%d").to_string(),
                p.predicted,
                p.lower,
                p.upper
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid_points(last: NaiveDate, n: usize) -> Vec<ForecastPoint> {
        business_days_after(last, n)
            .into_iter()
            .enumerate()
            .map(|(i, date)| ForecastPoint {
                date,
                predicted: 100.0 + i as f64,
                lower: 98.0 + i as f64,
                upper: 102.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn test_accepts_valid_forecast() {
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let result =
            ForecastResult::new("AAPL", "arima", "Close", last, valid_points(last, 5)).unwrap();
        assert_eq!(result.horizon(), 5);
        // Friday history rolls to Monday
        assert_eq!(
            result.points()[0].date,
            NaiveDate::from_ymd_opt(2023, 6, 12).unwrap()
        );
    }

    #[test]
    fn test_rejects_inverted_band() {
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let mut points = valid_points(last, 3);
        points[1].lower = points[1].predicted + 1.0;
        let result = ForecastResult::new("AAPL", "arima", "Close", last, points);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_weekend_date() {
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let mut points = valid_points(last, 3);
        points[0].date = NaiveDate::from_ymd_opt(2023, 6, 10).unwrap(); // Saturday
        let result = ForecastResult::new("AAPL", "arima", "Close", last, points);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty() {
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let result = ForecastResult::new("AAPL", "arima", "Close", last, vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mapping_keys_are_iso_sorted() {
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let result =
            ForecastResult::new("AAPL", "arima", "Close", last, valid_points(last, 3)).unwrap();
        let mapping = result.to_mapping();
        let keys: Vec<_> = mapping.keys().cloned().collect();
        assert_eq!(keys, vec!["2023-06-12", "2023-06-13", "2023-06-14"]);
        let entry = &mapping["2023-06-12"];
        assert!(entry.lower <= entry.predicted && entry.predicted <= entry.upper);
    }

    #[test]
    fn test_mapping_serializes_pascal_case() {
        let entry = ForecastEntry {
            predicted: 1.0,
            lower: 0.5,
            upper: 1.5,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("Predicted").is_some());
        assert!(json.get("Lower").is_some());
        assert!(json.get("Upper").is_some());
    }

    #[test]
    fn test_csv_export_rounds_to_cents() {
        let dir = tempfile::TempDir::new().unwrap();
        let last = NaiveDate::from_ymd_opt(2023, 6, 9).unwrap();
        let mut points = valid_points(last, 2);
        points[0].predicted = 100.123456;
        points[0].upper = 103.0;
        let result = ForecastResult::new("AAPL", "arima", "Close", last, points).unwrap();

        let path = result.save_csv(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("AAPL_Close_forecast_"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("100.12"));
        assert!(!body.contains("100.123"));
    }
}
