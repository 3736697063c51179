//! Business-day-indexed time series
//!
//! [`TimeSeries`] is the shape every provider returns and every forecaster
//! consumes: a strictly increasing date index plus named `f64` columns of
//! equal length.

use crate::calendar;
use crate::{DataError, OhlcvBar, Result};
use chrono::NaiveDate;

/// Standard column names produced by [`TimeSeries::from_bars`]
pub const OHLCV_COLUMNS: [&str; 5] = ["Open", "High", "Low", "Close", "Volume"];

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    columns: Vec<(String, Vec<f64>)>,
}

impl TimeSeries {
    /// Build a series from a date index and named columns.
    ///
    /// Dates must be strictly increasing and every column must match the
    /// index length.
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        for pair in dates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(DataError::InvalidData(format!(
                    "dates must be strictly increasing, got {} after {}",
                    pair[1], pair[0]
                )));
            }
        }
        for (name, values) in &columns {
            if values.len() != dates.len() {
                return Err(DataError::InvalidData(format!(
                    "column '{}' has {} values for {} dates",
                    name,
                    values.len(),
                    dates.len()
                )));
            }
        }
        Ok(Self { dates, columns })
    }

    /// Build a series with the standard OHLCV columns from daily bars
    pub fn from_bars(bars: &[OhlcvBar]) -> Result<Self> {
        let dates = bars.iter().map(|b| b.date).collect();
        let columns = vec![
            ("Open".to_string(), bars.iter().map(|b| b.open).collect()),
            ("High".to_string(), bars.iter().map(|b| b.high).collect()),
            ("Low".to_string(), bars.iter().map(|b| b.low).collect()),
            ("Close".to_string(), bars.iter().map(|b| b.close).collect()),
            ("Volume".to_string(), bars.iter().map(|b| b.volume).collect()),
        ];
        Self::new(dates, columns)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Values of a named column, or `ColumnNotFound`
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    /// Append one row. The date must extend the index and all existing
    /// columns must be present in `values` (same order as `column_names`).
    pub fn push_row(&mut self, date: NaiveDate, values: &[f64]) -> Result<()> {
        if let Some(last) = self.last_date() {
            if date <= last {
                return Err(DataError::InvalidData(format!(
                    "row date {} does not extend index ending {}",
                    date, last
                )));
            }
        }
        if values.len() != self.columns.len() {
            return Err(DataError::InvalidData(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        self.dates.push(date);
        for ((_, column), value) in self.columns.iter_mut().zip(values) {
            column.push(*value);
        }
        Ok(())
    }

    /// Rows `[start, end)` as a new series
    pub fn slice(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.len() {
            return Err(DataError::InvalidData(format!(
                "slice {}..{} out of bounds for length {}",
                start,
                end,
                self.len()
            )));
        }
        Ok(Self {
            dates: self.dates[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), values[start..end].to_vec()))
                .collect(),
        })
    }

    /// Mean of a named column
    pub fn mean(&self, name: &str) -> Result<f64> {
        let values = self.column(name)?;
        if values.is_empty() {
            return Err(DataError::InvalidData(format!("column '{}' is empty", name)));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Population standard deviation of a named column
    pub fn std_dev(&self, name: &str) -> Result<f64> {
        let values = self.column(name)?;
        let mean = self.mean(name)?;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Ok(variance.sqrt())
    }

    /// Reindex onto every business day between the first and last date,
    /// forward-filling gaps from the most recent observed row.
    pub fn reindex_business_days(&self) -> Result<Self> {
        let (first, last) = match (self.dates.first(), self.dates.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Ok(self.clone()),
        };

        let index = calendar::business_days_between(first, last);
        let mut dates = Vec::with_capacity(index.len());
        let mut columns: Vec<(String, Vec<f64>)> = self
            .columns
            .iter()
            .map(|(name, _)| (name.clone(), Vec::with_capacity(index.len())))
            .collect();

        // Pointer into the source rows; rows on weekend dates advance it too
        // so a Monday picks up Sunday's value rather than Friday's.
        let mut src = 0usize;
        let mut last_row: Option<usize> = None;
        for date in index {
            while src < self.dates.len() && self.dates[src] <= date {
                last_row = Some(src);
                src += 1;
            }
            let row = match last_row {
                Some(row) => row,
                // Leading weekend-only data has nothing to fill from
                None => continue,
            };
            dates.push(date);
            for (col_idx, (_, values)) in self.columns.iter().enumerate() {
                columns[col_idx].1.push(values[row]);
            }
        }

        Self::new(dates, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn series_with_gap() -> TimeSeries {
        // Wed 2023-06-07, Thu 2023-06-08, then Mon 2023-06-12 (Fri missing)
        let dates = vec![
            NaiveDate::from_ymd_opt(2023, 6, 7).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 8).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 12).unwrap(),
        ];
        TimeSeries::new(
            dates,
            vec![("Close".to_string(), vec![10.0, 11.0, 12.0])],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unsorted_dates() {
        let dates = vec![
            NaiveDate::from_ymd_opt(2023, 6, 8).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 7).unwrap(),
        ];
        let result = TimeSeries::new(dates, vec![("Close".to_string(), vec![1.0, 2.0])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let dates = vec![NaiveDate::from_ymd_opt(2023, 6, 8).unwrap()];
        let result = TimeSeries::new(dates, vec![("Close".to_string(), vec![1.0, 2.0])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reindex_forward_fills_missing_friday() {
        let filled = series_with_gap().reindex_business_days().unwrap();
        assert_eq!(filled.len(), 4);
        let closes = filled.column("Close").unwrap();
        // Friday carries Thursday's close
        assert_eq!(closes, &[10.0, 11.0, 11.0, 12.0]);
        assert_eq!(
            filled.dates()[2],
            NaiveDate::from_ymd_opt(2023, 6, 9).unwrap()
        );
    }

    #[test]
    fn test_column_not_found() {
        let series = series_with_gap();
        assert!(matches!(
            series.column("AdjClose"),
            Err(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_push_row_extends_index() {
        let mut series = series_with_gap();
        let next = NaiveDate::from_ymd_opt(2023, 6, 13).unwrap();
        series.push_row(next, &[13.0]).unwrap();
        assert_eq!(series.last_date(), Some(next));
        assert!(series.push_row(next, &[14.0]).is_err());
    }
}
