//! Deterministic sample data for tests and demos

use crate::calendar::next_business_day;
use crate::{OhlcvBar, TimeSeries};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Generate `n` business days of random-walk OHLCV bars.
///
/// `daily_vol` is the standard deviation of daily log returns. The same
/// seed always produces the same series.
pub fn generate_ohlcv(n: usize, start_price: f64, daily_vol: f64, seed: u64) -> TimeSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    // Normal::new only fails on non-finite or negative sigma
    let returns = Normal::new(0.0, daily_vol).unwrap_or_else(|_| Normal::new(0.0, 0.01).unwrap());

    let mut bars = Vec::with_capacity(n);
    let mut date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let mut close = start_price;

    for _ in 0..n {
        let open = close;
        close = open * returns.sample(&mut rng).exp();
        let spread = open.max(close) * rng.gen_range(0.0..daily_vol);
        let high = open.max(close) + spread;
        let low = (open.min(close) - spread).max(0.01);
        let volume = rng.gen_range(500_000.0..5_000_000.0_f64).round();

        bars.push(OhlcvBar::new(date, open, high, low, close, volume));
        date = next_business_day(date);
    }

    // Construction cannot fail: dates are strictly increasing by design
    TimeSeries::from_bars(&bars).unwrap_or_else(|_| TimeSeries::from_bars(&[]).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::is_business_day;

    #[test]
    fn test_generator_is_deterministic() {
        let a = generate_ohlcv(100, 100.0, 0.02, 42);
        let b = generate_ohlcv(100, 100.0, 0.02, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bars_are_consistent() {
        let series = generate_ohlcv(300, 50.0, 0.03, 1);
        assert_eq!(series.len(), 300);

        let opens = series.column("Open").unwrap();
        let highs = series.column("High").unwrap();
        let lows = series.column("Low").unwrap();
        let closes = series.column("Close").unwrap();

        for i in 0..series.len() {
            assert!(highs[i] >= opens[i].max(closes[i]));
            assert!(lows[i] <= opens[i].min(closes[i]));
            assert!(lows[i] > 0.0);
        }
        for d in series.dates() {
            assert!(is_business_day(*d));
        }
    }
}
