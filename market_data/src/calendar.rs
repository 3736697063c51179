//! Business-day calendar helpers
//!
//! Forecast horizons are expressed in business days (Monday through Friday).
//! Exchange holidays are not modeled here; techniques that care about
//! holidays carry their own tables.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Whether the given date falls on a weekday
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The first business day strictly after `date`
pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut d = date + Duration::days(1);
    while !is_business_day(d) {
        d += Duration::days(1);
    }
    d
}

/// Exactly `n` business days strictly after `last`, in increasing order
pub fn business_days_after(last: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(n);
    let mut d = last;
    for _ in 0..n {
        d = next_business_day(d);
        days.push(d);
    }
    days
}

/// All business days in the inclusive range `[start, end]`
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut d = start;
    while d <= end {
        if is_business_day(d) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2023, 6, 2, true)] // Friday
    #[case(2023, 6, 3, false)] // Saturday
    #[case(2023, 6, 4, false)] // Sunday
    #[case(2023, 6, 5, true)] // Monday
    fn test_is_business_day(#[case] y: i32, #[case] m: u32, #[case] d: u32, #[case] expected: bool) {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(is_business_day(date), expected);
    }

    #[test]
    fn test_next_business_day_skips_weekend() {
        let friday = NaiveDate::from_ymd_opt(2023, 6, 2).unwrap();
        let monday = NaiveDate::from_ymd_opt(2023, 6, 5).unwrap();
        assert_eq!(next_business_day(friday), monday);
    }

    #[test]
    fn test_business_days_after_count_and_order() {
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let days = business_days_after(start, 10);
        assert_eq!(days.len(), 10);
        for pair in days.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        for d in &days {
            assert!(is_business_day(*d));
            assert!(*d > start);
        }
    }
}
