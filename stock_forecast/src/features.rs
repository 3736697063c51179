//! Technical indicators
//!
//! All functions return a vector the same length as the input, with
//! `f64::NAN` over the warm-up window. Feature-matrix builders drop rows
//! containing NaN before fitting.

/// Simple moving average
pub fn sma(data: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if window == 0 || data.len() < window {
        return out;
    }
    let mut sum: f64 = data[..window].iter().sum();
    out[window - 1] = sum / window as f64;
    for i in window..data.len() {
        sum += data[i] - data[i - window];
        out[i] = sum / window as f64;
    }
    out
}

/// Exponential moving average with span semantics (alpha = 2/(span+1))
pub fn ema(data: &[f64], span: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if span == 0 || data.is_empty() {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut value = data[0];
    out[0] = value;
    for i in 1..data.len() {
        value = alpha * data[i] + (1.0 - alpha) * value;
        out[i] = value;
    }
    out
}

/// EMA with an explicit smoothing factor, seeded at the first value
fn ewm_alpha(data: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if data.is_empty() {
        return out;
    }
    let mut value = data[0];
    out[0] = value;
    for i in 1..data.len() {
        value = alpha * data[i] + (1.0 - alpha) * value;
        out[i] = value;
    }
    out
}

/// Relative Strength Index smoothed with alpha = 1/window (Wilder's method)
pub fn rsi(closes: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if closes.len() < 2 || window == 0 {
        return out;
    }

    let gains: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .collect();
    let losses: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[0] - w[1]).max(0.0))
        .collect();

    let alpha = 1.0 / window as f64;
    let avg_gain = ewm_alpha(&gains, alpha);
    let avg_loss = ewm_alpha(&losses, alpha);

    for i in 0..gains.len() {
        let value = if avg_loss[i] <= f64::EPSILON {
            100.0
        } else {
            let rs = avg_gain[i] / avg_loss[i];
            100.0 - 100.0 / (1.0 + rs)
        };
        out[i + 1] = value;
    }
    // Warm-up values before a full window are unreliable
    let warmup = window.min(out.len());
    for v in out.iter_mut().take(warmup) {
        *v = f64::NAN;
    }
    out
}

/// MACD line and its signal line (12/26/9 EMA convention)
pub fn macd(closes: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let fast = ema(closes, 12);
    let slow = ema(closes, 26);
    let line: Vec<f64> = fast
        .iter()
        .zip(&slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&line, 9);
    (line, signal)
}

/// Stochastic %K over a rolling high/low window
pub fn stochastic_k(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let hi = highs[i + 1 - window..=i]
            .iter()
            .fold(f64::MIN, |a, b| a.max(*b));
        let lo = lows[i + 1 - window..=i]
            .iter()
            .fold(f64::MAX, |a, b| a.min(*b));
        out[i] = if hi - lo > f64::EPSILON {
            100.0 * (closes[i] - lo) / (hi - lo)
        } else {
            50.0
        };
    }
    out
}

/// Average True Range (Wilder smoothing)
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 || window == 0 {
        return out;
    }
    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        true_ranges.push(tr);
    }
    let smoothed = ewm_alpha(&true_ranges, 1.0 / window as f64);
    for (i, v) in smoothed.into_iter().enumerate() {
        out[i + 1] = v;
    }
    for v in out.iter_mut().take(window.min(n)) {
        *v = f64::NAN;
    }
    out
}

/// Bollinger band width relative to the middle band (20-day, 2 sigma)
pub fn bollinger_width(closes: &[f64], window: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &closes[i + 1 - window..=i];
        let m = crate::stats::mean(slice);
        let s = crate::stats::std_dev(slice);
        out[i] = if m.abs() > f64::EPSILON {
            4.0 * s / m
        } else {
            f64::NAN
        };
    }
    out
}

/// Shift a series forward by `lag` (value at t becomes value from t-lag)
pub fn lag(data: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    for i in periods..data.len() {
        out[i] = data[i - periods];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&data, 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_approx_eq!(out[2], 2.0);
        assert_approx_eq!(out[4], 4.0);
    }

    #[test]
    fn test_rsi_bounds_and_direction() {
        // Monotone rally pins RSI at 100
        let rally: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&rally, 14);
        let last = *out.last().unwrap();
        assert_approx_eq!(last, 100.0, 1e-9);

        // Monotone selloff drives RSI to 0
        let selloff: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let low = *rsi(&selloff, 14).last().unwrap();
        assert!(low < 1.0);
    }

    #[test]
    fn test_stochastic_k_range() {
        let highs: Vec<f64> = (0..30).map(|i| 102.0 + (i % 5) as f64).collect();
        let lows: Vec<f64> = (0..30).map(|i| 98.0 - (i % 3) as f64).collect();
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i % 4) as f64).collect();
        for v in stochastic_k(&highs, &lows, &closes, 14) {
            if !v.is_nan() {
                assert!((0.0..=100.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_lag_shifts() {
        let data = vec![1.0, 2.0, 3.0];
        let out = lag(&data, 1);
        assert!(out[0].is_nan());
        assert_approx_eq!(out[1], 1.0);
        assert_approx_eq!(out[2], 2.0);
    }

    #[test]
    fn test_atr_positive() {
        let highs: Vec<f64> = (0..40).map(|i| 105.0 + (i as f64 * 0.3).sin()).collect();
        let lows: Vec<f64> = (0..40).map(|i| 95.0 + (i as f64 * 0.2).cos()).collect();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.25).sin()).collect();
        for v in atr(&highs, &lows, &closes, 14) {
            if !v.is_nan() {
                assert!(v > 0.0);
            }
        }
    }
}
