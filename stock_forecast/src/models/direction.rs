//! Direction-classification ensemble
//!
//! Engineers a wide panel of technical features, selects the informative
//! ones by consensus of three rankings (absolute correlation, ANOVA F,
//! binned mutual information), trains several classifiers on a
//! chronological split and blends their up-probabilities weighted by
//! held-out ROC-AUC.

use crate::error::{ForecastError, Result};
use crate::features;
use crate::forecaster::{load_history, ForecasterConfig, LoadedHistory};
use crate::metrics::roc_auc;
use crate::ml::{
    AdaBoostClassifier, GradientBoostingClassifier, LogisticRegression, ProbabilityClassifier,
    RandomForestClassifier,
};
use crate::stats;
use chrono::NaiveDate;
use market_data::calendar::next_business_day;
use market_data::MarketDataProvider;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const TOP_K: usize = 30;
const MIN_CONSENSUS_VOTES: usize = 2;
const FALLBACK_FEATURES: usize = 10;
const MI_BINS: usize = 8;
/// Label thresholds: the smoothed trend must rise 0.2% and the close 0.1%
const TREND_THRESHOLD: f64 = 1.002;
const CLOSE_THRESHOLD: f64 = 1.001;

#[derive(Debug, Clone, PartialEq)]
pub enum Direction {
    Up,
    Down,
}

/// One panel member's held-out score and live prediction
#[derive(Debug, Clone, Serialize)]
pub struct ModelVote {
    pub model: String,
    pub auc: f64,
    pub up_probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionPrediction {
    pub symbol: String,
    /// Business day the prediction refers to
    pub date: NaiveDate,
    pub votes: Vec<ModelVote>,
    /// AUC-weighted blend of the panel's up-probabilities
    pub consensus_up_probability: f64,
    pub selected_features: Vec<String>,
}

impl DirectionPrediction {
    pub fn direction(&self) -> Direction {
        if self.consensus_up_probability >= 0.5 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

struct Dataset {
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
    labels: Vec<f64>,
    /// Feature row for the not-yet-labeled latest bar
    live_row: Vec<f64>,
}

fn ratio(a: f64, b: f64) -> f64 {
    if b.abs() > f64::EPSILON {
        a / b
    } else {
        f64::NAN
    }
}

fn build_dataset(history: &LoadedHistory) -> Result<Dataset> {
    let (opens, highs, lows, closes) = history.ohlc()?;
    let volumes = history.series.column("Volume")?.to_vec();
    let n = closes.len();
    if n < 260 {
        return Err(ForecastError::InsufficientData(format!(
            "direction model needs at least 260 bars for its long averages, got {}",
            n
        )));
    }

    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();

    let returns = {
        let mut r = vec![f64::NAN; n];
        for i in 1..n {
            r[i] = (closes[i] - closes[i - 1]) / closes[i - 1];
        }
        r
    };
    for lag_n in [1usize, 2, 3, 5, 10] {
        columns.push((format!("return_lag_{}", lag_n), features::lag(&returns, lag_n - 1)));
        let lagged = features::lag(&closes, lag_n);
        let col = closes
            .iter()
            .zip(&lagged)
            .map(|(c, l)| ratio(*c, *l))
            .collect();
        columns.push((format!("close_ratio_{}", lag_n), col));
    }

    columns.push((
        "open_close".to_string(),
        opens
            .iter()
            .zip(&closes)
            .map(|(o, c)| ratio(c - o, *o))
            .collect(),
    ));
    columns.push((
        "high_low_range".to_string(),
        highs
            .iter()
            .zip(&lows)
            .zip(&closes)
            .map(|((h, l), c)| ratio(h - l, *c))
            .collect(),
    ));

    let vol_sma = features::sma(&volumes, 20);
    columns.push((
        "volume_ratio".to_string(),
        volumes
            .iter()
            .zip(&vol_sma)
            .map(|(v, s)| ratio(*v, *s))
            .collect(),
    ));
    columns.push(("volume_change".to_string(), {
        let mut r = vec![f64::NAN; n];
        for i in 1..n {
            r[i] = ratio(volumes[i] - volumes[i - 1], volumes[i - 1]);
        }
        r
    }));

    columns.push(("rsi_14".to_string(), features::rsi(&closes, 14)));
    let (macd_line, macd_signal) = features::macd(&closes);
    columns.push(("macd".to_string(), macd_line));
    columns.push(("macd_signal".to_string(), macd_signal));
    columns.push((
        "stochastic_k".to_string(),
        features::stochastic_k(&highs, &lows, &closes, 14),
    ));
    columns.push((
        "atr_14".to_string(),
        features::atr(&highs, &lows, &closes, 14)
            .iter()
            .zip(&closes)
            .map(|(a, c)| ratio(*a, *c))
            .collect(),
    ));
    columns.push((
        "bollinger_width".to_string(),
        features::bollinger_width(&closes, 20),
    ));

    for window in [10usize, 20, 50, 200] {
        let sma = features::sma(&closes, window);
        columns.push((
            format!("close_sma_{}", window),
            closes.iter().zip(&sma).map(|(c, s)| ratio(*c, *s)).collect(),
        ));
        let ema = features::ema(&closes, window);
        columns.push((
            format!("close_ema_{}", window),
            closes.iter().zip(&ema).map(|(c, e)| ratio(*c, *e)).collect(),
        ));
    }

    // Label: the 5-day trend and the close must both step up tomorrow
    let sma5 = features::sma(&closes, 5);
    let mut labels = vec![f64::NAN; n];
    for i in 0..n - 1 {
        if sma5[i].is_nan() || sma5[i + 1].is_nan() {
            continue;
        }
        let up = sma5[i + 1] > sma5[i] * TREND_THRESHOLD && closes[i + 1] > closes[i] * CLOSE_THRESHOLD;
        labels[i] = if up { 1.0 } else { 0.0 };
    }

    let names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
    let mut rows = Vec::new();
    let mut kept_labels = Vec::new();
    let mut live_row = Vec::new();
    for i in 0..n {
        let row: Vec<f64> = columns.iter().map(|(_, col)| col[i]).collect();
        if row.iter().any(|v| v.is_nan()) {
            continue;
        }
        if i == n - 1 {
            live_row = row;
            continue;
        }
        if labels[i].is_nan() {
            continue;
        }
        rows.push(row);
        kept_labels.push(labels[i]);
    }

    if rows.len() < 120 || live_row.is_empty() {
        return Err(ForecastError::InsufficientData(format!(
            "direction model has only {} usable rows after warm-up",
            rows.len()
        )));
    }

    Ok(Dataset {
        names,
        rows,
        labels: kept_labels,
        live_row,
    })
}

fn column(rows: &[Vec<f64>], j: usize) -> Vec<f64> {
    rows.iter().map(|r| r[j]).collect()
}

fn abs_correlation(x: &[f64], y: &[f64]) -> f64 {
    let mx = stats::mean(x);
    let my = stats::mean(y);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return 0.0;
    }
    (cov / (vx * vy).sqrt()).abs()
}

/// Two-class ANOVA F-score
fn anova_f(x: &[f64], y: &[f64]) -> f64 {
    let pos: Vec<f64> = x.iter().zip(y).filter(|(_, l)| **l > 0.5).map(|(v, _)| *v).collect();
    let neg: Vec<f64> = x.iter().zip(y).filter(|(_, l)| **l <= 0.5).map(|(v, _)| *v).collect();
    if pos.len() < 2 || neg.len() < 2 {
        return 0.0;
    }
    let m = stats::mean(x);
    let between = pos.len() as f64 * (stats::mean(&pos) - m).powi(2)
        + neg.len() as f64 * (stats::mean(&neg) - m).powi(2);
    let within: f64 = pos.iter().map(|v| (v - stats::mean(&pos)).powi(2)).sum::<f64>()
        + neg.iter().map(|v| (v - stats::mean(&neg)).powi(2)).sum::<f64>();
    let dof = (x.len() - 2).max(1) as f64;
    if within <= f64::EPSILON {
        return f64::MAX;
    }
    between / (within / dof)
}

/// Mutual information with the label after quantile binning
fn mutual_information(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    let mut sorted: Vec<f64> = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let edges: Vec<f64> = (1..MI_BINS)
        .map(|k| sorted[k * n / MI_BINS])
        .collect();
    let bin_of = |v: f64| edges.iter().filter(|e| v > **e).count();

    let mut joint: HashMap<(usize, usize), f64> = HashMap::new();
    let mut px = vec![0.0; MI_BINS];
    let mut py = vec![0.0; 2];
    for (v, l) in x.iter().zip(y) {
        let b = bin_of(*v);
        let c = usize::from(*l > 0.5);
        *joint.entry((b, c)).or_insert(0.0) += 1.0;
        px[b] += 1.0;
        py[c] += 1.0;
    }
    let n = n as f64;
    joint
        .iter()
        .map(|((b, c), count)| {
            let pxy = count / n;
            pxy * (pxy / (px[*b] / n * py[*c] / n)).ln()
        })
        .sum()
}

fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);
    order
}

/// Indices picked by at least two of the three rankings, topped up from
/// the correlation ranking when the intersection is thin
fn select_features(rows: &[Vec<f64>], labels: &[f64]) -> Vec<usize> {
    let k = rows[0].len();
    let corr: Vec<f64> = (0..k)
        .map(|j| abs_correlation(&column(rows, j), labels))
        .collect();
    let f_scores: Vec<f64> = (0..k)
        .map(|j| anova_f(&column(rows, j), labels))
        .collect();
    let mi: Vec<f64> = (0..k)
        .map(|j| mutual_information(&column(rows, j), labels))
        .collect();

    let top_corr = top_k_indices(&corr, TOP_K);
    let top_f = top_k_indices(&f_scores, TOP_K);
    let top_mi = top_k_indices(&mi, TOP_K);

    let mut votes = vec![0usize; k];
    for j in top_corr.iter().chain(&top_f).chain(&top_mi) {
        votes[*j] += 1;
    }
    let mut selected: Vec<usize> = (0..k).filter(|j| votes[*j] >= MIN_CONSENSUS_VOTES).collect();
    if selected.len() < FALLBACK_FEATURES {
        selected = top_k_indices(&corr, FALLBACK_FEATURES);
        selected.sort_unstable();
    }
    selected
}

pub struct DirectionClassifier {
    config: ForecasterConfig,
    prediction: DirectionPrediction,
}

impl DirectionClassifier {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history)
    }

    pub fn from_history(config: ForecasterConfig, history: LoadedHistory) -> Result<Self> {
        let dataset = build_dataset(&history)?;
        let selected = select_features(&dataset.rows, &dataset.labels);
        let selected_names: Vec<String> = selected
            .iter()
            .map(|j| dataset.names[*j].clone())
            .collect();
        debug!(features = ?selected_names, "consensus feature selection");

        let project = |row: &Vec<f64>| -> Vec<f64> {
            selected.iter().map(|j| row[*j]).collect()
        };
        let rows: Vec<Vec<f64>> = dataset.rows.iter().map(project).collect();
        let live_row = project(&dataset.live_row);

        let split = (rows.len() as f64 * 0.8).round() as usize;
        let (train_x, test_x) = rows.split_at(split);
        let (train_y, test_y) = dataset.labels.split_at(split);
        let test_labels: Vec<bool> = test_y.iter().map(|l| *l > 0.5).collect();

        let mut panel: Vec<Box<dyn ProbabilityClassifier>> = vec![
            Box::new(LogisticRegression::default()),
            Box::new(GradientBoostingClassifier::new(60, 0.1, 3, 11)),
            Box::new(AdaBoostClassifier::new(25)),
            Box::new(RandomForestClassifier::new(40, 4, 11)),
        ];

        let mut votes = Vec::new();
        for model in panel.iter_mut() {
            let name = model.name().to_string();
            if let Err(err) = model.fit(train_x, train_y) {
                warn!(model = %name, error = %err, "panel member failed to fit");
                continue;
            }
            let scores = model.predict_proba_batch(test_x);
            let auc = match roc_auc(&test_labels, &scores) {
                Ok(auc) if auc.is_finite() => auc,
                _ => {
                    warn!(model = %name, "panel member produced no usable AUC");
                    continue;
                }
            };
            let up_probability = model.predict_proba(&live_row);
            debug!(model = %name, auc, up_probability, "panel member scored");
            votes.push(ModelVote {
                model: name,
                auc,
                up_probability,
            });
        }

        if votes.is_empty() {
            return Err(ForecastError::NoViableModel(
                "every direction classifier failed to fit or score".to_string(),
            ));
        }

        let weight_sum: f64 = votes.iter().map(|v| v.auc).sum();
        let consensus = if weight_sum > f64::EPSILON {
            votes.iter().map(|v| v.auc * v.up_probability).sum::<f64>() / weight_sum
        } else {
            votes.iter().map(|v| v.up_probability).sum::<f64>() / votes.len() as f64
        };

        let prediction = DirectionPrediction {
            symbol: config.symbol.clone(),
            date: next_business_day(history.last_date),
            votes,
            consensus_up_probability: consensus,
            selected_features: selected_names,
        };
        info!(
            symbol = %config.symbol,
            consensus,
            models = prediction.votes.len(),
            "direction ensemble fitted"
        );

        Ok(Self { config, prediction })
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn prediction(&self) -> &DirectionPrediction {
        &self.prediction
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.prediction)
            .map_err(|e| ForecastError::Numerical(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use market_data::generate_ohlcv;

    fn fitted() -> DirectionClassifier {
        let series = generate_ohlcv(420, 100.0, 0.02, 37);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        DirectionClassifier::from_history(ForecasterConfig::new("TEST"), history).unwrap()
    }

    #[test]
    fn test_consensus_is_auc_weighted_average() {
        let model = fitted();
        let p = model.prediction();
        let weight_sum: f64 = p.votes.iter().map(|v| v.auc).sum();
        let expected: f64 =
            p.votes.iter().map(|v| v.auc * v.up_probability).sum::<f64>() / weight_sum;
        assert_approx_eq!(p.consensus_up_probability, expected, 1e-12);
    }

    #[test]
    fn test_probabilities_in_range() {
        let model = fitted();
        for vote in &model.prediction().votes {
            assert!((0.0..=1.0).contains(&vote.up_probability));
            assert!((0.0..=1.0).contains(&vote.auc));
        }
        let c = model.prediction().consensus_up_probability;
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn test_prediction_date_is_next_business_day() {
        let series = generate_ohlcv(420, 100.0, 0.02, 37);
        let last = series.last_date().unwrap();
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let model =
            DirectionClassifier::from_history(ForecasterConfig::new("TEST"), history).unwrap();
        assert_eq!(model.prediction().date, next_business_day(last));
    }

    #[test]
    fn test_feature_selection_finds_informative_column() {
        // Feature 0 equals the label with noise, feature 1 is noise
        let n = 400;
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let label = (i / 7) % 2;
                vec![
                    label as f64 + ((i * 31 % 17) as f64) * 0.01,
                    ((i * 13) % 23) as f64,
                    ((i * 7) % 5) as f64,
                ]
            })
            .collect();
        let labels: Vec<f64> = (0..n).map(|i| ((i / 7) % 2) as f64).collect();
        let selected = select_features(&rows, &labels);
        assert!(selected.contains(&0));
    }

    #[test]
    fn test_short_history_rejected() {
        let series = generate_ohlcv(120, 100.0, 0.02, 5);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result = DirectionClassifier::from_history(ForecasterConfig::new("TEST"), history);
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
