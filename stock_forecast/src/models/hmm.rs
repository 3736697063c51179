//! Hidden-Markov-model forecaster
//!
//! Observations are per-bar fractional moves: (close-open)/open,
//! (high-open)/open and (open-low)/open. A diagonal-Gaussian HMM is fit by
//! Baum-Welch for each candidate state count; the candidate with the best
//! held-out log-likelihood wins. Forecasting scores a grid of possible next
//! moves appended to a rolling window and takes the most likely outcome.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

const CLOSE_GRID: usize = 50;
const HIGH_GRID: usize = 10;
const LOW_GRID: usize = 10;
const BAND_FRACTION: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct HmmParams {
    /// Hidden state counts to try
    pub state_candidates: Vec<usize>,
    pub em_iterations: usize,
    /// Rolling window length used when scoring forecast outcomes
    pub window: usize,
    pub seed: u64,
}

impl Default for HmmParams {
    fn default() -> Self {
        Self {
            state_candidates: vec![5, 10, 15],
            em_iterations: 20,
            window: 30,
            seed: 42,
        }
    }
}

/// Gaussian emission with a diagonal covariance
#[derive(Debug, Clone)]
struct DiagonalGaussian {
    mean: Array1<f64>,
    variance: Array1<f64>,
}

impl DiagonalGaussian {
    fn log_pdf(&self, x: &Array1<f64>) -> f64 {
        let mut value = 0.0;
        for i in 0..self.mean.len() {
            let var = self.variance[i].max(1e-10);
            let diff = x[i] - self.mean[i];
            value += -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + diff * diff / var);
        }
        value
    }

    fn pdf(&self, x: &Array1<f64>) -> f64 {
        self.log_pdf(x).exp()
    }
}

#[derive(Debug, Clone)]
struct GaussianHmm {
    initial: Array1<f64>,
    transition: Array2<f64>,
    emissions: Vec<DiagonalGaussian>,
}

impl GaussianHmm {
    fn n_states(&self) -> usize {
        self.initial.len()
    }

    /// Seeded initialization: observations are scattered across states and
    /// the transition matrix starts sticky.
    fn init(observations: &Array2<f64>, n_states: usize, rng: &mut StdRng) -> Result<Self> {
        let t = observations.nrows();
        let d = observations.ncols();
        if t < n_states * 4 {
            return Err(ForecastError::InsufficientData(format!(
                "{} observations cannot support {} hidden states",
                t, n_states
            )));
        }

        let assignments: Vec<usize> = (0..t).map(|_| rng.gen_range(0..n_states)).collect();
        let global_mean = observations
            .mean_axis(Axis(0))
            .ok_or_else(|| ForecastError::Numerical("empty observation matrix".to_string()))?;
        let mut global_var = Array1::zeros(d);
        for row in observations.rows() {
            for i in 0..d {
                global_var[i] += (row[i] - global_mean[i]).powi(2);
            }
        }
        global_var /= t as f64;

        let mut emissions = Vec::with_capacity(n_states);
        for state in 0..n_states {
            let members: Vec<usize> = (0..t).filter(|i| assignments[*i] == state).collect();
            let mut mean = Array1::zeros(d);
            for &i in &members {
                for j in 0..d {
                    mean[j] += observations[[i, j]];
                }
            }
            if !members.is_empty() {
                mean /= members.len() as f64;
            }
            emissions.push(DiagonalGaussian {
                mean,
                variance: global_var.mapv(|v: f64| v.max(1e-8)),
            });
        }

        let initial = Array1::from_elem(n_states, 1.0 / n_states as f64);
        let mut transition = Array2::from_elem((n_states, n_states), 0.2 / n_states as f64);
        for i in 0..n_states {
            transition[[i, i]] += 0.8;
        }
        // Normalize rows exactly
        for mut row in transition.rows_mut() {
            let sum = row.sum();
            row /= sum;
        }

        Ok(Self {
            initial,
            transition,
            emissions,
        })
    }

    /// Scaled forward pass; returns the log-likelihood
    fn log_likelihood(&self, observations: &Array2<f64>) -> f64 {
        let t = observations.nrows();
        let n = self.n_states();
        if t == 0 {
            return 0.0;
        }

        let mut alpha = vec![0.0; n];
        let mut log_likelihood = 0.0;

        let obs0 = observations.row(0).to_owned();
        for j in 0..n {
            alpha[j] = self.initial[j] * self.emissions[j].pdf(&obs0);
        }
        let mut scale: f64 = alpha.iter().sum();
        if scale > 1e-300 {
            alpha.iter_mut().for_each(|a| *a /= scale);
        }
        log_likelihood += (scale + 1e-300).ln();

        for t_idx in 1..t {
            let obs = observations.row(t_idx).to_owned();
            let mut next = vec![0.0; n];
            for (j, slot) in next.iter_mut().enumerate() {
                let mut sum = 0.0;
                for i in 0..n {
                    sum += alpha[i] * self.transition[[i, j]];
                }
                *slot = sum * self.emissions[j].pdf(&obs);
            }
            scale = next.iter().sum();
            if scale > 1e-300 {
                next.iter_mut().for_each(|a| *a /= scale);
            }
            log_likelihood += (scale + 1e-300).ln();
            alpha = next;
        }
        log_likelihood
    }

    /// One Baum-Welch EM step; returns the log-likelihood before the update
    fn em_step(&mut self, observations: &Array2<f64>) -> f64 {
        let t = observations.nrows();
        let n = self.n_states();

        let mut emission_probs = Array2::zeros((t, n));
        for t_idx in 0..t {
            let obs = observations.row(t_idx).to_owned();
            for j in 0..n {
                emission_probs[[t_idx, j]] = self.emissions[j].pdf(&obs);
            }
        }

        // Scaled forward
        let mut alpha = Array2::zeros((t, n));
        let mut scale = Array1::zeros(t);
        for j in 0..n {
            alpha[[0, j]] = self.initial[j] * emission_probs[[0, j]];
        }
        scale[0] = alpha.row(0).sum();
        if scale[0] > 1e-300 {
            for j in 0..n {
                alpha[[0, j]] /= scale[0];
            }
        }
        for t_idx in 1..t {
            for j in 0..n {
                let mut sum = 0.0;
                for i in 0..n {
                    sum += alpha[[t_idx - 1, i]] * self.transition[[i, j]];
                }
                alpha[[t_idx, j]] = sum * emission_probs[[t_idx, j]];
            }
            scale[t_idx] = alpha.row(t_idx).sum();
            if scale[t_idx] > 1e-300 {
                for j in 0..n {
                    alpha[[t_idx, j]] /= scale[t_idx];
                }
            }
        }
        let log_likelihood: f64 = scale.iter().map(|s| (s + 1e-300).ln()).sum();

        // Scaled backward
        let mut beta = Array2::zeros((t, n));
        for j in 0..n {
            beta[[t - 1, j]] = 1.0;
        }
        for t_idx in (0..t - 1).rev() {
            for i in 0..n {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += self.transition[[i, j]]
                        * emission_probs[[t_idx + 1, j]]
                        * beta[[t_idx + 1, j]];
                }
                beta[[t_idx, i]] = sum;
            }
            if scale[t_idx + 1] > 1e-300 {
                for i in 0..n {
                    beta[[t_idx, i]] /= scale[t_idx + 1];
                }
            }
        }

        // Posteriors
        let mut gamma = Array2::zeros((t, n));
        for t_idx in 0..t {
            let mut sum = 0.0;
            for j in 0..n {
                gamma[[t_idx, j]] = alpha[[t_idx, j]] * beta[[t_idx, j]];
                sum += gamma[[t_idx, j]];
            }
            if sum > 1e-300 {
                for j in 0..n {
                    gamma[[t_idx, j]] /= sum;
                }
            }
        }

        let mut xi_sum: Array2<f64> = Array2::zeros((n, n));
        for t_idx in 0..t - 1 {
            for i in 0..n {
                for j in 0..n {
                    xi_sum[[i, j]] += alpha[[t_idx, i]]
                        * self.transition[[i, j]]
                        * emission_probs[[t_idx + 1, j]]
                        * beta[[t_idx + 1, j]];
                }
            }
        }

        // M-step
        self.initial = gamma.row(0).to_owned();
        for i in 0..n {
            let gamma_sum: f64 = (0..t - 1).map(|t_idx| gamma[[t_idx, i]]).sum();
            for j in 0..n {
                self.transition[[i, j]] = if gamma_sum > 1e-300 {
                    xi_sum[[i, j]] / gamma_sum
                } else {
                    1.0 / n as f64
                };
            }
        }
        for mut row in self.transition.rows_mut() {
            let sum = row.sum();
            if sum > 1e-300 {
                row /= sum;
            }
        }

        let d = observations.ncols();
        for (state, emission) in self.emissions.iter_mut().enumerate() {
            let weight_sum: f64 = (0..t).map(|t_idx| gamma[[t_idx, state]]).sum();
            if weight_sum < 1e-300 {
                continue;
            }
            let mut mean = Array1::zeros(d);
            for t_idx in 0..t {
                for j in 0..d {
                    mean[j] += gamma[[t_idx, state]] * observations[[t_idx, j]];
                }
            }
            mean /= weight_sum;
            let mut variance = Array1::zeros(d);
            for t_idx in 0..t {
                for j in 0..d {
                    variance[j] +=
                        gamma[[t_idx, state]] * (observations[[t_idx, j]] - mean[j]).powi(2);
                }
            }
            variance /= weight_sum;
            emission.mean = mean;
            emission.variance = variance.mapv(|v: f64| v + 1e-8);
        }

        log_likelihood
    }
}

fn feature_matrix(opens: &[f64], highs: &[f64], lows: &[f64], closes: &[f64]) -> Array2<f64> {
    let t = closes.len();
    let mut features = Array2::zeros((t, 3));
    for i in 0..t {
        let open = if opens[i].abs() > f64::EPSILON {
            opens[i]
        } else {
            1.0
        };
        features[[i, 0]] = (closes[i] - opens[i]) / open;
        features[[i, 1]] = (highs[i] - opens[i]) / open;
        features[[i, 2]] = (opens[i] - lows[i]) / open;
    }
    features
}

fn grid(min: f64, max: f64, steps: usize) -> Vec<f64> {
    if steps <= 1 || (max - min).abs() < f64::EPSILON {
        return vec![min];
    }
    let step = (max - min) / (steps - 1) as f64;
    (0..steps).map(|i| min + step * i as f64).collect()
}

pub struct HmmForecaster {
    config: ForecasterConfig,
    params: HmmParams,
    history: LoadedHistory,
    model: GaussianHmm,
    validation_score: f64,
    last: Option<ForecastResult>,
}

impl HmmForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, HmmParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: HmmParams,
    ) -> Result<Self> {
        let (opens, highs, lows, closes) = history.ohlc()?;
        let features = feature_matrix(&opens, &highs, &lows, &closes);
        let t = features.nrows();
        if t < params.window + 40 {
            return Err(ForecastError::InsufficientData(format!(
                "HMM needs at least {} bars, got {}",
                params.window + 40,
                t
            )));
        }

        // Chronological split: older bars train, newer bars validate
        let split = (t as f64 * 0.8).round() as usize;
        let train = features.slice(ndarray::s![..split, ..]).to_owned();
        let validation = features.slice(ndarray::s![split.., ..]).to_owned();

        let mut best: Option<(GaussianHmm, f64, usize)> = None;
        for &n_states in &params.state_candidates {
            let mut rng = StdRng::seed_from_u64(params.seed);
            match Self::fit_candidate(&train, n_states, params.em_iterations, &mut rng) {
                Ok(model) => {
                    let score = model.log_likelihood(&validation);
                    debug!(n_states, score, "HMM candidate scored");
                    if score.is_finite()
                        && best.as_ref().map_or(true, |(_, s, _)| score > *s)
                    {
                        best = Some((model, score, n_states));
                    }
                }
                Err(err) => {
                    warn!(n_states, error = %err, "skipping HMM candidate");
                }
            }
        }

        let (model, validation_score, n_states) = best.ok_or_else(|| {
            ForecastError::NoViableModel("every HMM candidate failed to fit".to_string())
        })?;
        info!(
            symbol = %config.symbol,
            n_states,
            validation_score,
            "selected HMM"
        );

        Ok(Self {
            config,
            params,
            history,
            model,
            validation_score,
            last: None,
        })
    }

    fn fit_candidate(
        train: &Array2<f64>,
        n_states: usize,
        iterations: usize,
        rng: &mut StdRng,
    ) -> Result<GaussianHmm> {
        let mut model = GaussianHmm::init(train, n_states, rng)?;
        let mut previous = f64::NEG_INFINITY;
        for _ in 0..iterations {
            let ll = model.em_step(train);
            if !ll.is_finite() {
                return Err(ForecastError::Numerical(
                    "EM produced a non-finite likelihood".to_string(),
                ));
            }
            if (ll - previous).abs() < 1e-6 {
                break;
            }
            previous = ll;
        }
        Ok(model)
    }

    pub fn validation_score(&self) -> f64 {
        self.validation_score
    }

    pub fn n_states(&self) -> usize {
        self.model.n_states()
    }
}

impl Forecaster for HmmForecaster {
    fn name(&self) -> &'static str {
        "hmm"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let (opens, highs, lows, closes) = self.history.ohlc()?;
        let window = self.params.window;
        let start = closes.len() - window;

        let mut win_opens = opens[start..].to_vec();
        let mut win_highs = highs[start..].to_vec();
        let mut win_lows = lows[start..].to_vec();
        let mut win_closes = closes[start..].to_vec();

        let mut predictions = Vec::with_capacity(horizon_days);
        for _ in 0..horizon_days {
            let features = feature_matrix(&win_opens, &win_highs, &win_lows, &win_closes);

            // Candidate move grids span what the window actually did
            let close_moves: Vec<f64> = (0..features.nrows()).map(|i| features[[i, 0]]).collect();
            let high_moves: Vec<f64> = (0..features.nrows()).map(|i| features[[i, 1]]).collect();
            let low_moves: Vec<f64> = (0..features.nrows()).map(|i| features[[i, 2]]).collect();
            let min_max = |v: &[f64]| {
                v.iter().fold((f64::MAX, f64::MIN), |(lo, hi), x| {
                    (lo.min(*x), hi.max(*x))
                })
            };
            let (c_lo, c_hi) = min_max(&close_moves);
            let (h_lo, h_hi) = min_max(&high_moves);
            let (l_lo, l_hi) = min_max(&low_moves);

            let mut best_move = (0.0, 0.0, 0.0);
            let mut best_score = f64::NEG_INFINITY;
            let t = features.nrows();
            let mut extended = Array2::zeros((t + 1, 3));
            extended.slice_mut(ndarray::s![..t, ..]).assign(&features);

            for dc in grid(c_lo, c_hi, CLOSE_GRID) {
                for dh in grid(h_lo.max(0.0), h_hi, HIGH_GRID) {
                    for dl in grid(l_lo.max(0.0), l_hi, LOW_GRID) {
                        extended[[t, 0]] = dc;
                        extended[[t, 1]] = dh;
                        extended[[t, 2]] = dl;
                        let score = self.model.log_likelihood(&extended);
                        if score > best_score {
                            best_score = score;
                            best_move = (dc, dh, dl);
                        }
                    }
                }
            }

            let prev_close = *win_closes
                .last()
                .ok_or_else(|| ForecastError::Numerical("empty window".to_string()))?;
            let open = prev_close;
            let close = open * (1.0 + best_move.0);
            let high = (open * (1.0 + best_move.1)).max(open.max(close));
            let low = (open * (1.0 - best_move.2)).min(open.min(close));
            predictions.push(close);

            // Roll the window forward with the synthesized bar
            win_opens.remove(0);
            win_highs.remove(0);
            win_lows.remove(0);
            win_closes.remove(0);
            win_opens.push(open);
            win_highs.push(high);
            win_lows.push(low);
            win_closes.push(close);
        }

        let dates = business_days_after(self.history.last_date, horizon_days);
        let points: Vec<ForecastPoint> = dates
            .into_iter()
            .zip(&predictions)
            .map(|(date, &predicted)| ForecastPoint {
                date,
                predicted,
                lower: predicted * (1.0 - BAND_FRACTION),
                upper: predicted * (1.0 + BAND_FRACTION),
            })
            .collect();

        let result = ForecastResult::new(
            &self.config.symbol,
            self.name(),
            &self.config.target_column,
            self.history.last_date,
            points,
        )?;
        self.last = Some(result.clone());
        Ok(result)
    }

    fn last_forecast(&self) -> Option<&ForecastResult> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_data::generate_ohlcv;

    fn small_params() -> HmmParams {
        HmmParams {
            state_candidates: vec![3],
            em_iterations: 8,
            window: 20,
            seed: 7,
        }
    }

    fn fitted() -> HmmForecaster {
        let series = generate_ohlcv(200, 100.0, 0.02, 13);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        HmmForecaster::from_history(ForecasterConfig::new("TEST"), history, small_params())
            .unwrap()
    }

    #[test]
    fn test_em_improves_likelihood() {
        let series = generate_ohlcv(150, 100.0, 0.02, 3);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let (o, h, l, c) = history.ohlc().unwrap();
        let features = feature_matrix(&o, &h, &l, &c);
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = GaussianHmm::init(&features, 3, &mut rng).unwrap();
        let first = model.em_step(&features);
        for _ in 0..5 {
            model.em_step(&features);
        }
        let later = model.log_likelihood(&features);
        assert!(later >= first, "first={} later={}", first, later);
    }

    #[test]
    fn test_forecast_band_is_two_percent() {
        let mut model = fitted();
        let result = model.forecast(3).unwrap();
        for p in result.points() {
            assert!((p.lower - p.predicted * 0.98).abs() < 1e-9);
            assert!((p.upper - p.predicted * 1.02).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forecast_is_reproducible() {
        let mut a = fitted();
        let mut b = fitted();
        assert_eq!(a.forecast(3).unwrap(), b.forecast(3).unwrap());
    }

    #[test]
    fn test_too_few_bars_rejected() {
        let series = generate_ohlcv(30, 100.0, 0.02, 3);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result =
            HmmForecaster::from_history(ForecasterConfig::new("TEST"), history, small_params());
        assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    }
}
