//! LSTM forecaster
//!
//! The target column is min-max scaled to [0, 1] and cut into fixed-length
//! supervised windows. A stack of LSTM cells with seeded random weights
//! encodes each window; the recurrent weights are fixed random projections
//! and never updated. Only the linear head on the final hidden state is
//! trained, by minibatch SGD on MSE with gradient-norm clipping.
//! Forecasting rolls the network forward autoregressively; the band is a
//! fixed fraction applied in the scaled domain before the inverse transform.

use crate::error::{ForecastError, Result};
use crate::forecast::{ForecastPoint, ForecastResult};
use crate::forecaster::{
    load_history, validate_horizon, Forecaster, ForecasterConfig, LoadedHistory,
};
use market_data::calendar::business_days_after;
use market_data::MarketDataProvider;
use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

const BAND_FRACTION: f64 = 0.02;
/// Per-batch gradient norm cap for the head updates
const GRAD_CLIP: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct LstmParams {
    pub lookback: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for LstmParams {
    fn default() -> Self {
        Self {
            lookback: 30,
            hidden_size: 50,
            num_layers: 2,
            epochs: 15,
            batch_size: 16,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// One LSTM layer with the standard four gates
#[derive(Debug, Clone)]
struct LstmCell {
    w_ii: Array2<f64>,
    w_hi: Array2<f64>,
    b_i: Array1<f64>,
    w_if: Array2<f64>,
    w_hf: Array2<f64>,
    b_f: Array1<f64>,
    w_ig: Array2<f64>,
    w_hg: Array2<f64>,
    b_g: Array1<f64>,
    w_io: Array2<f64>,
    w_ho: Array2<f64>,
    b_o: Array1<f64>,
    hidden_size: usize,
}

impl LstmCell {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let dist = Uniform::new(-limit, limit);
        let ih = |rng: &mut StdRng| Array2::random_using((hidden_size, input_size), dist, rng);
        let hh = |rng: &mut StdRng| Array2::random_using((hidden_size, hidden_size), dist, rng);

        Self {
            w_ii: ih(rng),
            w_hi: hh(rng),
            b_i: Array1::zeros(hidden_size),
            w_if: ih(rng),
            w_hf: hh(rng),
            // Forget gate biased open so early training keeps memory
            b_f: Array1::ones(hidden_size),
            w_ig: ih(rng),
            w_hg: hh(rng),
            b_g: Array1::zeros(hidden_size),
            w_io: ih(rng),
            w_ho: hh(rng),
            b_o: Array1::zeros(hidden_size),
            hidden_size,
        }
    }

    fn forward(
        &self,
        x: &Array1<f64>,
        h_prev: &Array1<f64>,
        c_prev: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let i = (self.w_ii.dot(x) + self.w_hi.dot(h_prev) + &self.b_i).mapv(sigmoid);
        let f = (self.w_if.dot(x) + self.w_hf.dot(h_prev) + &self.b_f).mapv(sigmoid);
        let g = (self.w_ig.dot(x) + self.w_hg.dot(h_prev) + &self.b_g).mapv(f64::tanh);
        let o = (self.w_io.dot(x) + self.w_ho.dot(h_prev) + &self.b_o).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let h = &o * &c.mapv(f64::tanh);
        (h, c)
    }

    fn init_state(&self) -> (Array1<f64>, Array1<f64>) {
        (
            Array1::zeros(self.hidden_size),
            Array1::zeros(self.hidden_size),
        )
    }
}

/// Min-max scaler captured from the training series
#[derive(Debug, Clone, Copy)]
struct MinMaxScaler {
    min: f64,
    max: f64,
}

impl MinMaxScaler {
    fn fit(data: &[f64]) -> Result<Self> {
        let min = data.iter().copied().fold(f64::MAX, f64::min);
        let max = data.iter().copied().fold(f64::MIN, f64::max);
        if !(max - min).is_finite() || max - min < f64::EPSILON {
            return Err(ForecastError::Numerical(
                "target has no spread to scale".to_string(),
            ));
        }
        Ok(Self { min, max })
    }

    fn transform(&self, v: f64) -> f64 {
        (v - self.min) / (self.max - self.min)
    }

    fn inverse(&self, v: f64) -> f64 {
        self.min + v * (self.max - self.min)
    }
}

pub struct LstmForecaster {
    config: ForecasterConfig,
    params: LstmParams,
    history: LoadedHistory,
    cells: Vec<LstmCell>,
    head_weights: Array1<f64>,
    head_bias: f64,
    scaler: MinMaxScaler,
    scaled: Vec<f64>,
    training_loss: Vec<f64>,
    last: Option<ForecastResult>,
}

impl LstmForecaster {
    pub fn new(provider: &dyn MarketDataProvider, config: ForecasterConfig) -> Result<Self> {
        let history = load_history(provider, &config)?;
        Self::from_history(config, history, LstmParams::default())
    }

    pub fn from_history(
        config: ForecasterConfig,
        history: LoadedHistory,
        params: LstmParams,
    ) -> Result<Self> {
        let n = history.target.len();
        if n < params.lookback + 30 {
            return Err(ForecastError::InsufficientData(format!(
                "LSTM needs at least {} observations, got {}",
                params.lookback + 30,
                n
            )));
        }

        let scaler = MinMaxScaler::fit(&history.target)?;
        let scaled: Vec<f64> = history.target.iter().map(|v| scaler.transform(*v)).collect();

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut cells = Vec::with_capacity(params.num_layers);
        for layer in 0..params.num_layers {
            let input_size = if layer == 0 { 1 } else { params.hidden_size };
            cells.push(LstmCell::new(input_size, params.hidden_size, &mut rng));
        }

        let mut model = Self {
            config,
            params,
            history,
            cells,
            head_weights: Array1::zeros(0),
            head_bias: 0.0,
            scaler,
            scaled,
            training_loss: Vec::new(),
            last: None,
        };
        model.train(&mut rng)?;
        Ok(model)
    }

    /// Final hidden state of the stack for one scaled window
    fn encode(&self, window: &[f64]) -> Array1<f64> {
        let mut states: Vec<(Array1<f64>, Array1<f64>)> =
            self.cells.iter().map(LstmCell::init_state).collect();
        for &value in window {
            let mut layer_input = Array1::from_vec(vec![value]);
            for (idx, cell) in self.cells.iter().enumerate() {
                let (h_prev, c_prev) = &states[idx];
                let (h, c) = cell.forward(&layer_input, h_prev, c_prev);
                layer_input = h.clone();
                states[idx] = (h, c);
            }
        }
        states
            .last()
            .map(|(h, _)| h.clone())
            .unwrap_or_else(|| Array1::zeros(self.params.hidden_size))
    }

    /// Minibatch SGD on the linear head over precomputed encodings.
    /// The recurrent weights stay at their seeded initialization.
    fn train(&mut self, rng: &mut StdRng) -> Result<()> {
        let lookback = self.params.lookback;
        let n_windows = self.scaled.len() - lookback;

        let encodings: Vec<Array1<f64>> = (0..n_windows)
            .map(|i| self.encode(&self.scaled[i..i + lookback]))
            .collect();
        let targets: Vec<f64> = (0..n_windows).map(|i| self.scaled[i + lookback]).collect();

        self.head_weights = Array1::zeros(self.params.hidden_size);
        self.head_bias = targets.iter().sum::<f64>() / targets.len() as f64;

        let mut order: Vec<usize> = (0..n_windows).collect();
        for epoch in 0..self.params.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(self.params.batch_size) {
                let mut grad_w = Array1::<f64>::zeros(self.params.hidden_size);
                let mut grad_b = 0.0;
                for &i in chunk {
                    let pred = self.head_weights.dot(&encodings[i]) + self.head_bias;
                    let err = pred - targets[i];
                    epoch_loss += err * err;
                    grad_w = grad_w + &encodings[i] * err;
                    grad_b += err;
                }
                let scale = 2.0 / chunk.len() as f64;
                let mut grad_w = grad_w * scale;
                let mut grad_b = grad_b * scale;
                let norm = (grad_w.dot(&grad_w) + grad_b * grad_b).sqrt();
                if norm > GRAD_CLIP {
                    let shrink = GRAD_CLIP / norm;
                    grad_w = grad_w * shrink;
                    grad_b *= shrink;
                }
                self.head_weights = &self.head_weights - &(grad_w * self.params.learning_rate);
                self.head_bias -= self.params.learning_rate * grad_b;
            }
            let avg = epoch_loss / n_windows as f64;
            debug!(epoch, loss = avg, "LSTM epoch");
            self.training_loss.push(avg);
        }

        info!(
            symbol = %self.config.symbol,
            windows = n_windows,
            final_loss = self.training_loss.last().copied().unwrap_or(f64::NAN),
            "LSTM trained"
        );
        Ok(())
    }

    fn predict_scaled(&self, window: &[f64]) -> f64 {
        let encoding = self.encode(window);
        self.head_weights.dot(&encoding) + self.head_bias
    }

    pub fn training_loss(&self) -> &[f64] {
        &self.training_loss
    }
}

impl Forecaster for LstmForecaster {
    fn name(&self) -> &'static str {
        "lstm"
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn forecast(&mut self, horizon_days: usize) -> Result<ForecastResult> {
        validate_horizon(horizon_days)?;
        let lookback = self.params.lookback;
        let mut window = self.scaled[self.scaled.len() - lookback..].to_vec();

        let dates = business_days_after(self.history.last_date, horizon_days);
        let mut points = Vec::with_capacity(horizon_days);
        for date in dates {
            let scaled_pred = self.predict_scaled(&window);
            let spread = BAND_FRACTION * scaled_pred.abs();
            points.push(ForecastPoint {
                date,
                predicted: self.scaler.inverse(scaled_pred),
                lower: self.scaler.inverse(scaled_pred - spread),
                upper: self.scaler.inverse(scaled_pred + spread),
            });
            window.remove(0);
            window.push(scaled_pred);
        }

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

    fn small_params() -> LstmParams {
        LstmParams {
            lookback: 10,
            hidden_size: 12,
            num_layers: 2,
            epochs: 20,
            batch_size: 16,
            learning_rate: 0.05,
            seed: 7,
        }
    }

    fn fitted() -> LstmForecaster {
        let series = generate_ohlcv(150, 100.0, 0.015, 19);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        LstmForecaster::from_history(ForecasterConfig::new("TEST"), history, small_params())
            .unwrap()
    }

    #[test]
    fn test_training_reduces_loss() {
        let model = fitted();
        let losses = model.training_loss();
        assert!(losses.len() >= 2);
        assert!(
            losses.last().unwrap() < losses.first().unwrap(),
            "first={} last={}",
            losses.first().unwrap(),
            losses.last().unwrap()
        );
    }

    #[test]
    fn test_same_seed_same_forecast() {
        let mut a = fitted();
        let mut b = fitted();
        assert_eq!(a.forecast(5).unwrap(), b.forecast(5).unwrap());
    }

    #[test]
    fn test_aggressive_learning_rate_stays_finite() {
        // Clipped gradients keep the head from diverging even at an
        // absurd step size
        let params = LstmParams {
            learning_rate: 50.0,
            ..small_params()
        };
        let series = generate_ohlcv(150, 100.0, 0.015, 19);
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let model =
            LstmForecaster::from_history(ForecasterConfig::new("TEST"), history, params).unwrap();
        assert!(model.training_loss().iter().all(|l| l.is_finite()));
        assert!(model.head_weights.iter().all(|w| w.is_finite()));
        assert!(model.head_bias.is_finite());
    }

    #[test]
    fn test_forecast_stays_bracketed() {
        let mut model = fitted();
        let result = model.forecast(7).unwrap();
        assert_eq!(result.horizon(), 7);
        for p in result.points() {
            assert!(p.lower <= p.predicted && p.predicted <= p.upper);
        }
    }

    #[test]
    fn test_flat_series_rejected() {
        let dates = market_data::calendar::business_days_after(
            chrono::NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            80,
        );
        let series = market_data::TimeSeries::new(
            dates,
            vec![
                ("Open".to_string(), vec![100.0; 80]),
                ("High".to_string(), vec![100.0; 80]),
                ("Low".to_string(), vec![100.0; 80]),
                ("Close".to_string(), vec![100.0; 80]),
                ("Volume".to_string(), vec![1000.0; 80]),
            ],
        )
        .unwrap();
        let history = LoadedHistory::from_series(series, "Close").unwrap();
        let result =
            LstmForecaster::from_history(ForecasterConfig::new("TEST"), history, small_params());
        assert!(result.is_err());
    }
}
