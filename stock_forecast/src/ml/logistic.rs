//! L2-regularized logistic regression fit by gradient descent

use super::{sigmoid, ProbabilityClassifier};
use crate::error::{ForecastError, Result};
use crate::stats;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    weights: Vec<f64>,
    bias: f64,
    /// Per-feature standardization parameters captured at fit time
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-3,
            weights: Vec::new(),
            bias: 0.0,
            means: Vec::new(),
            stds: Vec::new(),
        }
    }
}

impl LogisticRegression {
    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, v)| (v - self.means[j]) / self.stds[j])
            .collect()
    }
}

impl ProbabilityClassifier for LogisticRegression {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "logistic regression needs matching non-empty X and y".to_string(),
            ));
        }
        let n = x.len();
        let k = x[0].len();

        self.means = (0..k)
            .map(|j| stats::mean(&x.iter().map(|row| row[j]).collect::<Vec<_>>()))
            .collect();
        self.stds = (0..k)
            .map(|j| {
                let s = stats::std_dev(&x.iter().map(|row| row[j]).collect::<Vec<_>>());
                if s > f64::EPSILON {
                    s
                } else {
                    1.0
                }
            })
            .collect();

        let standardized: Vec<Vec<f64>> = x.iter().map(|row| self.standardize(row)).collect();

        self.weights = vec![0.0; k];
        self.bias = 0.0;

        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; k];
            let mut grad_b = 0.0;
            for (row, target) in standardized.iter().zip(y) {
                let z = self.bias
                    + row
                        .iter()
                        .zip(&self.weights)
                        .map(|(v, w)| v * w)
                        .sum::<f64>();
                let err = sigmoid(z) - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * (g / n as f64 + self.l2 * *w);
            }
            self.bias -= self.learning_rate * grad_b / n as f64;
        }
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.weights.is_empty() {
            return 0.5;
        }
        let standardized = self.standardize(row);
        let z = self.bias
            + standardized
                .iter()
                .zip(&self.weights)
                .map(|(v, w)| v * w)
                .sum::<f64>();
        sigmoid(z)
    }

    fn name(&self) -> &'static str {
        "logistic_regression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic_learns_threshold() {
        let x: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64 / 10.0]).collect();
        let y: Vec<f64> = (0..200).map(|i| if i < 100 { 0.0 } else { 1.0 }).collect();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        assert!(model.predict_proba(&[2.0]) < 0.3);
        assert!(model.predict_proba(&[18.0]) > 0.7);
    }

    #[test]
    fn test_constant_feature_does_not_blow_up() {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        let p = model.predict_proba(&[1.0, 25.0]);
        assert!(p.is_finite());
    }
}
