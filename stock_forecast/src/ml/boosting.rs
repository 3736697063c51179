//! Gradient and adaptive boosting over shallow regression trees

use super::tree::{RegressionTree, TreeParams};
use super::{sigmoid, ProbabilityClassifier};
use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Gradient-boosted regression trees (squared loss)
#[derive(Debug, Clone)]
pub struct GradientBoostingRegressor {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled (without replacement) per round
    pub subsample: f64,
    pub seed: u64,
    base: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingRegressor {
    pub fn new(
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
        subsample: f64,
        seed: u64,
    ) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            subsample,
            seed,
            base: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "boosting needs matching non-empty X and y".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: 2,
            max_features: None,
        };

        self.base = y.iter().sum::<f64>() / y.len() as f64;
        self.trees.clear();
        let mut predictions = vec![self.base; y.len()];

        let sample_size = ((x.len() as f64 * self.subsample).round() as usize).clamp(2, x.len());
        let mut all_indices: Vec<usize> = (0..x.len()).collect();

        for _ in 0..self.n_estimators {
            all_indices.shuffle(&mut rng);
            let chosen = &all_indices[..sample_size];

            let sub_x: Vec<Vec<f64>> = chosen.iter().map(|&i| x[i].clone()).collect();
            let residuals: Vec<f64> = chosen.iter().map(|&i| y[i] - predictions[i]).collect();

            let tree = RegressionTree::fit(&sub_x, &residuals, &params, &mut rng)?;
            for (i, pred) in predictions.iter_mut().enumerate() {
                *pred += self.learning_rate * tree.predict(&x[i]);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|tree| tree.predict(row))
                    .sum::<f64>()
    }

    pub fn predict_batch(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict(row)).collect()
    }

    /// Per-feature squared-error reduction, normalized to sum to one
    pub fn feature_importances(&self) -> Vec<f64> {
        let n_features = self.trees.first().map_or(0, RegressionTree::n_features);
        let mut totals = vec![0.0; n_features];
        for tree in &self.trees {
            for (t, imp) in totals.iter_mut().zip(tree.feature_importances()) {
                *t += imp;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for t in &mut totals {
                *t /= sum;
            }
        }
        totals
    }
}

/// Gradient boosting on the logistic loss
#[derive(Debug, Clone)]
pub struct GradientBoostingClassifier {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub seed: u64,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingClassifier {
    pub fn new(n_estimators: usize, learning_rate: f64, max_depth: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            seed,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }
}

impl ProbabilityClassifier for GradientBoostingClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "boosting needs matching non-empty X and y".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: 2,
            max_features: None,
        };

        let pos_rate = (y.iter().sum::<f64>() / y.len() as f64).clamp(1e-4, 1.0 - 1e-4);
        self.base_score = (pos_rate / (1.0 - pos_rate)).ln();
        self.trees.clear();

        let mut scores = vec![self.base_score; y.len()];
        for _ in 0..self.n_estimators {
            // Negative gradient of the log loss
            let residuals: Vec<f64> = scores
                .iter()
                .zip(y)
                .map(|(s, target)| target - sigmoid(*s))
                .collect();
            let tree = RegressionTree::fit(x, &residuals, &params, &mut rng)?;
            for (i, score) in scores.iter_mut().enumerate() {
                *score += self.learning_rate * tree.predict(&x[i]);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        let score = self.base_score
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|tree| tree.predict(row))
                    .sum::<f64>();
        sigmoid(score)
    }

    fn name(&self) -> &'static str {
        "gradient_boosting"
    }
}

/// AdaBoost over decision stumps with reweighted samples
#[derive(Debug, Clone, Default)]
pub struct AdaBoostClassifier {
    pub n_estimators: usize,
    stumps: Vec<Stump>,
}

#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    threshold: f64,
    /// +1.0 when values above the threshold vote positive
    polarity: f64,
    alpha: f64,
}

impl Stump {
    fn classify(&self, row: &[f64]) -> f64 {
        let value = row.get(self.feature).copied().unwrap_or(0.0);
        if value > self.threshold {
            self.polarity
        } else {
            -self.polarity
        }
    }
}

impl AdaBoostClassifier {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            stumps: Vec::new(),
        }
    }

    fn best_stump(x: &[Vec<f64>], targets: &[f64], weights: &[f64]) -> Option<(Stump, f64)> {
        let n_features = x[0].len();
        let mut best: Option<(Stump, f64)> = None;

        for feature in 0..n_features {
            let mut values: Vec<f64> = x
                .iter()
                .map(|row| row[feature])
                .filter(|v| v.is_finite())
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            let step = (values.len() / 24).max(1);

            for pair in values.windows(2).step_by(step) {
                let threshold = (pair[0] + pair[1]) / 2.0;
                for polarity in [1.0, -1.0] {
                    let error: f64 = x
                        .iter()
                        .zip(targets)
                        .zip(weights)
                        .map(|((row, target), w)| {
                            let vote = if row[feature] > threshold {
                                polarity
                            } else {
                                -polarity
                            };
                            if vote != *target {
                                *w
                            } else {
                                0.0
                            }
                        })
                        .sum();
                    if best.as_ref().map_or(true, |(_, e)| error < *e) {
                        best = Some((
                            Stump {
                                feature,
                                threshold,
                                polarity,
                                alpha: 0.0,
                            },
                            error,
                        ));
                    }
                }
            }
        }
        best
    }
}

impl ProbabilityClassifier for AdaBoostClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "boosting needs matching non-empty X and y".to_string(),
            ));
        }
        // Targets in {-1, +1}
        let targets: Vec<f64> = y.iter().map(|v| if *v > 0.5 { 1.0 } else { -1.0 }).collect();
        let mut weights = vec![1.0 / x.len() as f64; x.len()];
        self.stumps.clear();

        for _ in 0..self.n_estimators {
            let (mut stump, error) = match Self::best_stump(x, &targets, &weights) {
                Some(found) => found,
                None => break,
            };
            let error = error.clamp(1e-10, 1.0 - 1e-10);
            if error >= 0.5 {
                break;
            }
            stump.alpha = 0.5 * ((1.0 - error) / error).ln();

            let mut total = 0.0;
            for ((row, target), w) in x.iter().zip(&targets).zip(weights.iter_mut()) {
                *w *= (-stump.alpha * target * stump.classify(row)).exp();
                total += *w;
            }
            for w in &mut weights {
                *w /= total;
            }
            self.stumps.push(stump);
        }

        if self.stumps.is_empty() {
            return Err(ForecastError::NoViableModel(
                "adaboost found no informative stump".to_string(),
            ));
        }
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        let margin: f64 = self
            .stumps
            .iter()
            .map(|stump| stump.alpha * stump.classify(row))
            .sum();
        sigmoid(2.0 * margin)
    }

    fn name(&self) -> &'static str {
        "adaboost"
    }
}
