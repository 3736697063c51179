//! Minimal tree and linear learners used by the volatility and direction
//! models. Feature matrices are row-major `Vec<Vec<f64>>`; binary targets
//! are encoded 0.0/1.0.

mod boosting;
mod forest;
mod logistic;
mod tree;

pub use boosting::{AdaBoostClassifier, GradientBoostingClassifier, GradientBoostingRegressor};
pub use forest::RandomForestClassifier;
pub use logistic::LogisticRegression;
pub use tree::{RegressionTree, TreeParams};

use crate::error::Result;

/// A fitted binary classifier that scores the positive class
pub trait ProbabilityClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;

    /// Probability of the positive class for one feature row
    fn predict_proba(&self, row: &[f64]) -> f64;

    fn predict_proba_batch(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_proba(row)).collect()
    }

    fn name(&self) -> &'static str;
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
