//! Random forest classifier over bootstrap samples

use super::tree::{RegressionTree, TreeParams};
use super::ProbabilityClassifier;
use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForestClassifier {
    pub fn new(n_trees: usize, max_depth: usize, seed: u64) -> Self {
        Self {
            n_trees,
            max_depth,
            seed,
            trees: Vec::new(),
        }
    }
}

impl ProbabilityClassifier for RandomForestClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "forest needs matching non-empty X and y".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_features = x[0].len();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: 2,
            // sqrt(k) feature subsampling decorrelates the trees
            max_features: Some(((n_features as f64).sqrt().ceil() as usize).max(1)),
        };

        self.trees.clear();
        for _ in 0..self.n_trees {
            let indices: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
            let boot_x: Vec<Vec<f64>> = indices.iter().map(|&i| x[i].clone()).collect();
            let boot_y: Vec<f64> = indices.iter().map(|&i| y[i]).collect();
            self.trees
                .push(RegressionTree::fit(&boot_x, &boot_y, &params, &mut rng)?);
        }
        Ok(())
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let mean = self
            .trees
            .iter()
            .map(|tree| tree.predict(row))
            .sum::<f64>()
            / self.trees.len() as f64;
        mean.clamp(0.0, 1.0)
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}
