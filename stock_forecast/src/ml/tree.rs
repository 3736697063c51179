//! Depth-limited regression tree with variance-reduction splits

use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const MAX_THRESHOLDS_PER_FEATURE: usize = 16;

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Number of features considered per split; `None` means all
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_leaf: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: Node,
    n_features: usize,
    importances: Vec<f64>,
}

impl RegressionTree {
    /// Fit a tree on row-major features. The RNG drives feature
    /// subsampling when `max_features` is set.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &TreeParams, rng: &mut StdRng) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ForecastError::InsufficientData(
                "tree needs matching non-empty X and y".to_string(),
            ));
        }
        let n_features = x[0].len();
        let indices: Vec<usize> = (0..x.len()).collect();
        let mut importances = vec![0.0; n_features];
        let root = build_node(x, y, &indices, params, 0, rng, &mut importances);
        Ok(Self {
            root,
            n_features,
            importances,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row.get(*feature).copied().unwrap_or(0.0) <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Total squared-error reduction attributed to each feature
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn node_mean(y: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn node_sse(y: &[f64], indices: &[usize]) -> f64 {
    let m = node_mean(y, indices);
    indices.iter().map(|&i| (y[i] - m).powi(2)).sum()
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    params: &TreeParams,
    depth: usize,
    rng: &mut StdRng,
    importances: &mut [f64],
) -> Node {
    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf {
        return Node::Leaf(node_mean(y, indices));
    }

    let n_features = x[0].len();
    let mut features: Vec<usize> = (0..n_features).collect();
    if let Some(k) = params.max_features {
        features.shuffle(rng);
        features.truncate(k.clamp(1, n_features));
    }

    let parent_sse = node_sse(y, indices);
    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, child_sse)

    for &feature in &features {
        let mut values: Vec<f64> = indices
            .iter()
            .map(|&i| x[i][feature])
            .filter(|v| v.is_finite())
            .collect();
        if values.len() < 2 {
            continue;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        if values.len() < 2 {
            continue;
        }

        let step = (values.len() / MAX_THRESHOLDS_PER_FEATURE).max(1);
        for pair in values.windows(2).step_by(step) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[i][feature] <= threshold);
            if left.len() < params.min_samples_leaf || right.len() < params.min_samples_leaf {
                continue;
            }
            let child_sse = node_sse(y, &left) + node_sse(y, &right);
            if best.map_or(true, |(_, _, sse)| child_sse < sse) {
                best = Some((feature, threshold, child_sse));
            }
        }
    }

    match best {
        Some((feature, threshold, child_sse)) if child_sse < parent_sse => {
            importances[feature] += parent_sse - child_sse;
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[i][feature] <= threshold);
            Node::Split {
                feature,
                threshold,
                left: Box::new(build_node(
                    x, y, &left_idx, params, depth + 1, rng, importances,
                )),
                right: Box::new(build_node(
                    x, y, &right_idx, params, depth + 1, rng, importances,
                )),
            }
        }
        _ => Node::Leaf(node_mean(y, indices)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;

    #[test]
    fn test_tree_fits_step_function() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..100).map(|i| if i < 50 { 1.0 } else { 5.0 }).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &y, &TreeParams::default(), &mut rng).unwrap();
        assert_approx_eq!(tree.predict(&[10.0]), 1.0, 1e-9);
        assert_approx_eq!(tree.predict(&[90.0]), 5.0, 1e-9);
    }

    #[test]
    fn test_importance_lands_on_signal_feature() {
        // Feature 1 carries the signal, feature 0 is constant
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..60).map(|i| if i < 30 { 0.0 } else { 2.0 }).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &y, &TreeParams::default(), &mut rng).unwrap();
        let imp = tree.feature_importances();
        assert!(imp[1] > imp[0]);
    }

    #[test]
    fn test_empty_input_is_error() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(RegressionTree::fit(&[], &[], &TreeParams::default(), &mut rng).is_err());
    }
}
