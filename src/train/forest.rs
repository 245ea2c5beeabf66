/// Random forest regression via smartcore.
///
/// Trees are bagged with a fixed seed so a retrain on the same window
/// reproduces the same forest. The fitted trees are shared behind an `Arc`
/// and never mutated.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::model::PipelineError;
use crate::train::ridge::design_matrix;

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub params: ForestParams,
    pub feature_count: usize,
    forest: Arc<Forest>,
}

fn forest_err(e: impl fmt::Display) -> PipelineError {
    PipelineError::Validation(format!("random forest: {}", e))
}

impl ForestModel {
    /// Fit on row-major `inputs` against `targets`.
    pub fn fit(inputs: &[Vec<f64>], targets: &[f64], params: ForestParams) -> Result<Self, PipelineError> {
        if params.n_trees == 0 {
            return Err(forest_err("n_trees must be at least 1"));
        }
        // same shape and finiteness checks as the ridge fit
        let (records, _) = design_matrix(inputs, targets)?;

        let x = DenseMatrix::from_2d_vec(&inputs.to_vec());
        let y = targets.to_vec();
        let parameters = RandomForestRegressorParameters::default()
            .with_n_trees(params.n_trees)
            .with_max_depth(params.max_depth)
            .with_min_samples_leaf(params.min_samples_leaf)
            .with_seed(params.seed);
        let forest = RandomForestRegressor::fit(&x, &y, parameters).map_err(forest_err)?;

        Ok(Self {
            params,
            feature_count: records.ncols(),
            forest: Arc::new(forest),
        })
    }

    /// Predictions for many rows at once.
    pub fn predict_batch(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = inputs.iter().find(|row| row.len() != self.feature_count) {
            return Err(PipelineError::Validation(format!(
                "model expects {} features, got {}",
                self.feature_count,
                bad.len()
            )));
        }
        let x = DenseMatrix::from_2d_vec(&inputs.to_vec());
        self.forest.predict(&x).map_err(forest_err)
    }

    pub fn predict(&self, input: &[f64]) -> Result<f64, PipelineError> {
        self.predict_batch(&[input.to_vec()])?
            .pop()
            .ok_or_else(|| forest_err("empty prediction"))
    }
}

impl fmt::Debug for ForestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForestModel")
            .field("params", &self.params)
            .field("feature_count", &self.feature_count)
            .finish_non_exhaustive()
    }
}

/// Two forests are equal when they serialise identically.
impl PartialEq for ForestModel {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
            && self.feature_count == other.feature_count
            && (Arc::ptr_eq(&self.forest, &other.forest)
                || serde_json::to_value(&*self.forest).ok() == serde_json::to_value(&*other.forest).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ForestParams {
        ForestParams {
            n_trees: 20,
            max_depth: 6,
            ..ForestParams::default()
        }
    }

    /// y = 10 for x < 5, 50 otherwise: a step no linear model fits.
    fn step() -> (Vec<Vec<f64>>, Vec<f64>) {
        let inputs: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 4.0, (i % 3) as f64]).collect();
        let targets = inputs.iter().map(|r| if r[0] < 5.0 { 10.0 } else { 50.0 }).collect();
        (inputs, targets)
    }

    #[test]
    fn test_learns_a_step() {
        let (inputs, targets) = step();
        let model = ForestModel::fit(&inputs, &targets, small()).unwrap();
        assert!((model.predict(&[1.0, 0.0]).unwrap() - 10.0).abs() < 5.0);
        assert!((model.predict(&[9.0, 1.0]).unwrap() - 50.0).abs() < 5.0);
        assert_eq!(model.feature_count, 2);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let (inputs, targets) = step();
        let a = ForestModel::fit(&inputs, &targets, small()).unwrap();
        let b = ForestModel::fit(&inputs, &targets, small()).unwrap();
        let queries = vec![vec![4.8, 2.0], vec![5.2, 0.0]];
        assert_eq!(a.predict_batch(&queries).unwrap(), b.predict_batch(&queries).unwrap());
    }

    #[test]
    fn test_survives_json_round_trip() {
        let (inputs, targets) = step();
        let model = ForestModel::fit(&inputs, &targets, small()).unwrap();
        let text = serde_json::to_string(&model).unwrap();
        let back: ForestModel = serde_json::from_str(&text).unwrap();
        assert_eq!(back.predict(&[7.0, 1.0]).unwrap(), model.predict(&[7.0, 1.0]).unwrap());
        assert_eq!(back, model);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (inputs, targets) = step();
        assert!(ForestModel::fit(&[], &[], small()).is_err());
        assert!(ForestModel::fit(&inputs, &targets[1..], small()).is_err());
        let none = ForestParams { n_trees: 0, ..small() };
        assert!(ForestModel::fit(&inputs, &targets, none).is_err());

        let model = ForestModel::fit(&inputs, &targets, small()).unwrap();
        assert!(model.predict(&[1.0]).is_err());
    }
}
