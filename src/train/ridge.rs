/// Ridge regression.
///
/// Inputs are standardised per column with `ndarray` before fitting; the
/// stored means and standard deviations are applied again at prediction
/// time, so callers always pass raw feature values. The fit itself is
/// linfa's elastic net with `l1_ratio = 0`, which is ridge with the penalty
/// scaled by the sample count. The intercept is not penalised.

use linfa::Dataset;
use linfa::traits::Fit;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::model::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub alpha: f64,
    pub intercept: f64,
    /// Coefficients in standardised feature space.
    pub coefficients: Vec<f64>,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

/// Columns with (near) zero spread are left unscaled.
const MIN_STD: f64 = 1e-12;
const TOLERANCE: f64 = 1e-10;
const MAX_ITERATIONS: u32 = 100_000;

/// Row-major input rows as an `n × width` matrix, rejecting ragged or
/// non-finite data.
pub fn design_matrix(inputs: &[Vec<f64>], targets: &[f64]) -> Result<(Array2<f64>, Array1<f64>), PipelineError> {
    let n = inputs.len();
    if n == 0 || n != targets.len() {
        return Err(PipelineError::Validation(format!(
            "fit needs matching non-empty inputs and targets ({} vs {})",
            n,
            targets.len()
        )));
    }
    let width = inputs[0].len();
    if width == 0 || inputs.iter().any(|row| row.len() != width) {
        return Err(PipelineError::Validation("ragged input matrix".to_string()));
    }
    if inputs.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
        return Err(PipelineError::Validation("non-finite value in training data".to_string()));
    }

    let flat: Vec<f64> = inputs.iter().flatten().copied().collect();
    let records = Array2::from_shape_vec((n, width), flat)
        .map_err(|e| PipelineError::Validation(e.to_string()))?;
    Ok((records, Array1::from(targets.to_vec())))
}

impl RidgeModel {
    /// Fit on row-major `inputs` against `targets`.
    pub fn fit(inputs: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<Self, PipelineError> {
        if !(alpha >= 0.0) {
            return Err(PipelineError::Validation(format!("ridge alpha must be >= 0, got {}", alpha)));
        }
        let (records, y) = design_matrix(inputs, targets)?;
        let n = records.nrows() as f64;

        let means = records
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::Validation("empty design matrix".to_string()))?;
        let stds = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < MIN_STD { 1.0 } else { s });
        let scaled = (&records - &means) / &stds;

        let dataset = Dataset::new(scaled, y);
        let fitted = ElasticNet::params()
            .penalty(alpha / n)
            .l1_ratio(0.0)
            .with_intercept(true)
            .tolerance(TOLERANCE)
            .max_iterations(MAX_ITERATIONS)
            .fit(&dataset)
            .map_err(|e| PipelineError::Validation(format!("ridge fit failed: {}", e)))?;

        let coefficients = fitted.hyperplane().to_vec();
        if coefficients.iter().any(|w| !w.is_finite()) || !fitted.intercept().is_finite() {
            return Err(PipelineError::Validation(
                "ridge fit diverged; raise training.ridge_alpha".to_string(),
            ));
        }

        Ok(Self {
            alpha,
            intercept: fitted.intercept(),
            coefficients,
            feature_means: means.to_vec(),
            feature_stds: stds.to_vec(),
        })
    }

    pub fn predict(&self, input: &[f64]) -> Result<f64, PipelineError> {
        if input.len() != self.coefficients.len() {
            return Err(PipelineError::Validation(format!(
                "model expects {} features, got {}",
                self.coefficients.len(),
                input.len()
            )));
        }
        let x = ArrayView1::from(input);
        let means = ArrayView1::from(&self.feature_means[..]);
        let stds = ArrayView1::from(&self.feature_stds[..]);
        let weights = ArrayView1::from(&self.coefficients[..]);
        Ok(self.intercept + ((&x - &means) / &stds).dot(&weights))
    }
}
