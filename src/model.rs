//! Ridge-regularised linear regression over model-ready frames, plus the
//! accuracy metrics logged for each training run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MODEL_TYPE: &str = "RidgeLinearRegression";
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("l2 penalty must be finite and >= 0, got {0}")]
    InvalidPenalty(f64),
    #[error("normal equations are singular; add an l2 penalty or drop collinear columns")]
    Singular,
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("feature columns differ from the fitted model: expected {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("model artifact is not valid JSON: {0}")]
    Artifact(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub l2: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { l2: 1e-3 }
    }
}

/// Fitted coefficients in raw feature units, tagged with the transform schema
/// the features were built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub l2: f64,
    pub schema_version: u32,
    pub schema_fingerprint: String,
}

impl LinearModel {
    pub fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() != self.coefficients.len() {
            return Err(ModelError::DimensionMismatch {
                context: "prediction row",
                expected: self.coefficients.len(),
                actual: row.len(),
            });
        }
        Ok(self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(beta, x)| beta * x)
                .sum::<f64>())
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Rejects a serving layout that differs from the one the model was fitted on.
    pub fn check_features(&self, names: &[String]) -> Result<(), ModelError> {
        if names != self.feature_names.as_slice() {
            return Err(ModelError::FeatureMismatch {
                expected: self.feature_names.clone(),
                actual: names.to_vec(),
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mape: f64,
    pub accuracy: f64,
}

/// Fits `y ≈ intercept + Σ βⱼ xⱼ` by solving the standardised normal equations
/// `(ZᵀZ/n + λI) w = Zᵀ(y - ȳ)/n`, then maps `w` back to raw units.
pub fn fit_ridge(
    feature_names: &[String],
    x: &[Vec<f64>],
    y: &[f64],
    cfg: &FitConfig,
    schema_version: u32,
    schema_fingerprint: &str,
) -> Result<LinearModel, ModelError> {
    if x.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if y.len() != x.len() {
        return Err(ModelError::DimensionMismatch {
            context: "target length",
            expected: x.len(),
            actual: y.len(),
        });
    }
    if !cfg.l2.is_finite() || cfg.l2 < 0.0 {
        return Err(ModelError::InvalidPenalty(cfg.l2));
    }

    let p = feature_names.len();
    for row in x {
        if row.len() != p {
            return Err(ModelError::DimensionMismatch {
                context: "feature row",
                expected: p,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("features"));
        }
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("target"));
    }

    let n = x.len() as f64;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut means = vec![0.0; p];
    for row in x {
        for (mean, value) in means.iter_mut().zip(row) {
            *mean += value;
        }
    }
    for mean in &mut means {
        *mean /= n;
    }

    let mut scales = vec![0.0; p];
    for row in x {
        for j in 0..p {
            let d = row[j] - means[j];
            scales[j] += d * d;
        }
    }
    for scale in &mut scales {
        let std = (*scale / n).sqrt();
        *scale = if std > PIVOT_EPSILON { std } else { 1.0 };
    }

    let mut gram = vec![vec![0.0; p]; p];
    let mut rhs = vec![0.0; p];
    for (row, target) in x.iter().zip(y) {
        let z: Vec<f64> = (0..p).map(|j| (row[j] - means[j]) / scales[j]).collect();
        let centered = target - y_mean;
        for i in 0..p {
            rhs[i] += z[i] * centered / n;
            for j in 0..p {
                gram[i][j] += z[i] * z[j] / n;
            }
        }
    }
    for (i, gram_row) in gram.iter_mut().enumerate() {
        gram_row[i] += cfg.l2;
    }

    let weights = solve_linear_system(gram, rhs)?;
    let coefficients: Vec<f64> = weights
        .iter()
        .zip(&scales)
        .map(|(w, scale)| w / scale)
        .collect();
    let intercept = y_mean
        - coefficients
            .iter()
            .zip(&means)
            .map(|(beta, mean)| beta * mean)
            .sum::<f64>();

    Ok(LinearModel {
        model_type: MODEL_TYPE.to_string(),
        feature_names: feature_names.to_vec(),
        coefficients,
        intercept,
        l2: cfg.l2,
        schema_version,
        schema_fingerprint: schema_fingerprint.to_string(),
    })
}

/// RMSE, MAPE (denominator floored at machine epsilon) and `1 - MAPE`.
pub fn regression_metrics(
    actual: &[f64],
    predicted: &[f64],
) -> Result<RegressionMetrics, ModelError> {
    if actual.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if actual.len() != predicted.len() {
        return Err(ModelError::DimensionMismatch {
            context: "prediction count",
            expected: actual.len(),
            actual: predicted.len(),
        });
    }

    let n = actual.len() as f64;
    let mut squared = 0.0;
    let mut pct = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        let err = a - p;
        squared += err * err;
        pct += err.abs() / a.abs().max(f64::EPSILON);
    }

    let rmse = (squared / n).sqrt();
    let mape = pct / n;
    Ok(RegressionMetrics {
        rmse,
        mape,
        accuracy: 1.0 - mape,
    })
}

fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ModelError> {
    let n = b.len();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .ok_or(ModelError::Singular)?;
        if a[pivot_row][col].abs() < PIVOT_EPSILON {
            return Err(ModelError::Singular);
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
