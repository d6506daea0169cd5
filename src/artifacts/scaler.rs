use crate::error::PipelineError;
use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A fitted per-column transform exported from training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedScaler {
    /// `(x - mean) / scale`
    Standard {
        mean: Vec<f64>,
        scale: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feature_names: Option<Vec<String>>,
    },
    /// `x * scale + min`
    MinMax {
        min: Vec<f64>,
        scale: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feature_names: Option<Vec<String>>,
    },
    Identity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        n_features: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feature_names: Option<Vec<String>>,
    },
}

impl FittedScaler {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read scaler {}", path.display()))?;
        let scaler: FittedScaler = serde_json::from_str(&text)
            .map_err(|err| PipelineError::invalid_artifact(path, err.to_string()))?;
        scaler
            .check_parameters()
            .map_err(|reason| PipelineError::invalid_artifact(path, reason))?;
        Ok(scaler)
    }

    fn check_parameters(&self) -> std::result::Result<(), String> {
        let (a, b) = match self {
            FittedScaler::Standard { mean, scale, .. } => (mean.len(), scale.len()),
            FittedScaler::MinMax { min, scale, .. } => (min.len(), scale.len()),
            FittedScaler::Identity { .. } => return Ok(()),
        };
        if a != b {
            return Err(format!("parameter lengths differ ({} vs {})", a, b));
        }
        if let Some(names) = self.feature_names() {
            if names.len() != a {
                return Err(format!(
                    "{} feature names for {} fitted columns",
                    names.len(),
                    a
                ));
            }
        }
        Ok(())
    }

    pub fn n_features(&self) -> Option<usize> {
        match self {
            FittedScaler::Standard { mean, .. } => Some(mean.len()),
            FittedScaler::MinMax { min, .. } => Some(min.len()),
            FittedScaler::Identity {
                n_features,
                feature_names,
            } => n_features.or_else(|| feature_names.as_ref().map(|n| n.len())),
        }
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        match self {
            FittedScaler::Standard { feature_names, .. }
            | FittedScaler::MinMax { feature_names, .. }
            | FittedScaler::Identity { feature_names, .. } => feature_names.as_deref(),
        }
    }

    /// Confirms the scaler was fitted on `features` in this order.
    pub fn ensure_compatible(&self, features: &[String]) -> Result<()> {
        if let Some(expected) = self.n_features() {
            if expected != features.len() {
                anyhow::bail!(
                    "scaler was fitted on {} features but {} are configured",
                    expected,
                    features.len()
                );
            }
        }
        if let Some(names) = self.feature_names() {
            if names != features {
                anyhow::bail!(
                    "scaler feature order {:?} does not match configured order {:?}",
                    names,
                    features
                );
            }
        }
        Ok(())
    }

    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        if let Some(expected) = self.n_features() {
            if matrix.ncols() != expected {
                anyhow::bail!(
                    "scaler expects {} columns, got {}",
                    expected,
                    matrix.ncols()
                );
            }
        }

        let mut out = matrix.clone();
        match self {
            FittedScaler::Standard { mean, scale, .. } => {
                for (idx, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
                    let divisor = if scale[idx] == 0.0 { 1.0 } else { scale[idx] };
                    column.mapv_inplace(|x| (x - mean[idx]) / divisor);
                }
            }
            FittedScaler::MinMax { min, scale, .. } => {
                for (idx, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
                    column.mapv_inplace(|x| x * scale[idx] + min[idx]);
                }
            }
            FittedScaler::Identity { .. } => {}
        }
        Ok(out)
    }
}
