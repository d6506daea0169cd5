use super::weights::WeightStore;
use anyhow::Result;
use ndarray::{Array1, Array2, Axis};

pub const LAYER_NORM_EPS: f64 = 1e-5;

/// `y = x W^T + b`, with `W` stored as `[out, in]`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Linear {
    pub fn load(store: &WeightStore, prefix: &str, in_dim: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            weight: store.matrix(&format!("{prefix}.weight"), out_dim, in_dim)?,
            bias: store.vector(&format!("{prefix}.bias"), out_dim)?,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }

    pub fn forward_vec(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weight.dot(x) + &self.bias
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Array1<f64>,
    pub bias: Array1<f64>,
}

impl LayerNorm {
    pub fn load(store: &WeightStore, prefix: &str, dim: usize) -> Result<Self> {
        Ok(Self {
            weight: store.vector(&format!("{prefix}.weight"), dim)?,
            bias: store.vector(&format!("{prefix}.bias"), dim)?,
        })
    }

    /// Normalizes each row over its last dimension (biased variance).
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let Some(mean) = x.mean_axis(Axis(1)) else {
            return x.clone();
        };
        let var = x.var_axis(Axis(1), 0.0);

        let mut output = x.clone();
        for (i, mut row) in output.axis_iter_mut(Axis(0)).enumerate() {
            let normalized = (&row.to_owned() - mean[i]) / (var[i] + LAYER_NORM_EPS).sqrt();
            row.assign(&(&normalized * &self.weight + &self.bias));
        }
        output
    }
}

pub fn relu(x: &mut Array2<f64>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Softmax along the last axis, shifted by each row's max.
pub fn softmax_2d(x: &Array2<f64>) -> Array2<f64> {
    let max_vals = x.map_axis(Axis(1), |row| {
        row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    });
    let exp_x = (x - &max_vals.insert_axis(Axis(1))).mapv(f64::exp);
    let sum_exp = exp_x.sum_axis(Axis(1));
    &exp_x / &sum_exp.insert_axis(Axis(1))
}

pub fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}
