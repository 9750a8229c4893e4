use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::params;
use crate::{Result, Scope};

const EPS: f32 = 1e-5;

/// Normalizes every row to zero mean and unit variance, without a learned
/// scale or shift.
#[derive(Debug, Clone, Copy)]
pub struct LayerNorm {
    eps: f32,
}

impl Default for LayerNorm {
    fn default() -> Self {
        Self { eps: EPS }
    }
}

impl LayerNorm {
    pub fn new(eps: f32) -> Self {
        Self { eps }
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut out = x.to_owned();

        for mut row in out.axis_iter_mut(Axis(0)) {
            let mean = row.mean().unwrap_or_default();
            let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or_default();
            let inv_std = (var + self.eps).sqrt().recip();
            row.mapv_inplace(|v| (v - mean) * inv_std);
        }

        out
    }
}

/// Batch normalization over the feature columns using its running statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl BatchNorm {
    /// A fresh `BatchNorm` over `num_features` columns: zero mean, unit
    /// variance, identity affine.
    pub fn new(num_features: usize) -> Self {
        Self {
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            eps: EPS,
        }
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let scale = &self.gamma / &(&self.running_var + self.eps).mapv(f32::sqrt);
        let shift = &self.beta - &(&self.running_mean * &scale);

        let mut out = &x * &scale;
        out += &shift;
        out
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        params::export(scope, format!("{prefix}.running_mean"), &self.running_mean);
        params::export(scope, format!("{prefix}.running_var"), &self.running_var);
        params::export(scope, format!("{prefix}.weight"), &self.gamma);
        params::export(scope, format!("{prefix}.bias"), &self.beta);
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        params::import(scope, &format!("{prefix}.running_mean"), &mut self.running_mean)?;
        params::import(scope, &format!("{prefix}.running_var"), &mut self.running_var)?;
        params::import(scope, &format!("{prefix}.weight"), &mut self.gamma)?;
        params::import(scope, &format!("{prefix}.bias"), &mut self.beta)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn layer_norm_rows() {
        let out = LayerNorm::default().forward(array![[1., 2., 3.], [5., 5., 5.]].view());

        let first = out.row(0);
        assert!(first.sum().abs() < 1e-5);
        assert!((first.mapv(|v| v * v).mean().unwrap() - 1.).abs() < 1e-3);
        assert!(out.row(1).iter().all(|&v| v == 0.));
    }

    #[test]
    fn fresh_batch_norm_is_almost_identity() {
        let x = array![[1., -2.], [0.5, 4.]];
        let out = BatchNorm::new(2).forward(x.view());

        for (got, want) in out.iter().zip(&x) {
            assert!((got - want).abs() < 1e-4);
        }
    }
}
