use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{Graph, Initializer, params};
use crate::{Result, Scope, arch::activations::ActFn};

/// How the aggregated messages of a `GraphConv` are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    /// Plain sum of the neighbors' features.
    #[default]
    None,
    /// Symmetric normalization, `D_in^-1/2 · A · D_out^-1/2`.
    Both,
    /// Mean over the incoming neighbors.
    Right,
}

/// Graph convolution, `h' = act(norm(A · h) · W + b)`.
///
/// Degrees are clamped to one so isolated nodes keep a zero aggregate instead
/// of dividing by zero.
#[derive(Debug, Clone)]
pub struct GraphConv {
    weight: Array2<f32>,
    bias: Array1<f32>,
    norm: Norm,
    act_fn: Option<ActFn>,
}

impl GraphConv {
    /// Creates a new `GraphConv`.
    ///
    /// # Arguments
    /// * `in_feats` - The width of the input node features.
    /// * `out_feats` - The width of the output node features.
    /// * `norm` - The aggregation normalization.
    /// * `act_fn` - The activation applied to the output, if any.
    /// * `init` - Where the weights are drawn from.
    pub fn new(
        in_feats: usize,
        out_feats: usize,
        norm: Norm,
        act_fn: Option<ActFn>,
        init: &Initializer,
    ) -> Result<Self> {
        Ok(Self {
            weight: init.weight(in_feats, out_feats)?,
            bias: init.zeros(out_feats),
            norm,
            act_fn,
        })
    }

    pub fn in_feats(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_feats(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        graph.check_features(feats, self.in_feats())?;

        let mut h = feats.to_owned();
        if self.norm == Norm::Both {
            scale_rows(&mut h, &graph.out_degrees(), |deg| deg.powf(-0.5));
        }

        let mut agg = graph.scatter_sum(h.view());
        match self.norm {
            Norm::None => {}
            Norm::Both => scale_rows(&mut agg, &graph.in_degrees(), |deg| deg.powf(-0.5)),
            Norm::Right => scale_rows(&mut agg, &graph.in_degrees(), f32::recip),
        }

        let mut out = agg.dot(&self.weight);
        out += &self.bias;

        if let Some(act_fn) = self.act_fn {
            out.mapv_inplace(|x| act_fn.f(x));
        }

        Ok(out)
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        params::export(scope, format!("{prefix}.weight"), &self.weight);
        params::export(scope, format!("{prefix}.bias"), &self.bias);
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        params::import(scope, &format!("{prefix}.weight"), &mut self.weight)?;
        params::import(scope, &format!("{prefix}.bias"), &mut self.bias)
    }
}

fn scale_rows(h: &mut Array2<f32>, degrees: &[usize], f: impl Fn(f32) -> f32) {
    for (mut row, &deg) in h.axis_iter_mut(Axis(0)).zip(degrees) {
        let factor = f(deg.max(1) as f32);
        row *= factor;
    }
}
