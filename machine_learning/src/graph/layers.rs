use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{BatchNorm, GatConv, Graph, GraphConv, Initializer, Norm, params};
use crate::{MlErr, Result, Scope, arch::activations::ActFn};

/// A fully connected projection of node or graph features, `x · W + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(in_feats: usize, out_feats: usize, init: &Initializer) -> Result<Self> {
        Ok(Self {
            weight: init.weight(in_feats, out_feats)?,
            bias: init.zeros(out_feats),
        })
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.weight.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "linear input",
                got: x.ncols(),
                expected: self.weight.nrows(),
            });
        }

        let mut out = x.dot(&self.weight);
        out += &self.bias;
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

/// A single graph convolution layer with an optional residual connection and
/// an optional batch normalization of its output.
///
/// The residual branch is `act(linear(h))`, added to the convolution's output.
/// Dropout is the identity at inference and isn't modeled.
#[derive(Debug, Clone)]
pub struct GcnLayer {
    conv: GraphConv,
    act_fn: Option<ActFn>,
    residual: Option<Linear>,
    batchnorm: Option<BatchNorm>,
}

impl GcnLayer {
    /// Creates a new `GcnLayer`.
    ///
    /// # Arguments
    /// * `in_feats` - The width of the input node features.
    /// * `out_feats` - The width of the output node features.
    /// * `act_fn` - The activation of both the convolution and the residual branch.
    /// * `residual` - Whether to add the residual branch.
    /// * `batchnorm` - Whether to normalize the output.
    /// * `init` - Where the weights are drawn from.
    pub fn new(
        in_feats: usize,
        out_feats: usize,
        act_fn: Option<ActFn>,
        residual: bool,
        batchnorm: bool,
        init: &Initializer,
    ) -> Result<Self> {
        let conv = GraphConv::new(in_feats, out_feats, Norm::None, act_fn, init)?;
        let residual = residual
            .then(|| Linear::new(in_feats, out_feats, init))
            .transpose()?;

        Ok(Self {
            conv,
            act_fn,
            residual,
            batchnorm: batchnorm.then(|| BatchNorm::new(out_feats)),
        })
    }

    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut out = self.conv.forward(graph, feats)?;

        if let Some(res) = &self.residual {
            let mut res_feats = res.forward(feats)?;
            if let Some(act_fn) = self.act_fn {
                res_feats.mapv_inplace(|x| act_fn.f(x));
            }
            out += &res_feats;
        }

        Ok(match &self.batchnorm {
            Some(bn) => bn.forward(out.view()),
            None => out,
        })
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        self.conv.export(&format!("{prefix}.graph_conv"), scope);
        if let Some(res) = &self.residual {
            res.export(&format!("{prefix}.res_connection"), scope);
        }
        if let Some(bn) = &self.batchnorm {
            bn.export(&format!("{prefix}.bn_layer"), scope);
        }
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        self.conv.import(&format!("{prefix}.graph_conv"), scope)?;
        if let Some(res) = &mut self.residual {
            res.import(&format!("{prefix}.res_connection"), scope)?;
        }
        if let Some(bn) = &mut self.batchnorm {
            bn.import(&format!("{prefix}.bn_layer"), scope)?;
        }

        Ok(())
    }
}

/// How the heads of a `GatLayer` are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadAgg {
    /// Concatenates the heads, the output is `heads * out_feats` wide.
    #[default]
    Flatten,
    /// Averages the heads, the output is `out_feats` wide.
    Mean,
}

/// A single graph attention layer.
#[derive(Debug, Clone)]
pub struct GatLayer {
    conv: GatConv,
    agg: HeadAgg,
    act_fn: Option<ActFn>,
}

impl GatLayer {
    pub fn new(conv: GatConv, agg: HeadAgg, act_fn: Option<ActFn>) -> Self {
        Self { conv, agg, act_fn }
    }

    /// The width of the layer's output.
    pub fn out_feats(&self) -> usize {
        match self.agg {
            HeadAgg::Flatten => self.conv.num_heads() * self.conv.out_feats(),
            HeadAgg::Mean => self.conv.out_feats(),
        }
    }

    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        let heads = self.conv.forward(graph, feats)?;

        let mut out = match self.agg {
            HeadAgg::Flatten => {
                let width = self.out_feats();
                heads.into_shape_with_order((graph.num_nodes(), width))?
            }
            HeadAgg::Mean => heads
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array2::zeros((graph.num_nodes(), self.conv.out_feats()))),
        };

        if let Some(act_fn) = self.act_fn {
            out.mapv_inplace(|x| act_fn.f(x));
        }

        Ok(out)
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        self.conv.export(&format!("{prefix}.gnn"), scope);
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        self.conv.import(&format!("{prefix}.gnn"), scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::Init;

    fn path() -> Graph {
        Graph::new(3, [(0, 1), (1, 2)]).unwrap().with_self_loops()
    }

    #[test]
    fn gcn_layer_with_residual_and_batchnorm() {
        let init = Initializer::seeded(11, Init::XavierUniform);
        let layer = GcnLayer::new(4, 5, Some(ActFn::Relu), true, true, &init).unwrap();

        let out = layer.forward(&path(), Array2::ones((3, 4)).view()).unwrap();
        assert_eq!(out.dim(), (3, 5));
    }

    #[test]
    fn gat_layer_aggregations() {
        let init = Initializer::seeded(12, Init::XavierUniform);
        let conv = GatConv::new(4, 3, 2, 0.2, true, &init).unwrap();

        let flatten = GatLayer::new(conv.clone(), HeadAgg::Flatten, None);
        let mean = GatLayer::new(conv, HeadAgg::Mean, Some(ActFn::Elu { alpha: 1. }));

        let feats = Array2::from_shape_fn((3, 4), |(i, j)| (i + j) as f32 * 0.1);
        let flat = flatten.forward(&path(), feats.view()).unwrap();
        let avg = mean.forward(&path(), feats.view()).unwrap();

        assert_eq!(flat.dim(), (3, 6));
        assert_eq!(avg.dim(), (3, 3));

        let expected = (flat[[0, 0]] + flat[[0, 3]]) / 2.;
        assert!((ActFn::Elu { alpha: 1. }.f(expected) - avg[[0, 0]]).abs() < 1e-5);
    }
}
