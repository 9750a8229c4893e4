use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};

use super::{Graph, Initializer, params};
use crate::{Result, Scope, arch::activations::ActFn};

/// The skip connection of a `GatConv`.
#[derive(Debug, Clone)]
enum Residual {
    Identity,
    Projection(Array2<f32>),
}

/// Multi-head graph attention.
///
/// Each head projects the node features, scores every edge with
/// `LeakyReLU(a_l · z_src + a_r · z_dst)` and normalizes the scores with a
/// softmax over the incoming edges of each node. Nodes without incoming edges
/// receive a zero aggregate.
#[derive(Debug, Clone)]
pub struct GatConv {
    fc: Array2<f32>,
    attn_l: Array2<f32>,
    attn_r: Array2<f32>,
    bias: Array1<f32>,
    residual: Option<Residual>,
    num_heads: usize,
    out_feats: usize,
    negative_slope: f32,
}

impl GatConv {
    /// Creates a new `GatConv`.
    ///
    /// # Arguments
    /// * `in_feats` - The width of the input node features.
    /// * `out_feats` - The width of each head's output.
    /// * `num_heads` - The amount of attention heads.
    /// * `negative_slope` - The slope of the LeakyReLU for negative scores.
    /// * `residual` - Whether the input is added back to the output, projected
    ///   when its width differs from `num_heads * out_feats`.
    /// * `init` - Where the weights are drawn from.
    pub fn new(
        in_feats: usize,
        out_feats: usize,
        num_heads: usize,
        negative_slope: f32,
        residual: bool,
        init: &Initializer,
    ) -> Result<Self> {
        let width = num_heads * out_feats;

        let residual = match residual {
            false => None,
            true if in_feats == width => Some(Residual::Identity),
            true => Some(Residual::Projection(init.weight(in_feats, width)?)),
        };

        Ok(Self {
            fc: init.weight(in_feats, width)?,
            attn_l: init.weight(num_heads, out_feats)?,
            attn_r: init.weight(num_heads, out_feats)?,
            bias: init.zeros(width),
            residual,
            num_heads,
            out_feats,
            negative_slope,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn out_feats(&self) -> usize {
        self.out_feats
    }

    /// Runs the attention over `graph`.
    ///
    /// # Returns
    /// The per head node features, shaped `(nodes, heads, out_feats)`.
    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array3<f32>> {
        graph.check_features(feats, self.fc.nrows())?;

        let n = graph.num_nodes();
        let shape = (n, self.num_heads, self.out_feats);
        let z = feats.dot(&self.fc).into_shape_with_order(shape)?;

        let el = (&z * &self.attn_l.view().insert_axis(Axis(0))).sum_axis(Axis(2));
        let er = (&z * &self.attn_r.view().insert_axis(Axis(0))).sum_axis(Axis(2));

        let alpha = self.edge_softmax(graph, &el, &er);

        let mut out = Array3::zeros(shape);
        for (e, (src, dst)) in graph.edges().enumerate() {
            for k in 0..self.num_heads {
                out.slice_mut(s![dst, k, ..])
                    .scaled_add(alpha[[e, k]], &z.slice(s![src, k, ..]));
            }
        }

        match &self.residual {
            Some(Residual::Identity) => out += &feats.into_shape_with_order(shape)?,
            Some(Residual::Projection(w)) => out += &feats.dot(w).into_shape_with_order(shape)?,
            None => {}
        }

        out += &self.bias.view().into_shape_with_order((self.num_heads, self.out_feats))?;
        Ok(out)
    }

    /// The attention coefficient of every edge and head.
    fn edge_softmax(&self, graph: &Graph, el: &Array2<f32>, er: &Array2<f32>) -> Array2<f32> {
        let leaky = ActFn::leaky_relu(self.negative_slope);
        let heads = self.num_heads;

        let mut scores = Array2::zeros((graph.num_edges(), heads));
        let mut max = Array2::from_elem((graph.num_nodes(), heads), f32::NEG_INFINITY);

        for (e, (src, dst)) in graph.edges().enumerate() {
            for k in 0..heads {
                let score = leaky.f(el[[src, k]] + er[[dst, k]]);
                scores[[e, k]] = score;
                max[[dst, k]] = max[[dst, k]].max(score);
            }
        }

        let mut denom = Array2::<f32>::zeros((graph.num_nodes(), heads));
        for (e, (_, dst)) in graph.edges().enumerate() {
            for k in 0..heads {
                let exp = (scores[[e, k]] - max[[dst, k]]).exp();
                scores[[e, k]] = exp;
                denom[[dst, k]] += exp;
            }
        }

        for (e, (_, dst)) in graph.edges().enumerate() {
            for k in 0..heads {
                scores[[e, k]] /= denom[[dst, k]];
            }
        }

        scores
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        params::export(scope, format!("{prefix}.fc"), &self.fc);
        params::export(scope, format!("{prefix}.attn_l"), &self.attn_l);
        params::export(scope, format!("{prefix}.attn_r"), &self.attn_r);
        params::export(scope, format!("{prefix}.bias"), &self.bias);
        if let Some(Residual::Projection(w)) = &self.residual {
            params::export(scope, format!("{prefix}.res_fc"), w);
        }
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        params::import(scope, &format!("{prefix}.fc"), &mut self.fc)?;
        params::import(scope, &format!("{prefix}.attn_l"), &mut self.attn_l)?;
        params::import(scope, &format!("{prefix}.attn_r"), &mut self.attn_r)?;
        params::import(scope, &format!("{prefix}.bias"), &mut self.bias)?;
        if let Some(Residual::Projection(w)) = &mut self.residual {
            params::import(scope, &format!("{prefix}.res_fc"), w)?;
        }

        Ok(())
    }
}
