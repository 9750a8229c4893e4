use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{
    GatConv, GatLayer, GcnLayer, Graph, HeadAgg, Initializer, LayerNorm, Linear, Readout,
};
use crate::{Result, Scope, arch::activations::ActFn, initialization::Init};

/// The kind of the stacked graph layers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvKind {
    #[default]
    Gcn,
    Gat {
        num_heads: usize,
        #[serde(default = "default_negative_slope")]
        negative_slope: f32,
    },
}

fn default_negative_slope() -> f32 {
    0.2
}

/// The configuration of a `GraphEncoder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSpec {
    pub hidden_size: usize,
    pub num_layers: usize,
    /// One of `avg`, `set2set` or `root`.
    pub readout: String,
    pub layernorm: bool,
    pub set2set_lstm_layers: usize,
    pub set2set_iters: usize,
    pub conv: ConvKind,
    pub init: Init,
    pub seed: u64,
}

impl Default for EncoderSpec {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_layers: 2,
            readout: "avg".into(),
            layernorm: false,
            set2set_lstm_layers: 3,
            set2set_iters: 6,
            conv: ConvKind::Gcn,
            init: Init::XavierUniform,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum EncoderLayer {
    Gcn(GcnLayer),
    Gat(GatLayer),
}

impl EncoderLayer {
    fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            EncoderLayer::Gcn(layer) => layer.forward(graph, feats),
            EncoderLayer::Gat(layer) => layer.forward(graph, feats),
        }
    }
}

/// Encodes graphs into vectors.
///
/// Node features of width `hidden_size` go through `num_layers` graph layers,
/// then through the readout. A `set2set` readout is projected back from
/// `2 * hidden_size` to `hidden_size`. The result is optionally layer
/// normalized.
#[derive(Debug, Clone)]
pub struct GraphEncoder {
    layers: Vec<EncoderLayer>,
    readout: Readout,
    projection: Option<Linear>,
    layernorm: Option<LayerNorm>,
    hidden_size: usize,
}

impl GraphEncoder {
    /// Creates a new `GraphEncoder` from its configuration.
    ///
    /// # Errors
    /// `MlErr::UnsupportedReadout` if `spec.readout` isn't a known readout, or
    /// an initialization error if the weights can't be drawn.
    pub fn new(spec: &EncoderSpec) -> Result<Self> {
        let init = Initializer::seeded(spec.seed, spec.init);
        let h = spec.hidden_size;

        // Every layer but the last is activated.
        let act_fn = |i: usize| (i + 1 < spec.num_layers).then_some(ActFn::Relu);

        let layers = (0..spec.num_layers)
            .map(|i| {
                Ok(match spec.conv {
                    ConvKind::Gcn => {
                        EncoderLayer::Gcn(GcnLayer::new(h, h, act_fn(i), false, false, &init)?)
                    }
                    ConvKind::Gat {
                        num_heads,
                        negative_slope,
                    } => {
                        let conv = GatConv::new(h, h, num_heads, negative_slope, true, &init)?;
                        EncoderLayer::Gat(GatLayer::new(conv, HeadAgg::Mean, act_fn(i)))
                    }
                })
            })
            .collect::<Result<_>>()?;

        let readout = Readout::from_name(
            &spec.readout,
            h,
            spec.set2set_iters,
            spec.set2set_lstm_layers,
            &init,
        )?;

        let projection = match readout {
            Readout::Set2Set(_) => Some(Linear::new(2 * h, h, &init)?),
            _ => None,
        };

        debug!(
            layers = spec.num_layers,
            hidden_size = h,
            readout = spec.readout.as_str();
            "built graph encoder"
        );

        Ok(Self {
            layers,
            readout,
            projection,
            layernorm: spec.layernorm.then(LayerNorm::default),
            hidden_size: h,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn readout(&self) -> &Readout {
        &self.readout
    }

    /// Encodes the graphs of `graph`.
    ///
    /// # Arguments
    /// * `graph` - A single or batched graph.
    /// * `feats` - One row of `hidden_size` features per node.
    ///
    /// # Returns
    /// One row per graph, or one row per node with the `root` readout.
    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        graph.check_features(feats, self.hidden_size)?;

        let mut h = feats.to_owned();
        for layer in &self.layers {
            h = layer.forward(graph, h.view())?;
        }

        let mut out = self.readout.forward(graph, h)?;

        if let Some(projection) = &self.projection {
            out = projection.forward(out.view())?;
        }

        if let Some(ln) = &self.layernorm {
            out = ln.forward(out.view());
        }

        Ok(out)
    }

    /// Writes every parameter into `scope`, named after its place in the
    /// encoder (`layers.0.graph_conv.weight`, `readout.lstm.weight_ih_l0`...).
    pub fn export(&self, scope: &mut Scope) {
        for (i, layer) in self.layers.iter().enumerate() {
            let prefix = format!("layers.{i}");
            match layer {
                EncoderLayer::Gcn(layer) => layer.export(&prefix, scope),
                EncoderLayer::Gat(layer) => layer.export(&prefix, scope),
            }
        }

        if let Readout::Set2Set(set2set) = &self.readout {
            set2set.export("readout", scope);
        }

        if let Some(projection) = &self.projection {
            projection.export("linear", scope);
        }
    }

    /// Loads every parameter from `scope`, the inverse of `export`.
    pub fn import(&mut self, scope: &Scope) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let prefix = format!("layers.{i}");
            match layer {
                EncoderLayer::Gcn(layer) => layer.import(&prefix, scope)?,
                EncoderLayer::Gat(layer) => layer.import(&prefix, scope)?,
            }
        }

        if let Readout::Set2Set(set2set) = &mut self.readout {
            set2set.import("readout", scope)?;
        }

        if let Some(projection) = &mut self.projection {
            projection.import("linear", scope)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    fn spec(readout: &str) -> EncoderSpec {
        EncoderSpec {
            hidden_size: 8,
            readout: readout.into(),
            set2set_iters: 2,
            set2set_lstm_layers: 1,
            seed: 7,
            ..Default::default()
        }
    }

    fn molecules() -> (Graph, Array2<f32>) {
        let a = Graph::new(3, [(0, 1), (0, 2), (1, 2)]).unwrap();
        let b = Graph::new(2, [(1, 0)]).unwrap();
        let graph = Graph::batch(&[a, b]).with_self_loops();

        let feats = Array2::from_shape_fn((5, 8), |(i, j)| ((i * 8 + j) as f32).sin());
        (graph, feats)
    }

    #[test]
    fn avg_readout_pools_per_graph() {
        let (graph, feats) = molecules();
        let encoder = GraphEncoder::new(&spec("avg")).unwrap();

        assert_eq!(encoder.forward(&graph, feats.view()).unwrap().dim(), (2, 8));
    }

    #[test]
    fn set2set_readout_is_projected_back() {
        let (graph, feats) = molecules();
        let encoder = GraphEncoder::new(&spec("set2set")).unwrap();

        assert_eq!(encoder.forward(&graph, feats.view()).unwrap().dim(), (2, 8));
    }

    #[test]
    fn root_readout_returns_node_features_unchanged() {
        let (graph, feats) = molecules();
        let mut root = spec("root");
        root.num_layers = 0;

        let encoder = GraphEncoder::new(&root).unwrap();
        assert_eq!(encoder.forward(&graph, feats.view()).unwrap(), feats);
    }

    #[test]
    fn root_readout_keeps_per_node_rows() {
        let (graph, feats) = molecules();
        let encoder = GraphEncoder::new(&spec("root")).unwrap();

        let out = encoder.forward(&graph, feats.view()).unwrap();
        assert_eq!(out.dim(), (5, 8));
    }

    #[test]
    fn layernorm_normalizes_rows() {
        let (graph, feats) = molecules();
        let mut normalized = spec("avg");
        normalized.layernorm = true;

        let out = GraphEncoder::new(&normalized)
            .unwrap()
            .forward(&graph, feats.view())
            .unwrap();

        for row in out.rows() {
            assert!(row.sum().abs() < 1e-4);
        }
    }

    #[test]
    fn gat_layers() {
        let (graph, feats) = molecules();
        let mut gat = spec("avg");
        gat.conv = ConvKind::Gat {
            num_heads: 2,
            negative_slope: 0.2,
        };

        let encoder = GraphEncoder::new(&gat).unwrap();
        assert_eq!(encoder.forward(&graph, feats.view()).unwrap().dim(), (2, 8));
    }

    #[test]
    fn unsupported_readout() {
        assert!(matches!(
            GraphEncoder::new(&spec("sum")),
            Err(MlErr::UnsupportedReadout(_))
        ));
    }

    #[test]
    fn export_import_restores_outputs() {
        let (graph, feats) = molecules();
        let source = GraphEncoder::new(&spec("set2set")).unwrap();

        let mut scope = Scope::new();
        source.export(&mut scope);
        assert!(scope.contains("layers.0.graph_conv.weight"));
        assert!(scope.contains("readout.lstm.weight_ih_l0"));
        assert!(scope.contains("linear.weight"));

        let mut other = spec("set2set");
        other.seed = 99;
        let mut target = GraphEncoder::new(&other).unwrap();
        target.import(&scope).unwrap();

        assert_eq!(
            source.forward(&graph, feats.view()).unwrap(),
            target.forward(&graph, feats.view()).unwrap()
        );
    }

    #[test]
    fn spec_from_json_uses_defaults() {
        let spec: EncoderSpec =
            serde_json::from_str(r#"{"readout":"set2set","conv":{"kind":"gat","num_heads":4}}"#)
                .unwrap();

        assert_eq!(spec.hidden_size, 64);
        assert_eq!(
            spec.conv,
            ConvKind::Gat {
                num_heads: 4,
                negative_slope: 0.2
            }
        );
    }
}
