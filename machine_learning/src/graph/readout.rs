use ndarray::{Array2, ArrayView2, Axis, concatenate};

use super::{Graph, Initializer, Lstm};
use crate::{MlErr, Result, Scope};

/// Mean pooling of the node features of every graph in the batch.
///
/// # Returns
/// One row per graph; graphs without nodes pool to zeros.
pub fn avg_pool(graph: &Graph, feats: ArrayView2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros((graph.num_graphs(), feats.ncols()));

    for (row, &g) in feats.axis_iter(Axis(0)).zip(graph.graph_ids()) {
        let mut acc = out.row_mut(g);
        acc += &row;
    }

    for (mut row, size) in out.axis_iter_mut(Axis(0)).zip(graph.graph_sizes()) {
        if size > 0 {
            row /= size as f32;
        }
    }

    out
}

/// Iterative set pooling.
///
/// Each iteration feeds the previous readout `q*` to an LSTM, attends the
/// graph's nodes with the resulting query and concatenates the query with the
/// attention weighted sum of the nodes. The output is twice as wide as the
/// input.
#[derive(Debug, Clone)]
pub struct Set2Set {
    input_dim: usize,
    n_iters: usize,
    lstm: Lstm,
}

impl Set2Set {
    /// Creates a new `Set2Set`.
    ///
    /// # Arguments
    /// * `input_dim` - The width of the node features.
    /// * `n_iters` - The amount of attention iterations.
    /// * `n_layers` - The amount of stacked LSTM layers.
    /// * `init` - Where the weights are drawn from.
    pub fn new(
        input_dim: usize,
        n_iters: usize,
        n_layers: usize,
        init: &Initializer,
    ) -> Result<Self> {
        Ok(Self {
            input_dim,
            n_iters,
            lstm: Lstm::new(2 * input_dim, input_dim, n_layers, init)?,
        })
    }

    pub fn output_dim(&self) -> usize {
        2 * self.input_dim
    }

    pub fn forward(&self, graph: &Graph, feats: ArrayView2<f32>) -> Result<Array2<f32>> {
        graph.check_features(feats, self.input_dim)?;

        let batch = graph.num_graphs();
        let mut state = self.lstm.zero_state(batch);
        let mut q_star = Array2::zeros((batch, self.output_dim()));

        for _ in 0..self.n_iters {
            let q = self.lstm.step(q_star.view(), &mut state);

            let scores: Vec<f32> = feats
                .axis_iter(Axis(0))
                .zip(graph.graph_ids())
                .map(|(node, &g)| node.dot(&q.row(g)))
                .collect();
            let alpha = softmax_per_graph(graph, &scores);

            let mut readout = Array2::zeros((batch, self.input_dim));
            for ((node, &g), &a) in feats.axis_iter(Axis(0)).zip(graph.graph_ids()).zip(&alpha) {
                readout.row_mut(g).scaled_add(a, &node);
            }

            q_star = concatenate(Axis(1), &[q.view(), readout.view()])?;
        }

        Ok(q_star)
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        self.lstm.export(&format!("{prefix}.lstm"), scope);
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        self.lstm.import(&format!("{prefix}.lstm"), scope)
    }
}

fn softmax_per_graph(graph: &Graph, scores: &[f32]) -> Vec<f32> {
    let mut max = vec![f32::NEG_INFINITY; graph.num_graphs()];
    for (&s, &g) in scores.iter().zip(graph.graph_ids()) {
        max[g] = max[g].max(s);
    }

    let exps: Vec<f32> = scores
        .iter()
        .zip(graph.graph_ids())
        .map(|(&s, &g)| (s - max[g]).exp())
        .collect();

    let mut sums = vec![0.; graph.num_graphs()];
    for (&e, &g) in exps.iter().zip(graph.graph_ids()) {
        sums[g] += e;
    }

    exps.iter()
        .zip(graph.graph_ids())
        .map(|(&e, &g)| e / sums[g])
        .collect()
}

/// The step that turns node features into the encoder's output.
#[derive(Debug, Clone)]
pub enum Readout {
    /// Mean pooling per graph.
    Avg,
    /// `Set2Set` pooling per graph.
    Set2Set(Set2Set),
    /// No pooling, the node features are returned as they are.
    Root,
}

impl Readout {
    /// Builds the readout named `name`.
    ///
    /// # Arguments
    /// * `name` - One of `avg`, `set2set` or `root`.
    /// * `hidden_size` - The width of the node features.
    /// * `n_iters`, `n_layers` - The `Set2Set` configuration, unused otherwise.
    /// * `init` - Where the `Set2Set` weights are drawn from.
    ///
    /// # Errors
    /// `MlErr::UnsupportedReadout` for any other name.
    pub fn from_name(
        name: &str,
        hidden_size: usize,
        n_iters: usize,
        n_layers: usize,
        init: &Initializer,
    ) -> Result<Self> {
        match name {
            "avg" => Ok(Self::Avg),
            "set2set" => Ok(Self::Set2Set(Set2Set::new(
                hidden_size,
                n_iters,
                n_layers,
                init,
            )?)),
            "root" => Ok(Self::Root),
            other => Err(MlErr::UnsupportedReadout(other.to_string())),
        }
    }

    pub fn forward(&self, graph: &Graph, feats: Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Readout::Avg => Ok(avg_pool(graph, feats.view())),
            Readout::Set2Set(set2set) => set2set.forward(graph, feats.view()),
            Readout::Root => Ok(feats),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, s};

    use super::*;
    use crate::initialization::Init;

    fn two_graphs() -> Graph {
        let a = Graph::new(2, [(0, 1)]).unwrap();
        let b = Graph::new(1, std::iter::empty()).unwrap();
        Graph::batch(&[a, b])
    }

    #[test]
    fn avg_pool_per_graph() {
        let feats = array![[1., 2.], [3., 4.], [10., 10.]];
        let pooled = avg_pool(&two_graphs(), feats.view());

        assert_eq!(pooled, array![[2., 3.], [10., 10.]]);
    }

    #[test]
    fn set2set_doubles_width() {
        let init = Initializer::seeded(21, Init::XavierUniform);
        let set2set = Set2Set::new(2, 3, 2, &init).unwrap();

        let feats = array![[1., 2.], [3., 4.], [10., 10.]];
        let out = set2set.forward(&two_graphs(), feats.view()).unwrap();

        assert_eq!(out.dim(), (2, 4));
        // A single node graph attends its only node with weight one.
        assert_eq!(out.slice(s![1, 2..]), array![10., 10.]);
    }

    #[test]
    fn softmax_sums_to_one_per_graph() {
        let alpha = softmax_per_graph(&two_graphs(), &[0.3, -2., 5.]);

        assert!((alpha[0] + alpha[1] - 1.).abs() < 1e-6);
        assert_eq!(alpha[2], 1.);
    }

    #[test]
    fn unknown_readout() {
        let init = Initializer::seeded(0, Init::XavierUniform);
        let err = Readout::from_name("max", 4, 1, 1, &init).unwrap_err();

        assert!(matches!(err, MlErr::UnsupportedReadout(name) if name == "max"));
    }
}
