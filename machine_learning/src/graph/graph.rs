use ndarray::{Array2, ArrayView2};

use crate::{MlErr, Result};

/// A directed graph, or a batch of disjoint graphs, over contiguous node ids.
///
/// Every node belongs to a graph id; a single graph has all its nodes in
/// graph `0`. Batched graphs keep their nodes contiguous and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    num_nodes: usize,
    src: Vec<usize>,
    dst: Vec<usize>,
    graph_ids: Vec<usize>,
    num_graphs: usize,
}

impl Graph {
    /// Creates a new single `Graph`.
    ///
    /// # Arguments
    /// * `num_nodes` - The amount of nodes.
    /// * `edges` - The `(src, dst)` pairs.
    ///
    /// # Errors
    /// `MlErr::InvalidGraph` if an edge references a node out of range.
    pub fn new<I>(num_nodes: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let (src, dst): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        if let Some(&node) = src.iter().chain(&dst).find(|&&node| node >= num_nodes) {
            return Err(MlErr::InvalidGraph(format!(
                "edge endpoint {node} out of range for {num_nodes} nodes"
            )));
        }

        Ok(Self {
            num_nodes,
            src,
            dst,
            graph_ids: vec![0; num_nodes],
            num_graphs: 1,
        })
    }

    /// Merges `graphs` into a single disjoint graph, relabeling the nodes of
    /// each graph after the ones of the graphs before it.
    pub fn batch(graphs: &[Graph]) -> Self {
        let mut batched = Self {
            num_nodes: 0,
            src: Vec::new(),
            dst: Vec::new(),
            graph_ids: Vec::new(),
            num_graphs: 0,
        };

        for graph in graphs {
            let offset = batched.num_nodes;
            batched.src.extend(graph.src.iter().map(|s| s + offset));
            batched.dst.extend(graph.dst.iter().map(|d| d + offset));

            let graph_offset = batched.num_graphs;
            batched
                .graph_ids
                .extend(graph.graph_ids.iter().map(|g| g + graph_offset));

            batched.num_nodes += graph.num_nodes;
            batched.num_graphs += graph.num_graphs;
        }

        batched
    }

    /// Returns a copy of the graph with an edge from every node to itself.
    pub fn with_self_loops(&self) -> Self {
        let mut graph = self.clone();
        graph.src.extend(0..self.num_nodes);
        graph.dst.extend(0..self.num_nodes);
        graph
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn num_graphs(&self) -> usize {
        self.num_graphs
    }

    pub fn graph_ids(&self) -> &[usize] {
        &self.graph_ids
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_nodes];
        self.dst.iter().for_each(|&d| degrees[d] += 1);
        degrees
    }

    pub fn out_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_nodes];
        self.src.iter().for_each(|&s| degrees[s] += 1);
        degrees
    }

    /// The amount of nodes of every graph in the batch.
    pub fn graph_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_graphs];
        self.graph_ids.iter().for_each(|&g| sizes[g] += 1);
        sizes
    }

    /// Checks that `feats` has one row of `width` features per node.
    pub(crate) fn check_features(&self, feats: ArrayView2<f32>, width: usize) -> Result<()> {
        if feats.nrows() != self.num_nodes {
            return Err(MlErr::SizeMismatch {
                what: "node features",
                got: feats.nrows(),
                expected: self.num_nodes,
            });
        }

        if feats.ncols() != width {
            return Err(MlErr::SizeMismatch {
                what: "feature width",
                got: feats.ncols(),
                expected: width,
            });
        }

        Ok(())
    }

    /// Sums the features of every edge's source into its destination.
    pub(crate) fn scatter_sum(&self, h: ArrayView2<f32>) -> Array2<f32> {
        let mut out = Array2::zeros((self.num_nodes, h.ncols()));

        for (s, d) in self.edges() {
            let mut row = out.row_mut(d);
            row += &h.row(s);
        }

        out
    }
}
