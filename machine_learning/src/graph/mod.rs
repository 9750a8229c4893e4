//! A graph neural network encoder: stacked graph convolution or attention
//! layers, a readout that turns node features into graph features, and an
//! optional normalization of the result.

mod conv;
mod encoder;
mod gat;
#[allow(clippy::module_inception)]
mod graph;
mod layers;
mod lstm;
mod norm;
mod params;
mod readout;

pub use conv::{GraphConv, Norm};
pub use encoder::{ConvKind, EncoderSpec, GraphEncoder};
pub use gat::GatConv;
pub use graph::Graph;
pub use layers::{GatLayer, GcnLayer, HeadAgg, Linear};
pub use lstm::Lstm;
pub use norm::{BatchNorm, LayerNorm};
pub use params::Initializer;
pub use readout::{Readout, Set2Set, avg_pool};
