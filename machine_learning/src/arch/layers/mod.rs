mod dense;

pub use dense::{Dense, DenseCache};
