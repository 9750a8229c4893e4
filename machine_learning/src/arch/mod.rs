pub mod activations;
pub mod layers;
pub mod loss;
mod objective;
mod sequential;

pub use objective::{Gradients, Objective, Supervised};
pub use sequential::Sequential;
