pub mod arch;
pub mod error;
pub mod graph;
pub mod initialization;
pub mod optimization;
pub mod scope;

pub use error::{MlErr, Result};
pub use scope::{Scope, Variable};
