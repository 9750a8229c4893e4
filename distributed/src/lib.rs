pub mod algorithm;
pub mod collective;
pub mod config;
pub mod error;
pub mod execution;
pub mod mode;
pub mod optimizer;
pub mod pserver;
pub mod role;
pub mod role_maker;
mod transport;

pub use algorithm::{Algorithm, AlgorithmState, DistributedOptimizer, split_files};
pub use collective::{ReduceOp, StarCollective};
pub use config::{DistributedStrategy, JobConfig, SyncMode};
pub use error::{DistributedErr, Result};
pub use execution::{Executor, Place};
pub use mode::Mode;
pub use optimizer::{Losses, OptimizerAdapter};
pub use role::{Role, RoleContext, RoleKind};
pub use role_maker::{CollectiveRoleMaker, RoleMaker, RoleMakerCapabilities, UserDefinedRoleMaker};
