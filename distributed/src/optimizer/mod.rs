mod adapter;
mod collective;
mod local;
mod mixed_precision;
mod parameter_server;

pub use adapter::{DistributedOptimizerBase, Losses, OptimizerAdapter};
pub use collective::CollectiveOptimizer;
pub use local::{
    Capabilities, LocalOptimizer, OpKind, OptimizeOp, ParamGrad, ParamsGrads, SgdOptimizer,
    merge_grads,
};
pub use mixed_precision::{LOSS_SCALING, LossScaling, MixedPrecision};
pub use parameter_server::ParameterServerOptimizer;
