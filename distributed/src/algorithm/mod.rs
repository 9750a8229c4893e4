mod base;
mod collective;
mod layout;
mod parameter_server;
mod split;

use std::{collections::HashSet, path::Path};

use machine_learning::arch::Objective;

pub use base::{AlgorithmBase, AlgorithmState};
pub use collective::CollectiveAlgorithm;
pub(crate) use layout::ParamLayout;
pub use parameter_server::ParameterServerAlgorithm;
pub use split::{partition_range, split_files};

use crate::{
    DistributedErr, Result,
    collective::ReduceOp,
    config::DistributedStrategy,
    execution::{Executor, InferenceManifest},
    mode::Mode,
    optimizer::{
        CollectiveOptimizer, LocalOptimizer, Losses, OptimizeOp, OptimizerAdapter,
        ParameterServerOptimizer, ParamsGrads,
    },
    role::RoleContext,
    role_maker::RoleMaker,
};

/// The distributed training driver of a process, tagged by strategy.
pub enum Algorithm<R: RoleMaker> {
    ParameterServer(ParameterServerAlgorithm<R>),
    Collective(CollectiveAlgorithm<R>),
}

impl<R: RoleMaker> Algorithm<R> {
    /// Creates the algorithm that runs `mode`.
    pub fn new(mode: Mode) -> Self {
        match mode {
            Mode::Transpiler | Mode::PsLib => {
                Algorithm::ParameterServer(ParameterServerAlgorithm::new(mode))
            }
            Mode::Collective => Algorithm::Collective(CollectiveAlgorithm::new()),
        }
    }

    pub fn base(&self) -> &AlgorithmBase<R> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.base(),
            Algorithm::Collective(algorithm) => algorithm.base(),
        }
    }

    pub fn base_mut(&mut self) -> &mut AlgorithmBase<R> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.base_mut(),
            Algorithm::Collective(algorithm) => algorithm.base_mut(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.base().mode()
    }

    pub fn state(&self) -> AlgorithmState {
        self.base().state()
    }

    /// Runs role discovery and binds the execution context.
    ///
    /// # Errors
    /// * `DistributedErr::AlreadyInitialized` on a second call.
    /// * `DistributedErr::TypeMismatch` if `role_maker` lacks the capabilities of the mode.
    pub async fn init(&mut self, role_maker: R) -> Result<()> {
        self.base_mut().init(role_maker).await
    }

    pub fn context(&self) -> Result<&RoleContext> {
        self.base().context()
    }

    pub fn is_first_worker(&self) -> Result<bool> {
        self.context()?.is_first_worker()
    }

    pub fn worker_index(&self) -> Result<usize> {
        self.context()?.worker_index()
    }

    pub fn worker_num(&self) -> Result<usize> {
        self.context()?.worker_num()
    }

    pub fn is_worker(&self) -> Result<bool> {
        self.context()?.is_worker()
    }

    pub fn worker_endpoints(&self) -> Result<&[String]> {
        self.context()?.worker_endpoints()
    }

    pub fn server_num(&self) -> Result<usize> {
        self.context()?.server_num()
    }

    pub fn server_index(&self) -> Result<usize> {
        self.context()?.server_index()
    }

    pub fn server_endpoints(&self) -> Result<&[String]> {
        self.context()?.server_endpoints()
    }

    pub fn is_server(&self) -> Result<bool> {
        self.context()?.is_server()
    }

    pub fn executor(&self) -> Result<&Executor> {
        self.base().executor()
    }

    pub fn executor_mut(&mut self) -> Result<&mut Executor> {
        self.base_mut().executor_mut()
    }

    pub async fn init_worker(&mut self) -> Result<()> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.init_worker().await,
            Algorithm::Collective(algorithm) => algorithm.init_worker().await,
        }
    }

    pub async fn init_server(&mut self, model_dir: Option<&Path>) -> Result<()> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.init_server(model_dir).await,
            Algorithm::Collective(algorithm) => algorithm.init_server(model_dir).await,
        }
    }

    pub async fn run_server(&mut self) -> Result<()> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.run_server().await,
            Algorithm::Collective(algorithm) => algorithm.run_server().await,
        }
    }

    pub async fn stop_worker(&mut self) -> Result<()> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.stop_worker().await,
            Algorithm::Collective(algorithm) => algorithm.stop_worker().await,
        }
    }

    /// Binds `optimizer` to this algorithm's strategy.
    ///
    /// # Arguments
    /// * `optimizer` - The local optimizer to wrap.
    /// * `strategy` - The strategy configuration, the default one if `None`.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` if `optimizer` can't compute and apply gradients.
    pub fn distributed_optimizer<O: LocalOptimizer>(
        &mut self,
        optimizer: O,
        strategy: Option<DistributedStrategy>,
    ) -> Result<DistributedOptimizer<O, R>> {
        let optimizer = match self {
            Algorithm::ParameterServer(algorithm) => DistributedOptimizer::ParameterServer(
                algorithm.distributed_optimizer(optimizer, strategy)?,
            ),
            Algorithm::Collective(algorithm) => {
                DistributedOptimizer::Collective(algorithm.distributed_optimizer(optimizer, strategy)?)
            }
        };

        Ok(optimizer)
    }

    /// Saves the persistable variables into `dirname`.
    ///
    /// # Returns
    /// The amount of variables written, `None` if this process doesn't write.
    pub fn save_persistables<P: AsRef<Path>>(&self, dirname: P) -> Result<Option<usize>> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.save_persistables(dirname),
            Algorithm::Collective(algorithm) => algorithm.save_persistables(dirname),
        }
    }

    /// Exports the model for inference into `dirname`.
    ///
    /// # Returns
    /// The written manifest, `None` if this process doesn't write.
    pub fn save_inference_model<P: AsRef<Path>>(
        &self,
        dirname: P,
        feeded_var_names: &[String],
        target_vars: &[String],
        export_for_deployment: bool,
    ) -> Result<Option<InferenceManifest>> {
        match self {
            Algorithm::ParameterServer(algorithm) => algorithm.save_inference_model(
                dirname,
                feeded_var_names,
                target_vars,
                export_for_deployment,
            ),
            Algorithm::Collective(algorithm) => algorithm.save_inference_model(
                dirname,
                feeded_var_names,
                target_vars,
                export_for_deployment,
            ),
        }
    }

    /// The part of `files` this worker reads.
    pub fn split_files<T: Clone>(&self, files: &[T]) -> Result<Vec<T>> {
        self.base().split_files(files)
    }

    pub async fn all_reduce_worker(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.base_mut().all_reduce_worker(input, output).await
    }

    pub async fn all_reduce_worker_with(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        op: ReduceOp,
    ) -> Result<()> {
        self.base_mut()
            .all_reduce_worker_with(input, output, op)
            .await
    }

    pub async fn barrier_worker(&mut self) -> Result<()> {
        self.base_mut().barrier_worker().await
    }
}

/// The optimizer adapter bound by `Algorithm::distributed_optimizer`.
pub enum DistributedOptimizer<O: LocalOptimizer, R: RoleMaker> {
    ParameterServer(ParameterServerOptimizer<O, R>),
    Collective(CollectiveOptimizer<O, R>),
}

impl<O: LocalOptimizer, R: RoleMaker> DistributedOptimizer<O, R> {
    fn mismatch(&self, algorithm: &Algorithm<R>) -> DistributedErr {
        let expected = match self {
            DistributedOptimizer::ParameterServer(_) => "a parameter server algorithm",
            DistributedOptimizer::Collective(_) => "a collective algorithm",
        };

        DistributedErr::TypeMismatch {
            expected: expected.to_string(),
            got: format!("a {} algorithm", algorithm.mode()),
        }
    }
}

impl<O, R> OptimizerAdapter for DistributedOptimizer<O, R>
where
    O: LocalOptimizer,
    R: RoleMaker,
{
    type Algorithm = Algorithm<R>;

    async fn backward<L>(
        &mut self,
        algorithm: &mut Algorithm<R>,
        loss: &L,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads>
    where
        L: Objective + Sync,
    {
        match (&mut *self, &mut *algorithm) {
            (DistributedOptimizer::ParameterServer(opt), Algorithm::ParameterServer(algo)) => {
                opt.backward(algo, loss, parameter_list, no_grad_set).await
            }
            (DistributedOptimizer::Collective(opt), Algorithm::Collective(algo)) => {
                opt.backward(algo, loss, parameter_list, no_grad_set).await
            }
            _ => Err(self.mismatch(algorithm)),
        }
    }

    async fn apply_gradients(
        &mut self,
        algorithm: &mut Algorithm<R>,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        match (&mut *self, &mut *algorithm) {
            (DistributedOptimizer::ParameterServer(opt), Algorithm::ParameterServer(algo)) => {
                opt.apply_gradients(algo, params_grads).await
            }
            (DistributedOptimizer::Collective(opt), Algorithm::Collective(algo)) => {
                opt.apply_gradients(algo, params_grads).await
            }
            _ => Err(self.mismatch(algorithm)),
        }
    }

    async fn minimize<L>(
        &mut self,
        algorithm: &mut Algorithm<R>,
        losses: Losses<'_, L>,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<(Vec<OptimizeOp>, ParamsGrads)>
    where
        L: Objective + Sync,
    {
        match (&mut *self, &mut *algorithm) {
            (DistributedOptimizer::ParameterServer(opt), Algorithm::ParameterServer(algo)) => {
                opt.minimize(algo, losses, parameter_list, no_grad_set)
                    .await
            }
            (DistributedOptimizer::Collective(opt), Algorithm::Collective(algo)) => {
                opt.minimize(algo, losses, parameter_list, no_grad_set)
                    .await
            }
            _ => Err(self.mismatch(algorithm)),
        }
    }
}
