use std::{fmt, path::Path};

use log::info;

use super::split;
use crate::{
    DistributedErr, Result,
    collective::ReduceOp,
    execution::{Executor, InferenceManifest, Place},
    mode::Mode,
    role::RoleContext,
    role_maker::RoleMaker,
};

/// The lifecycle of a distributed algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlgorithmState {
    #[default]
    Uninitialized,
    Initialized,
    WorkerRunning,
    ServerRunning,
    Stopped,
}

impl fmt::Display for AlgorithmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgorithmState::Uninitialized => "uninitialized",
            AlgorithmState::Initialized => "initialized",
            AlgorithmState::WorkerRunning => "worker running",
            AlgorithmState::ServerRunning => "server running",
            AlgorithmState::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

/// What every distributed strategy shares: the role maker, the execution context and
/// the lifecycle state.
pub struct AlgorithmBase<R: RoleMaker> {
    mode: Mode,
    state: AlgorithmState,
    role_maker: Option<R>,
    executor: Option<Executor>,
    optimizer_bound: bool,
}

impl<R: RoleMaker> AlgorithmBase<R> {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: AlgorithmState::Uninitialized,
            role_maker: None,
            executor: None,
            optimizer_bound: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> AlgorithmState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: AlgorithmState) {
        self.state = state;
    }

    pub fn is_initialized(&self) -> bool {
        self.role_maker.is_some()
    }

    /// Runs role discovery with `role_maker` and binds a CPU execution context.
    ///
    /// # Errors
    /// * `DistributedErr::AlreadyInitialized` on a second call.
    /// * `DistributedErr::TypeMismatch` if `role_maker` lacks the capabilities of the mode.
    /// * Whatever `RoleMaker::generate_role` fails with.
    pub async fn init(&mut self, mut role_maker: R) -> Result<()> {
        if self.is_initialized() {
            return Err(DistributedErr::AlreadyInitialized);
        }

        let required = self.mode.required_capabilities();
        if !role_maker.capabilities().contains(&required) {
            return Err(DistributedErr::TypeMismatch {
                expected: format!("a role maker supporting {required}"),
                got: role_maker.name().to_string(),
            });
        }

        role_maker.generate_role().await?;

        let kind = role_maker.context().kind()?;
        info!("initialized as a {kind} in {} mode", self.mode);

        self.role_maker = Some(role_maker);
        self.executor = Some(Executor::new(Place::Cpu));
        self.state = AlgorithmState::Initialized;
        Ok(())
    }

    /// The role of this process.
    ///
    /// # Errors
    /// `DistributedErr::UninitializedRole` before `init`.
    pub fn context(&self) -> Result<&RoleContext> {
        self.role_maker
            .as_ref()
            .map(|role_maker| role_maker.context())
            .ok_or(DistributedErr::UninitializedRole)
    }

    fn role_maker_mut(&mut self) -> Result<&mut R> {
        self.role_maker.as_mut().ok_or(DistributedErr::Uninitialized)
    }

    pub fn executor(&self) -> Result<&Executor> {
        self.executor.as_ref().ok_or(DistributedErr::Uninitialized)
    }

    pub fn executor_mut(&mut self) -> Result<&mut Executor> {
        self.executor.as_mut().ok_or(DistributedErr::Uninitialized)
    }

    pub fn optimizer_bound(&self) -> bool {
        self.optimizer_bound
    }

    pub(crate) fn bind_optimizer(&mut self) {
        self.optimizer_bound = true;
    }

    /// The part of `files` this worker reads.
    ///
    /// # Errors
    /// `DistributedErr::UninitializedRole` before `init`.
    pub fn split_files<T: Clone>(&self, files: &[T]) -> Result<Vec<T>> {
        let context = self.context()?;
        let (index, workers) = (context.worker_index()?, context.worker_num()?);
        Ok(split::split_files(files, index, workers))
    }

    /// Sums `input` across all workers into `output`.
    pub async fn all_reduce_worker(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.all_reduce_worker_with(input, output, ReduceOp::Sum)
            .await
    }

    /// Reduces `input` across all workers into `output` with `op`.
    pub async fn all_reduce_worker_with(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        op: ReduceOp,
    ) -> Result<()> {
        self.role_maker_mut()?
            .all_reduce_worker(input, output, op)
            .await
    }

    /// Blocks until every worker reached the barrier.
    pub async fn barrier_worker(&mut self) -> Result<()> {
        self.role_maker_mut()?.barrier_worker().await
    }

    /// Saves the persistable variables of the execution context into `dirname`.
    pub fn save_persistables<P: AsRef<Path>>(&self, dirname: P) -> Result<usize> {
        self.executor()?.save_persistables(dirname)
    }

    /// Exports the model of the execution context for inference into `dirname`.
    pub fn save_inference_model<P: AsRef<Path>>(
        &self,
        dirname: P,
        feeded_var_names: &[String],
        target_vars: &[String],
        export_for_deployment: bool,
    ) -> Result<InferenceManifest> {
        self.executor()?.save_inference_model(
            dirname,
            feeded_var_names,
            target_vars,
            export_for_deployment,
        )
    }
}
