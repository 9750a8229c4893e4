use std::path::Path;

use log::{debug, info};

use super::{AlgorithmBase, AlgorithmState, ParamLayout};
use crate::{
    DistributedErr, Result,
    config::DistributedStrategy,
    execution::InferenceManifest,
    mode::Mode,
    optimizer::{CollectiveOptimizer, LocalOptimizer},
    role::RoleKind,
    role_maker::RoleMaker,
};

/// Peer to peer training: workers keep a full replica of the model and all reduce
/// their gradients, there are no servers.
pub struct CollectiveAlgorithm<R: RoleMaker> {
    base: AlgorithmBase<R>,
}

impl<R: RoleMaker> Default for CollectiveAlgorithm<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RoleMaker> CollectiveAlgorithm<R> {
    pub fn new() -> Self {
        Self {
            base: AlgorithmBase::new(Mode::Collective),
        }
    }

    pub fn base(&self) -> &AlgorithmBase<R> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AlgorithmBase<R> {
        &mut self.base
    }

    fn misuse(&self, op: &'static str) -> DistributedErr {
        match self.base.context().and_then(|context| context.kind()) {
            Ok(kind) => DistributedErr::RoleMisuse { op, kind },
            Err(e) => e,
        }
    }

    fn expect_worker(&self, op: &'static str) -> Result<()> {
        match self.base.context()?.kind()? {
            RoleKind::Worker => Ok(()),
            kind => Err(DistributedErr::RoleMisuse { op, kind }),
        }
    }

    /// Replaces every worker's persistables with the first worker's.
    async fn broadcast_persistables(&mut self) -> Result<()> {
        let is_first = self.base.context()?.is_first_worker()?;

        let (layout, input) = {
            let scope = self.base.executor()?.scope();
            let layout = ParamLayout::of(scope);

            let input = if is_first {
                layout.gather(scope)?
            } else {
                vec![0.; layout.len()]
            };

            (layout, input)
        };

        let mut output = vec![0.; layout.len()];
        self.base.all_reduce_worker(&input, &mut output).await?;
        layout.scatter(&output, self.base.executor_mut()?.scope_mut())?;

        debug!(params = layout.len(); "synchronized the persistables with the first worker");
        Ok(())
    }

    /// Starts the worker once every worker holds the first worker's parameters.
    ///
    /// # Errors
    /// `DistributedErr::UninitializedRole` before `init`.
    pub async fn init_worker(&mut self) -> Result<()> {
        self.expect_worker("init_worker")?;

        self.broadcast_persistables().await?;
        self.base.barrier_worker().await?;

        info!("collective worker running");
        self.base.set_state(AlgorithmState::WorkerRunning);
        Ok(())
    }

    /// There are no servers in collective training.
    pub async fn init_server(&mut self, _model_dir: Option<&Path>) -> Result<()> {
        Err(self.misuse("init_server"))
    }

    /// There are no servers in collective training.
    pub async fn run_server(&mut self) -> Result<()> {
        Err(self.misuse("run_server"))
    }

    /// Waits for every worker and stops.
    pub async fn stop_worker(&mut self) -> Result<()> {
        self.expect_worker("stop_worker")?;

        self.base.barrier_worker().await?;

        info!("collective worker stopped");
        self.base.set_state(AlgorithmState::Stopped);
        Ok(())
    }

    /// Wraps `optimizer` so its gradients are all reduced among the workers.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` if `optimizer` can't compute and apply gradients.
    pub fn distributed_optimizer<O: LocalOptimizer>(
        &mut self,
        optimizer: O,
        strategy: Option<DistributedStrategy>,
    ) -> Result<CollectiveOptimizer<O, R>> {
        let optimizer = CollectiveOptimizer::new(optimizer, strategy.unwrap_or_default())?;
        self.base.bind_optimizer();
        Ok(optimizer)
    }

    /// Every worker holds the same parameters, so every worker writes its own copy.
    pub fn save_persistables<P: AsRef<Path>>(&self, dirname: P) -> Result<Option<usize>> {
        self.base.save_persistables(dirname).map(Some)
    }

    pub fn save_inference_model<P: AsRef<Path>>(
        &self,
        dirname: P,
        feeded_var_names: &[String],
        target_vars: &[String],
        export_for_deployment: bool,
    ) -> Result<Option<InferenceManifest>> {
        self.base
            .save_inference_model(dirname, feeded_var_names, target_vars, export_for_deployment)
            .map(Some)
    }
}
