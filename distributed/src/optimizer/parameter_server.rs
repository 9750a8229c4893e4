use std::{collections::HashSet, marker::PhantomData};

use log::warn;
use machine_learning::arch::Objective;

use super::{
    DistributedOptimizerBase, LocalOptimizer, Losses, OpKind, OptimizeOp, OptimizerAdapter,
    ParamsGrads, adapter::minimize_with, mixed_precision::all_finite,
};
use crate::{
    DistributedErr, Result, algorithm::ParameterServerAlgorithm, config::DistributedStrategy,
    role_maker::RoleMaker,
};

/// Computes gradients locally and lets the parameter servers apply them.
pub struct ParameterServerOptimizer<O: LocalOptimizer, R> {
    base: DistributedOptimizerBase<O>,
    _role_maker: PhantomData<fn() -> R>,
}

impl<O: LocalOptimizer, R: RoleMaker> ParameterServerOptimizer<O, R> {
    /// Creates a new `ParameterServerOptimizer`.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` if `optimizer` can't compute and apply gradients.
    pub fn new(optimizer: O, strategy: DistributedStrategy) -> Result<Self> {
        Ok(Self {
            base: DistributedOptimizerBase::new(optimizer, strategy)?,
            _role_maker: PhantomData,
        })
    }

    pub fn base(&self) -> &DistributedOptimizerBase<O> {
        &self.base
    }
}

impl<O, R> OptimizerAdapter for ParameterServerOptimizer<O, R>
where
    O: LocalOptimizer,
    R: RoleMaker,
{
    type Algorithm = ParameterServerAlgorithm<R>;

    async fn backward<L>(
        &mut self,
        algorithm: &mut ParameterServerAlgorithm<R>,
        loss: &L,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads>
    where
        L: Objective + Sync,
    {
        let scope = algorithm.base().executor()?.scope();
        self.base
            .optimizer_mut()
            .backward(loss, scope, parameter_list, no_grad_set)
    }

    /// Pushes the gradients and pulls the parameters the servers answer with.
    ///
    /// Every worker must push once per step for synchronous servers to make progress, so a
    /// step with non finite gradients pushes zeros instead of being left out. The local
    /// optimizer still hears about every step, so its loss scaling keeps adapting.
    async fn apply_gradients(
        &mut self,
        algorithm: &mut ParameterServerAlgorithm<R>,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        let mut ops = Vec::with_capacity(params_grads.len() * 2 + 1);
        let finite = all_finite(params_grads);

        if finite {
            algorithm.push_pull(params_grads).await?;
            ops.extend(
                params_grads
                    .iter()
                    .map(|(name, _)| OptimizeOp::new(OpKind::Push, name.as_str())),
            );
        } else {
            warn!("pushing zeros instead of non finite gradients");
            algorithm.push_pull(&Vec::new()).await?;
            ops.extend(
                params_grads
                    .iter()
                    .map(|(name, _)| OptimizeOp::new(OpKind::SkipUpdate, name.as_str())),
            );
        }

        ops.extend(
            params_grads
                .iter()
                .map(|(name, _)| OptimizeOp::new(OpKind::Pull, name.as_str())),
        );
        ops.extend(self.base.optimizer_mut().step_finished(finite));
        Ok(ops)
    }

    async fn minimize<L>(
        &mut self,
        algorithm: &mut ParameterServerAlgorithm<R>,
        losses: Losses<'_, L>,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<(Vec<OptimizeOp>, ParamsGrads)>
    where
        L: Objective + Sync,
    {
        if !algorithm.base().is_initialized() {
            return Err(DistributedErr::Uninitialized);
        }

        minimize_with(self, algorithm, losses, parameter_list, no_grad_set).await
    }
}
