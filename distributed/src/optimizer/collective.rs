use std::{collections::HashSet, marker::PhantomData};

use log::debug;
use machine_learning::arch::Objective;

use super::{
    DistributedOptimizerBase, LocalOptimizer, Losses, OpKind, OptimizeOp, OptimizerAdapter,
    ParamsGrads, adapter::minimize_with,
};
use crate::{
    DistributedErr, Result, algorithm::CollectiveAlgorithm, config::DistributedStrategy,
    role_maker::RoleMaker,
};

/// Sums the gradients of every worker with an all reduce before applying them locally.
pub struct CollectiveOptimizer<O: LocalOptimizer, R> {
    base: DistributedOptimizerBase<O>,
    /// The all reduce ops of the last `backward`, reported by the next `apply_gradients`.
    pending: Vec<OptimizeOp>,
    _role_maker: PhantomData<fn() -> R>,
}

impl<O: LocalOptimizer, R: RoleMaker> CollectiveOptimizer<O, R> {
    /// Creates a new `CollectiveOptimizer`.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` if `optimizer` can't compute and apply gradients.
    pub fn new(optimizer: O, strategy: DistributedStrategy) -> Result<Self> {
        Ok(Self {
            base: DistributedOptimizerBase::new(optimizer, strategy)?,
            pending: Vec::new(),
            _role_maker: PhantomData,
        })
    }

    pub fn base(&self) -> &DistributedOptimizerBase<O> {
        &self.base
    }
}

impl<O, R> OptimizerAdapter for CollectiveOptimizer<O, R>
where
    O: LocalOptimizer,
    R: RoleMaker,
{
    type Algorithm = CollectiveAlgorithm<R>;

    async fn backward<L>(
        &mut self,
        algorithm: &mut CollectiveAlgorithm<R>,
        loss: &L,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads>
    where
        L: Objective + Sync,
    {
        let mut params_grads = {
            let scope = algorithm.base().executor()?.scope();
            self.base
                .optimizer_mut()
                .backward(loss, scope, parameter_list, no_grad_set)?
        };

        let flat: Vec<f32> = params_grads
            .iter()
            .flat_map(|(_, grad)| grad.iter().copied())
            .collect();

        let mut reduced = vec![0.; flat.len()];
        algorithm
            .base_mut()
            .all_reduce_worker(&flat, &mut reduced)
            .await?;

        if self.base.strategy().average_gradients {
            let workers = algorithm.base().context()?.worker_num()?;
            let scale = 1. / workers as f32;
            reduced.iter_mut().for_each(|g| *g *= scale);
        }

        let mut offset = 0;
        for (name, grad) in params_grads.iter_mut() {
            let len = grad.len();
            grad.copy_from_slice(&reduced[offset..offset + len]);
            offset += len;
            self.pending
                .push(OptimizeOp::new(OpKind::AllReduce, name.as_str()));
        }

        debug!(values = flat.len(); "all reduced the gradients");
        Ok(params_grads)
    }

    async fn apply_gradients(
        &mut self,
        algorithm: &mut CollectiveAlgorithm<R>,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        let scope = algorithm.base_mut().executor_mut()?.scope_mut();
        let applied = self
            .base
            .optimizer_mut()
            .apply_gradients(scope, params_grads)?;

        let mut ops: Vec<_> = self.pending.drain(..).collect();
        ops.extend(applied);
        Ok(ops)
    }

    async fn minimize<L>(
        &mut self,
        algorithm: &mut CollectiveAlgorithm<R>,
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
