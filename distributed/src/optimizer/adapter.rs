use std::{collections::HashSet, slice};

use machine_learning::arch::Objective;

use super::{LocalOptimizer, OptimizeOp, ParamsGrads, merge_grads};
use crate::{DistributedErr, Result, config::DistributedStrategy};

/// The losses handed to `minimize`.
#[derive(Debug)]
pub enum Losses<'a, L> {
    One(&'a L),
    /// Several losses optimized together, their gradients are summed per parameter.
    Many(&'a [L]),
}

impl<'a, L> Losses<'a, L> {
    pub fn iter(&self) -> slice::Iter<'a, L> {
        match *self {
            Losses::One(loss) => slice::from_ref(loss).iter(),
            Losses::Many(losses) => losses.iter(),
        }
    }
}

impl<L> Clone for Losses<'_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for Losses<'_, L> {}

/// The local optimizer and strategy every distributed adapter wraps.
pub struct DistributedOptimizerBase<O: LocalOptimizer> {
    optimizer: O,
    strategy: DistributedStrategy,
}

impl<O: LocalOptimizer> DistributedOptimizerBase<O> {
    /// Creates a new `DistributedOptimizerBase`.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` unless `optimizer` can both compute and apply gradients.
    pub fn new(optimizer: O, strategy: DistributedStrategy) -> Result<Self> {
        let caps = optimizer.capabilities();

        if !(caps.backward && caps.apply_gradients) {
            return Err(DistributedErr::TypeMismatch {
                expected: "an optimizer supporting backward and apply_gradients".to_string(),
                got: optimizer.name().to_string(),
            });
        }

        Ok(Self {
            optimizer,
            strategy,
        })
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    pub fn strategy(&self) -> &DistributedStrategy {
        &self.strategy
    }
}

/// Wraps a local optimizer with the communication of a distributed strategy.
#[allow(unused)]
#[trait_variant::make(OptimizerAdapter: Send)]
pub trait LocalOptimizerAdapter {
    /// The distributed algorithm this adapter communicates through.
    type Algorithm: Send;

    /// Computes the gradients of `loss` as seen by the whole job.
    ///
    /// # Arguments
    /// * `algorithm` - The initialized algorithm of this process.
    /// * `loss` - The loss to differentiate.
    /// * `parameter_list` - Restricts the result to these parameters, all of them if `None`.
    /// * `no_grad_set` - Parameters left out of the result.
    async fn backward<L>(
        &mut self,
        algorithm: &mut Self::Algorithm,
        loss: &L,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads>
    where
        L: Objective + Sync;

    /// Applies `params_grads` to the parameters of this process.
    ///
    /// # Returns
    /// The operations performed, in order.
    async fn apply_gradients(
        &mut self,
        algorithm: &mut Self::Algorithm,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>>;

    /// Runs `backward` over every loss then `apply_gradients` with the summed gradients.
    async fn minimize<L>(
        &mut self,
        algorithm: &mut Self::Algorithm,
        losses: Losses<'_, L>,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<(Vec<OptimizeOp>, ParamsGrads)>
    where
        L: Objective + Sync;
}

/// Drives `minimize` through an adapter's `backward` and `apply_gradients`.
pub(crate) async fn minimize_with<A, L>(
    adapter: &mut A,
    algorithm: &mut A::Algorithm,
    losses: Losses<'_, L>,
    parameter_list: Option<&[String]>,
    no_grad_set: &HashSet<String>,
) -> Result<(Vec<OptimizeOp>, ParamsGrads)>
where
    A: OptimizerAdapter,
    L: Objective + Sync,
{
    let mut losses = losses.iter();
    let first = losses.next().ok_or_else(|| {
        DistributedErr::InvalidConfig("minimize needs at least one loss".to_string())
    })?;

    let mut params_grads = adapter
        .backward(algorithm, first, parameter_list, no_grad_set)
        .await?;

    for loss in losses {
        let grads = adapter
            .backward(algorithm, loss, parameter_list, no_grad_set)
            .await?;
        merge_grads(&mut params_grads, grads)?;
    }

    let ops = adapter.apply_gradients(algorithm, &params_grads).await?;
    Ok((ops, params_grads))
}
