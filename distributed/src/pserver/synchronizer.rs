use std::sync::Arc;

use machine_learning::optimization::Optimizer;
use tokio::sync::Barrier;

use super::ParameterHandle;
use crate::Result;

/// Executes a single parameter update step on behalf of one worker.
#[allow(unused)]
#[trait_variant::make(Synchronizer: Send)]
pub trait SynchronizerTemplate: Clone {
    /// Accumulates `grad`, updates the parameters when appropriate and writes the
    /// resulting parameters into `params`.
    ///
    /// # Arguments
    /// * `handle` - The handle to the server's parameters.
    /// * `grad` - The worker's gradient.
    /// * `params` - Where to write the parameters the worker continues with.
    ///
    /// # Errors
    /// `DistributedErr::LengthMismatch` if `grad` or `params` don't match the store.
    async fn step<O>(
        &self,
        handle: &ParameterHandle<O>,
        grad: &[f32],
        params: &mut [f32],
    ) -> Result<()>
    where
        O: Optimizer + Send;
}

/// Synchronous training: every worker's gradient of a step is accumulated before updating.
#[derive(Clone)]
pub struct BarrierSync {
    barrier: Arc<Barrier>,
}

impl BarrierSync {
    /// Creates a new `BarrierSync`.
    ///
    /// # Arguments
    /// * `workers` - The amount of workers taking part in every step.
    pub fn new(workers: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(workers)),
        }
    }
}

impl Synchronizer for BarrierSync {
    async fn step<O>(
        &self,
        handle: &ParameterHandle<O>,
        grad: &[f32],
        params: &mut [f32],
    ) -> Result<()>
    where
        O: Optimizer + Send,
    {
        handle.accumulate(grad).await?;

        let res = if self.barrier.wait().await.is_leader() {
            handle.update_params().await
        } else {
            Ok(())
        };

        // Every task must reach the second barrier, even if the update failed.
        self.barrier.wait().await;
        res?;

        handle.pull_params(params).await
    }
}

/// Asynchronous training: every gradient is applied as soon as it arrives.
#[derive(Clone, Default)]
pub struct NoBlockingSync;

impl NoBlockingSync {
    pub fn new() -> Self {
        Self
    }
}

impl Synchronizer for NoBlockingSync {
    async fn step<O>(
        &self,
        handle: &ParameterHandle<O>,
        grad: &[f32],
        params: &mut [f32],
    ) -> Result<()>
    where
        O: Optimizer + Send,
    {
        handle.accumulate(grad).await?;
        handle.update_params().await?;
        handle.pull_params(params).await
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use machine_learning::optimization::GradientDescent;

    use super::{BarrierSync, NoBlockingSync, ParameterHandle, Synchronizer};
    use crate::pserver::ParameterStore;

    fn handle(params: &[f32]) -> ParameterHandle<GradientDescent> {
        let shard_size = NonZeroUsize::new(2).unwrap();
        let store = ParameterStore::new(shard_size, params, |_| GradientDescent::new(1.), 1.);
        ParameterHandle::new(store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn barrier_applies_every_gradient_once() {
        let handle = handle(&[0.; 3]);
        let sync = BarrierSync::new(2);

        let (a, b) = tokio::join!(
            async {
                let mut out = [0.; 3];
                sync.step(&handle, &[1., 1., 1.], &mut out).await.map(|_| out)
            },
            async {
                let mut out = [0.; 3];
                sync.step(&handle, &[2., 0., -1.], &mut out).await.map(|_| out)
            }
        );

        assert_eq!(a.unwrap(), [-3., -1., 0.]);
        assert_eq!(b.unwrap(), [-3., -1., 0.]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_blocking_applies_immediately() {
        let handle = handle(&[1., 1.]);
        let sync = NoBlockingSync::new();

        let mut out = [0.; 2];
        sync.step(&handle, &[0.5, -0.5], &mut out).await.unwrap();
        assert_eq!(out, [0.5, 1.5]);
    }
}
