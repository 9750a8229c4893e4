use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
};

use machine_learning::optimization::Optimizer;
use rayon::prelude::*;

use super::ParameterShard;
use crate::{DistributedErr, Result};

/// The parameters held by one server, partitioned in shards that are read and
/// written in parallel.
#[derive(Debug)]
pub struct ParameterStore<O: Optimizer> {
    nparams: usize,
    grad_scale: f32,
    active_idx: Arc<AtomicU8>,
    updating: Arc<AtomicBool>,
    shards: Arc<[ParameterShard<O>]>,
    shard_size: NonZeroUsize,
}

impl<O: Optimizer> Clone for ParameterStore<O> {
    fn clone(&self) -> Self {
        Self {
            nparams: self.nparams,
            grad_scale: self.grad_scale,
            active_idx: Arc::clone(&self.active_idx),
            updating: Arc::clone(&self.updating),
            shards: Arc::clone(&self.shards),
            shard_size: self.shard_size,
        }
    }
}

impl<O: Optimizer> ParameterStore<O> {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `shard_size` - The maximum amount of parameters per shard.
    /// * `params` - The initial values of the parameters.
    /// * `optimizer_factory` - Builds the update rule of a shard given its length.
    /// * `grad_scale` - Multiplies the accumulated gradient before every update.
    pub fn new<OF>(
        shard_size: NonZeroUsize,
        params: &[f32],
        mut optimizer_factory: OF,
        grad_scale: f32,
    ) -> Self
    where
        OF: FnMut(usize) -> O,
    {
        let shards: Vec<_> = params
            .chunks(shard_size.get())
            .map(|chunk| ParameterShard::new(chunk.to_vec(), optimizer_factory(chunk.len())))
            .collect();

        Self {
            nparams: params.len(),
            grad_scale,
            active_idx: Arc::new(AtomicU8::new(0)),
            updating: Arc::new(AtomicBool::new(false)),
            shards: Arc::from(shards),
            shard_size,
        }
    }

    pub fn len(&self) -> usize {
        self.nparams
    }

    pub fn is_empty(&self) -> bool {
        self.nparams == 0
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.nparams {
            return Err(DistributedErr::LengthMismatch {
                got: len,
                expected: self.nparams,
            });
        }

        Ok(())
    }
}

impl<O: Optimizer + Send> ParameterStore<O> {
    /// Adds `grad` to the active gradient buffers.
    pub fn accumulate(&self, grad: &[f32]) -> Result<()> {
        self.check_len(grad.len())?;
        let active_idx = self.active_idx.load(Ordering::Acquire) as usize;

        self.shards
            .par_iter()
            .zip(grad.par_chunks(self.shard_size.get()))
            .try_for_each(|(shard, grad)| shard.accumulate(active_idx, grad))
    }

    /// Swaps the gradient buffers and steps every shard with the frozen one.
    ///
    /// If another task is already updating this call returns immediately.
    pub fn update_params(&self) -> Result<()> {
        let acquired = self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();

        if !acquired {
            return Ok(());
        }

        let frozen_idx = self.active_idx.fetch_xor(1, Ordering::AcqRel) as usize;
        let res = self
            .shards
            .par_iter()
            .try_for_each(|shard| shard.update_params(frozen_idx, self.grad_scale));

        self.updating.store(false, Ordering::Release);
        res
    }

    /// Copies the current parameters into `out`.
    pub fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        self.check_len(out.len())?;

        self.shards
            .par_iter()
            .zip(out.par_chunks_mut(self.shard_size.get()))
            .try_for_each(|(shard, out)| shard.pull_params(out))
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::optimization::GradientDescent;

    use super::*;

    fn store(params: &[f32], shard_size: usize) -> ParameterStore<GradientDescent> {
        let shard_size = NonZeroUsize::new(shard_size).unwrap();
        ParameterStore::new(shard_size, params, |_| GradientDescent::new(1.), 1.)
    }

    #[test]
    fn ragged_shards() {
        const PARAMS: usize = 15;

        let init: Vec<f32> = (0..PARAMS).map(|i| i as f32).collect();
        let store = store(&init, 4);
        assert_eq!(store.shards.len(), 4);

        store.accumulate(&[1.; PARAMS]).unwrap();
        store.update_params().unwrap();

        let mut out = [0.; PARAMS];
        store.pull_params(&mut out).unwrap();

        let expected: Vec<f32> = init.iter().map(|p| p - 1.).collect();
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn gradients_after_the_swap_wait_for_the_next_update() {
        const PARAMS: usize = 6;

        let store = store(&[0.; PARAMS], 1);
        store.accumulate(&[1.; PARAMS]).unwrap();

        store.update_params().unwrap();
        assert_eq!(store.active_idx.load(Ordering::Acquire), 1);
        store.accumulate(&[5.; PARAMS]).unwrap();

        let mut params = [0.; PARAMS];
        store.pull_params(&mut params).unwrap();
        assert_eq!(params, [-1.; PARAMS]);

        store.update_params().unwrap();
        store.pull_params(&mut params).unwrap();
        assert_eq!(params, [-6.; PARAMS]);
    }

    #[test]
    fn concurrent_updates_are_skipped() {
        let store = store(&[0.; 4], 2);
        store.updating.store(true, Ordering::SeqCst);

        store.update_params().unwrap();
        assert_eq!(store.active_idx.load(Ordering::Acquire), 0);

        store.updating.store(false, Ordering::Release);
        store.update_params().unwrap();
        assert_eq!(store.active_idx.load(Ordering::Acquire), 1);
    }

    #[test]
    fn averages_with_a_gradient_scale() {
        let shard_size = NonZeroUsize::new(8).unwrap();
        let store = ParameterStore::new(shard_size, &[0.; 2], |_| GradientDescent::new(1.), 0.5);

        store.accumulate(&[1., 2.]).unwrap();
        store.accumulate(&[3., 2.]).unwrap();
        store.update_params().unwrap();

        let mut out = [0.; 2];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [-2., -2.]);
    }

    #[test]
    fn length_checks() {
        let store = store(&[0.; 5], 2);

        assert!(matches!(
            store.accumulate(&[1.; 4]),
            Err(DistributedErr::LengthMismatch { got: 4, expected: 5 })
        ));
        assert!(store.pull_params(&mut [0.; 6]).is_err());
    }
}
