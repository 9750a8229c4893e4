use machine_learning::optimization::Optimizer;
use parking_lot::{Mutex, RwLock};

use crate::{DistributedErr, Result};

/// A slice of the parameters held by a server, with its own update rule.
///
/// Gradients are double buffered: workers keep accumulating into the active buffer
/// while the frozen one is consumed by `update_params`.
#[derive(Debug)]
pub struct ParameterShard<O: Optimizer> {
    nparams: usize,
    grads: [Mutex<Box<[f32]>>; 2],
    params: RwLock<Box<[f32]>>,
    optimizer: Mutex<O>,
}

impl<O: Optimizer> ParameterShard<O> {
    /// Creates a new `ParameterShard`.
    ///
    /// # Arguments
    /// * `params` - The initial values of the parameters.
    /// * `optimizer` - The update rule of this shard.
    pub fn new(params: Vec<f32>, optimizer: O) -> Self {
        let nparams = params.len();

        Self {
            nparams,
            grads: [
                Mutex::new(vec![0.; nparams].into_boxed_slice()),
                Mutex::new(vec![0.; nparams].into_boxed_slice()),
            ],
            params: RwLock::new(params.into_boxed_slice()),
            optimizer: Mutex::new(optimizer),
        }
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

    /// Adds `grad` to the gradient buffer at `active_idx`.
    pub fn accumulate(&self, active_idx: usize, grad: &[f32]) -> Result<()> {
        self.check_len(grad.len())?;

        self.grads[active_idx]
            .lock()
            .iter_mut()
            .zip(grad)
            .for_each(|(acc, g)| *acc += g);

        Ok(())
    }

    /// Steps the parameters with the gradient buffer at `frozen_idx` and clears it.
    ///
    /// # Arguments
    /// * `frozen_idx` - The buffer no worker is accumulating into.
    /// * `grad_scale` - Multiplies the accumulated gradient before the step.
    pub fn update_params(&self, frozen_idx: usize, grad_scale: f32) -> Result<()> {
        let mut params = self.params.write();
        let mut grad = self.grads[frozen_idx].lock();

        if grad_scale != 1. {
            grad.iter_mut().for_each(|g| *g *= grad_scale);
        }

        self.optimizer.lock().update_params(&grad, &mut params)?;
        grad.fill(0.);
        Ok(())
    }

    /// Copies the current parameters into `out`.
    pub fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        self.check_len(out.len())?;
        out.copy_from_slice(&self.params.read());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::optimization::GradientDescent;

    use super::*;

    #[test]
    fn accumulates_into_the_active_buffer() {
        let shard = ParameterShard::new(vec![0.; 3], GradientDescent::new(1.));

        shard.accumulate(0, &[1., 2., 3.]).unwrap();
        shard.accumulate(0, &[1., 1., 1.]).unwrap();
        assert_eq!(**shard.grads[1].lock(), [0.; 3]);

        shard.update_params(0, 1.).unwrap();

        let mut out = [0.; 3];
        shard.pull_params(&mut out).unwrap();
        assert_eq!(out, [-2., -3., -4.]);
        assert_eq!(**shard.grads[0].lock(), [0.; 3]);
    }

    #[test]
    fn scales_before_stepping() {
        let shard = ParameterShard::new(vec![1.], GradientDescent::new(0.5));

        shard.accumulate(1, &[2.]).unwrap();
        shard.accumulate(1, &[4.]).unwrap();
        shard.update_params(1, 0.5).unwrap();

        let mut out = [0.];
        shard.pull_params(&mut out).unwrap();
        assert_eq!(out, [-0.5]);
    }

    #[test]
    fn rejects_wrong_lengths() {
        let shard = ParameterShard::new(vec![0.; 2], GradientDescent::new(1.));

        assert!(matches!(
            shard.accumulate(0, &[1.]),
            Err(DistributedErr::LengthMismatch { got: 1, expected: 2 })
        ));
        assert!(shard.pull_params(&mut [0.; 3]).is_err());
    }
}
