use crate::{MlErr, Result};

/// An update rule for one parameter tensor.
///
/// Stateful rules (momentum, Adam) keep per element state, so an instance is
/// bound to a single tensor for its whole life.
pub trait Optimizer {
    /// Takes one step over `params` using `grad`.
    ///
    /// # Arguments
    /// * `grad` - The gradient of the loss w.r.t. `params`.
    /// * `params` - The values to update in place.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }
}

pub(super) fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
