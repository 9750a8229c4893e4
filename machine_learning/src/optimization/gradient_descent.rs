use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Plain stochastic gradient descent, `p -= lr * g`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The length of each step.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;

        let lr = self.learning_rate;
        params.iter_mut().zip(grad).for_each(|(p, g)| *p -= lr * g);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_gradient() {
        let mut params = [1., 2.];
        GradientDescent::new(0.5)
            .update_params(&[2., -2.], &mut params)
            .unwrap();

        assert_eq!(params, [0., 3.]);
    }

    #[test]
    fn size_mismatch() {
        let mut params = [1., 2.];
        assert!(
            GradientDescent::new(0.1)
                .update_params(&[1.], &mut params)
                .is_err()
        );
    }
}
