use ndarray::Array2;

use super::{Sequential, loss::LossFn};
use crate::{Result, Scope};

/// Per parameter gradients, in the order the parameters were declared.
pub type Gradients = Vec<(String, Vec<f32>)>;

/// A differentiable scalar loss over the variables of a `Scope`.
pub trait Objective {
    /// The names of the parameters the loss depends on.
    fn params(&self) -> Vec<String>;

    /// Evaluates the loss.
    fn value(&self, scope: &Scope) -> Result<f32>;

    /// Evaluates the loss and its gradient w.r.t. every parameter in `params`.
    fn gradients(&self, scope: &Scope) -> Result<(f32, Gradients)>;
}

/// A supervised loss: a model evaluated on a fixed batch of inputs and targets.
pub struct Supervised<L: LossFn> {
    model: Sequential,
    loss_fn: L,
    x: Array2<f32>,
    y: Array2<f32>,
}

impl<L: LossFn> Supervised<L> {
    pub fn new(model: Sequential, loss_fn: L, x: Array2<f32>, y: Array2<f32>) -> Self {
        Self {
            model,
            loss_fn,
            x,
            y,
        }
    }
}

impl<L: LossFn> Objective for Supervised<L> {
    fn params(&self) -> Vec<String> {
        self.model.param_names()
    }

    fn value(&self, scope: &Scope) -> Result<f32> {
        let y_pred = self.model.forward(scope, self.x.view())?;
        Ok(self.loss_fn.loss(y_pred.view(), self.y.view()))
    }

    fn gradients(&self, scope: &Scope) -> Result<(f32, Gradients)> {
        let (loss, grads) =
            self.model
                .backprop(scope, &self.loss_fn, self.x.view(), self.y.view())?;

        Ok((loss, self.params().into_iter().zip(grads).collect()))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{activations::ActFn, layers::Dense, loss::Mse},
        initialization::Init,
        optimization::{GradientDescent, Optimizer},
    };

    fn xor() -> (Supervised<Mse>, Scope) {
        let model = Sequential::new([
            Dense::new((2, 4), Some(ActFn::Tanh)),
            Dense::new((4, 1), Some(ActFn::sigmoid(1.))),
        ]);

        let mut scope = Scope::new();
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(3)));
        model
            .declare(&mut scope, Init::XavierUniform, &rng)
            .unwrap();

        let x = array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]];
        let y = array![[0.], [1.], [1.], [0.]];
        (Supervised::new(model, Mse, x, y), scope)
    }

    #[test]
    fn gradients_are_named_per_layer() {
        let (objective, scope) = xor();
        let (_, grads) = objective.gradients(&scope).unwrap();

        let names: Vec<_> = grads.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["fc_0", "fc_1"]);
        assert_eq!(grads[0].1.len(), 12);
        assert_eq!(grads[1].1.len(), 5);
    }

    #[test]
    fn descent_lowers_the_loss() {
        let (objective, mut scope) = xor();
        let before = objective.value(&scope).unwrap();

        let mut opt = GradientDescent::new(0.5);
        for _ in 0..50 {
            let (_, grads) = objective.gradients(&scope).unwrap();
            for (name, grad) in grads {
                let var = scope.get_mut(&name).unwrap();
                opt.update_params(&grad, &mut var.data).unwrap();
            }
        }

        assert!(objective.value(&scope).unwrap() < before);
    }
}
