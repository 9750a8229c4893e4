use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    layers::{Dense, DenseCache},
    loss::LossFn,
};
use crate::{
    MlErr, Result, Scope, Variable,
    initialization::{Fan, Init},
};

/// A feed-forward stack of dense layers whose parameters live in a `Scope`,
/// one variable per layer named `fc_{i}`.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Dense>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn param_name(i: usize) -> String {
        format!("fc_{i}")
    }

    /// The names of the model's parameters, in layer order.
    pub fn param_names(&self) -> Vec<String> {
        (0..self.layers.len()).map(Self::param_name).collect()
    }

    /// The total amount of parameters of the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Dense::size).sum()
    }

    /// Declares the model's parameters in `scope`, drawing the weights from
    /// `init` and zeroing the biases.
    ///
    /// # Arguments
    /// * `scope` - Where the parameters are created.
    /// * `init` - The initialization scheme for the weights.
    /// * `rng` - The shared random generator.
    pub fn declare<R: Rng + 'static>(
        &self,
        scope: &mut Scope,
        init: Init,
        rng: &Rc<RefCell<R>>,
    ) -> Result<()> {
        for (i, layer) in self.layers.iter().enumerate() {
            let (n_in, n_out) = layer.dim();
            let mut var = Variable::zeros(Self::param_name(i), vec![n_in + 1, n_out]);

            init.build(rng, n_in * n_out, Fan::new(n_in, n_out))?
                .fill(&mut var.data[..n_in * n_out])?;

            scope.insert(var);
        }

        Ok(())
    }

    fn layer_params<'s>(scope: &'s Scope, i: usize, layer: &Dense) -> Result<&'s [f32]> {
        let var = scope.get(&Self::param_name(i))?;
        if var.len() != layer.size() {
            return Err(MlErr::SizeMismatch {
                what: "layer parameters",
                got: var.len(),
                expected: layer.size(),
            });
        }

        Ok(&var.data)
    }

    /// Makes a forward pass through the network.
    pub fn forward(&self, scope: &Scope, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut a = x.to_owned();

        for (i, layer) in self.layers.iter().enumerate() {
            let params = Self::layer_params(scope, i, layer)?;
            a = layer.forward(params, a.view())?.a;
        }

        Ok(a)
    }

    /// Computes the loss over a batch and the gradient of every layer.
    ///
    /// # Returns
    /// The loss and the gradients, one per layer in layer order.
    pub fn backprop<L: LossFn>(
        &self,
        scope: &Scope,
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<(f32, Vec<Vec<f32>>)> {
        let mut inputs = vec![x.to_owned()];
        let mut caches: Vec<DenseCache> = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate() {
            let params = Self::layer_params(scope, i, layer)?;
            let cache = layer.forward(params, inputs[i].view())?;
            inputs.push(cache.a.clone());
            caches.push(cache);
        }

        let y_pred = inputs.last().map(|a| a.view()).unwrap_or(x);
        if y_pred.dim() != y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        let loss = loss_fn.loss(y_pred, y);
        let mut d = loss_fn.loss_prime(y_pred, y);
        let mut grads = vec![Vec::new(); self.layers.len()];

        for (i, layer) in self.layers.iter().enumerate().rev() {
            let params = Self::layer_params(scope, i, layer)?;
            let mut grad = vec![0.; layer.size()];
            d = layer.backward(params, &mut grad, inputs[i].view(), &caches[i], d)?;
            grads[i] = grad;
        }

        Ok((loss, grads))
    }
}
