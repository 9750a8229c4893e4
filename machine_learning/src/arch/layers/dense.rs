use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer, `a = act(x · W + b)`.
///
/// Its parameters live in a single flat slice: the `dim.0 × dim.1` weights
/// followed by the `dim.1` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
}

/// What `Dense::forward` keeps around for the backward pass.
pub struct DenseCache {
    pub z: Array2<f32>,
    pub a: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - The activation applied to the affine output, if any.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self { dim, act_fn }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.dim.0 + 1) * self.dim.1
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<DenseCache> {
        let (w, b) = self.view_params(params)?;
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let mut z = x.dot(&w);
        z += &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        Ok(DenseCache { z, a })
    }

    /// Backpropagates `d`, the derivative of the loss w.r.t. this layer's
    /// output, writing the parameter gradient into `grad`.
    ///
    /// # Returns
    /// The derivative of the loss w.r.t. the layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        cache: &DenseCache,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&cache.z, |d, &z| *d *= act_fn.df(z));
        }

        let (w, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1., &x.t(), &d, 0., &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        Ok(d.dot(&w.t()))
    }

    fn split_len(&self, len: usize) -> Result<usize> {
        if len != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "dense parameters",
                got: len,
                expected: self.size(),
            });
        }

        Ok(self.dim.0 * self.dim.1)
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.split_len(params.len())?;
        let (w, b) = params.split_at(w_size);

        let w = ArrayView2::from_shape(self.dim, w)?;
        let b = ArrayView1::from(b);
        Ok((w, b))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.split_len(grad.len())?;
        let (dw, db) = grad.split_at_mut(w_size);

        let dw = ArrayViewMut2::from_shape(self.dim, dw)?;
        let db = ArrayViewMut1::from(db);
        Ok((dw, db))
    }
}
