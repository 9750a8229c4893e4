use std::{cell::RefCell, rc::Rc};

use ndarray::{Array, Array1, Array2, Dimension};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    MlErr, Result, Scope, Variable,
    initialization::{Fan, Init},
};

/// Draws the parameters of a model's layers from a single seeded stream.
#[derive(Clone)]
pub struct Initializer {
    rng: Rc<RefCell<StdRng>>,
    weights: Init,
}

impl Initializer {
    /// Creates a new `Initializer`.
    ///
    /// # Arguments
    /// * `seed` - The seed of the random stream.
    /// * `weights` - The scheme used for weight matrices.
    pub fn seeded(seed: u64, weights: Init) -> Self {
        Self {
            rng: Rc::new(RefCell::new(StdRng::seed_from_u64(seed))),
            weights,
        }
    }

    /// A `rows × cols` weight matrix drawn with the configured scheme.
    pub fn weight(&self, rows: usize, cols: usize) -> Result<Array2<f32>> {
        self.sample(self.weights, rows, cols, Fan::new(rows, cols))
    }

    /// A `rows × cols` matrix drawn uniformly from `[-bound, bound)`.
    pub fn uniform(&self, rows: usize, cols: usize, bound: f32) -> Result<Array2<f32>> {
        let init = Init::Uniform {
            low: -bound,
            high: bound,
        };
        self.sample(init, rows, cols, Fan::new(rows, cols))
    }

    pub fn zeros(&self, len: usize) -> Array1<f32> {
        Array1::zeros(len)
    }

    fn sample(&self, init: Init, rows: usize, cols: usize, fan: Fan) -> Result<Array2<f32>> {
        let mut data = vec![0.; rows * cols];
        init.build(&self.rng, data.len(), fan)?.fill(&mut data)?;
        Ok(Array2::from_shape_vec((rows, cols), data)?)
    }
}

/// Copies `arr` into `scope` as a persistable variable named `name`.
pub(crate) fn export<D: Dimension>(scope: &mut Scope, name: String, arr: &Array<f32, D>) {
    scope.insert(Variable {
        name,
        shape: arr.shape().to_vec(),
        data: arr.iter().copied().collect(),
        persistable: true,
    });
}

/// Overwrites `arr` with the variable `name` of `scope`.
///
/// # Errors
/// If the variable is missing or its shape differs from `arr`'s.
pub(crate) fn import<D: Dimension>(
    scope: &Scope,
    name: &str,
    arr: &mut Array<f32, D>,
) -> Result<()> {
    let var = scope.get(name)?;
    if var.shape != arr.shape() {
        return Err(MlErr::SizeMismatch {
            what: "imported parameter",
            got: var.len(),
            expected: arr.len(),
        });
    }

    arr.iter_mut().zip(&var.data).for_each(|(a, &v)| *a = v);
    Ok(())
}
