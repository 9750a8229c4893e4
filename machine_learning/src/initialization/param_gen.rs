use crate::{MlErr, Result};

/// A `ParamGen` generates values for the initial state of the model's parameters.
pub trait ParamGen {
    /// Samples at most `n` parameters, `None` once the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Fills the whole of `out` with freshly sampled values.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the generator runs dry before `out` is full.
    fn fill(&mut self, out: &mut [f32]) -> Result<()> {
        let mut filled = 0;

        while filled < out.len() {
            let Some(sample) = self.sample(out.len() - filled) else {
                return Err(MlErr::SizeMismatch {
                    what: "initialization",
                    got: filled,
                    expected: out.len(),
                });
            };

            out[filled..filled + sample.len()].copy_from_slice(&sample);
            filled += sample.len();
        }

        Ok(())
    }
}

impl<P: ParamGen + ?Sized> ParamGen for Box<P> {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        (**self).sample(n)
    }
}
