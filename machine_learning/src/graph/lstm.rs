use ndarray::{Array1, Array2, ArrayView2, Axis, s};

use super::{Initializer, params};
use crate::{Result, Scope};

/// One layer of an LSTM. Gates are packed in `input, forget, cell, output`
/// order along the columns of the weights.
#[derive(Debug, Clone)]
struct LstmCell {
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
}

impl LstmCell {
    fn new(input_size: usize, hidden_size: usize, init: &Initializer) -> Result<Self> {
        let bound = (hidden_size as f32).sqrt().recip();
        let gates = 4 * hidden_size;

        Ok(Self {
            w_ih: init.uniform(input_size, gates, bound)?,
            w_hh: init.uniform(hidden_size, gates, bound)?,
            b_ih: init.uniform(1, gates, bound)?.remove_axis(Axis(0)),
            b_hh: init.uniform(1, gates, bound)?.remove_axis(Axis(0)),
        })
    }

    fn step(&self, x: ArrayView2<f32>, h: &mut Array2<f32>, c: &mut Array2<f32>) {
        let hidden = self.w_hh.nrows();

        let mut gates = x.dot(&self.w_ih) + h.dot(&self.w_hh);
        gates += &self.b_ih;
        gates += &self.b_hh;

        let sigmoid = |v: f32| 1. / (1. + (-v).exp());
        let i = gates.slice(s![.., ..hidden]).mapv(sigmoid);
        let f = gates.slice(s![.., hidden..2 * hidden]).mapv(sigmoid);
        let g = gates.slice(s![.., 2 * hidden..3 * hidden]).mapv(f32::tanh);
        let o = gates.slice(s![.., 3 * hidden..]).mapv(sigmoid);

        *c = &f * &*c + &i * &g;
        *h = &o * &c.mapv(f32::tanh);
    }
}

/// The recurrent state of an `Lstm`, one hidden and cell matrix per layer.
pub struct LstmState {
    h: Vec<Array2<f32>>,
    c: Vec<Array2<f32>>,
}

/// A stacked LSTM, the recurrence behind `Set2Set`.
#[derive(Debug, Clone)]
pub struct Lstm {
    cells: Vec<LstmCell>,
    hidden_size: usize,
}

impl Lstm {
    /// Creates a new `Lstm`.
    ///
    /// # Arguments
    /// * `input_size` - The width of the first layer's input.
    /// * `hidden_size` - The width of every layer's state.
    /// * `num_layers` - The amount of stacked layers.
    /// * `init` - Where the weights are drawn from.
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        init: &Initializer,
    ) -> Result<Self> {
        let cells = (0..num_layers)
            .map(|l| {
                let input = if l == 0 { input_size } else { hidden_size };
                LstmCell::new(input, hidden_size, init)
            })
            .collect::<Result<_>>()?;

        Ok(Self { cells, hidden_size })
    }

    /// A zeroed state for a batch of `batch` sequences.
    pub fn zero_state(&self, batch: usize) -> LstmState {
        let zeros = Array2::zeros((batch, self.hidden_size));
        LstmState {
            h: vec![zeros.clone(); self.cells.len()],
            c: vec![zeros; self.cells.len()],
        }
    }

    /// Advances every layer one time step.
    ///
    /// # Returns
    /// The hidden state of the last layer.
    pub fn step(&self, x: ArrayView2<f32>, state: &mut LstmState) -> Array2<f32> {
        let mut input = x.to_owned();

        for (l, cell) in self.cells.iter().enumerate() {
            cell.step(input.view(), &mut state.h[l], &mut state.c[l]);
            input = state.h[l].clone();
        }

        input
    }

    pub(crate) fn export(&self, prefix: &str, scope: &mut Scope) {
        for (l, cell) in self.cells.iter().enumerate() {
            params::export(scope, format!("{prefix}.weight_ih_l{l}"), &cell.w_ih);
            params::export(scope, format!("{prefix}.weight_hh_l{l}"), &cell.w_hh);
            params::export(scope, format!("{prefix}.bias_ih_l{l}"), &cell.b_ih);
            params::export(scope, format!("{prefix}.bias_hh_l{l}"), &cell.b_hh);
        }
    }

    pub(crate) fn import(&mut self, prefix: &str, scope: &Scope) -> Result<()> {
        for (l, cell) in self.cells.iter_mut().enumerate() {
            params::import(scope, &format!("{prefix}.weight_ih_l{l}"), &mut cell.w_ih)?;
            params::import(scope, &format!("{prefix}.weight_hh_l{l}"), &mut cell.w_hh)?;
            params::import(scope, &format!("{prefix}.bias_ih_l{l}"), &mut cell.b_ih)?;
            params::import(scope, &format!("{prefix}.bias_hh_l{l}"), &mut cell.b_hh)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::Init;

    #[test]
    fn stacked_step_shapes() {
        let init = Initializer::seeded(4, Init::XavierUniform);
        let lstm = Lstm::new(6, 3, 2, &init).unwrap();
        let mut state = lstm.zero_state(2);

        let out = lstm.step(Array2::ones((2, 6)).view(), &mut state);
        assert_eq!(out.dim(), (2, 3));
        assert!(out.iter().all(|v| v.abs() < 1.));
        assert_eq!(state.c[0].dim(), (2, 3));
    }

    #[test]
    fn zero_weights_keep_half_decay() {
        let init = Initializer::seeded(0, Init::Const { value: 0. });
        let mut lstm = Lstm::new(1, 1, 1, &init).unwrap();
        lstm.cells[0].b_ih.fill(0.);
        lstm.cells[0].b_hh.fill(0.);
        lstm.cells[0].w_ih.fill(0.);
        lstm.cells[0].w_hh.fill(0.);

        let mut state = lstm.zero_state(1);
        state.c[0].fill(1.);

        let h = lstm.step(Array2::zeros((1, 1)).view(), &mut state);
        assert!((state.c[0][[0, 0]] - 0.5).abs() < 1e-6);
        assert!((h[[0, 0]] - 0.5 * 0.5f32.tanh()).abs() < 1e-6);
    }
}
