use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use super::{ParamGen, RandErr, Result};

/// The fan of a weight tensor, the amount of units going in and out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fan {
    pub fan_in: usize,
    pub fan_out: usize,
}

impl Fan {
    pub fn new(fan_in: usize, fan_out: usize) -> Self {
        Self { fan_in, fan_out }
    }

    fn checked_in(self) -> Result<f32> {
        match self.fan_in {
            0 => Err(RandErr::zero_fan()),
            n => Ok(n as f32),
        }
    }

    fn checked_sum(self) -> Result<f32> {
        match self.fan_in + self.fan_out {
            0 => Err(RandErr::zero_fan()),
            n => Ok(n as f32),
        }
    }
}

/// The initialization scheme of a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Init {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    XavierNormal,
    Kaiming,
    Lecun,
}

/// A parameter generator sampling from a probability distribution.
///
/// The random number generator is shared so that every layer of a model draws
/// from the same seeded stream.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: Rc<RefCell<R>>, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// A uniform generator over `[low, high)`.
    ///
    /// # Errors
    /// If the range is empty.
    pub fn uniform(rng: Rc<RefCell<R>>, limit: usize, low: f32, high: f32) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new(low, high)?, limit))
    }

    /// Glorot uniform, bounded by `sqrt(6 / (fan_in + fan_out))`.
    pub fn xavier_uniform(rng: Rc<RefCell<R>>, limit: usize, fan: Fan) -> Result<Self> {
        let range = (6. / fan.checked_sum()?).sqrt();
        Self::uniform(rng, limit, -range, range)
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// A normal generator.
    ///
    /// # Errors
    /// If `std_dev` is not finite.
    pub fn normal(rng: Rc<RefCell<R>>, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?, limit))
    }

    /// Glorot normal, deviation `sqrt(2 / (fan_in + fan_out))`.
    pub fn xavier(rng: Rc<RefCell<R>>, limit: usize, fan: Fan) -> Result<Self> {
        let std_dev = (2. / fan.checked_sum()?).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }

    /// He normal, deviation `sqrt(2 / fan_in)`.
    pub fn kaiming(rng: Rc<RefCell<R>>, limit: usize, fan: Fan) -> Result<Self> {
        let std_dev = (2. / fan.checked_in()?).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }

    /// LeCun normal, deviation `sqrt(1 / fan_in)`.
    pub fn lecun(rng: Rc<RefCell<R>>, limit: usize, fan: Fan) -> Result<Self> {
        let std_dev = (1. / fan.checked_in()?).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let n = n.min(self.remaining);
        self.remaining -= n;

        let mut rng = self.rng.borrow_mut();
        Some(
            (0..n)
                .map(|_| self.distribution.sample(&mut *rng))
                .collect(),
        )
    }
}

impl Init {
    /// Builds a generator of `limit` values for a tensor with the given fan.
    ///
    /// # Errors
    /// `RandErr` if the scheme's distribution is invalid for `fan`.
    pub fn build<R: Rng + 'static>(
        self,
        rng: &Rc<RefCell<R>>,
        limit: usize,
        fan: Fan,
    ) -> Result<Box<dyn ParamGen>> {
        let rng = Rc::clone(rng);

        Ok(match self {
            Init::Const { value } => Box::new(super::ConstParamGen::new(value, limit)),
            Init::Uniform { low, high } => Box::new(RandParamGen::uniform(rng, limit, low, high)?),
            Init::Normal { mean, std_dev } => {
                Box::new(RandParamGen::normal(rng, limit, mean, std_dev)?)
            }
            Init::XavierUniform => Box::new(RandParamGen::xavier_uniform(rng, limit, fan)?),
            Init::XavierNormal => Box::new(RandParamGen::xavier(rng, limit, fan)?),
            Init::Kaiming => Box::new(RandParamGen::kaiming(rng, limit, fan)?),
            Init::Lecun => Box::new(RandParamGen::lecun(rng, limit, fan)?),
        })
    }
}
