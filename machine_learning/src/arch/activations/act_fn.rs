use serde::{Deserialize, Serialize};

use super::Sigmoid;

/// Element-wise activation functions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActFn {
    Sigmoid { amp: f32 },
    Relu,
    LeakyRelu { negative_slope: f32 },
    Elu { alpha: f32 },
    Tanh,
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid { amp }
    }

    pub fn leaky_relu(negative_slope: f32) -> Self {
        Self::LeakyRelu { negative_slope }
    }

    pub fn f(&self, x: f32) -> f32 {
        match *self {
            ActFn::Sigmoid { amp } => Sigmoid::new(amp).f(x),
            ActFn::Relu => x.max(0.),
            ActFn::LeakyRelu { negative_slope } if x < 0. => negative_slope * x,
            ActFn::LeakyRelu { .. } => x,
            ActFn::Elu { alpha } if x < 0. => alpha * (x.exp() - 1.),
            ActFn::Elu { .. } => x,
            ActFn::Tanh => x.tanh(),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match *self {
            ActFn::Sigmoid { amp } => Sigmoid::new(amp).df(x),
            ActFn::Relu => (x > 0.) as u8 as f32,
            ActFn::LeakyRelu { negative_slope } if x < 0. => negative_slope,
            ActFn::LeakyRelu { .. } => 1.,
            ActFn::Elu { alpha } if x < 0. => alpha * x.exp(),
            ActFn::Elu { .. } => 1.,
            ActFn::Tanh => 1. - x.tanh().powi(2),
        }
    }
}
