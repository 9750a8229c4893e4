use std::collections::HashSet;

use half::f16;
use log::{debug, warn};
use machine_learning::{Scope, arch::Objective, optimization::OptimizerSpec};
use serde::{Deserialize, Serialize};

use super::{Capabilities, LocalOptimizer, OpKind, OptimizeOp, ParamsGrads};
use crate::Result;

/// The name reported by the loss scaling update op.
pub const LOSS_SCALING: &str = "loss_scaling";

/// Dynamic loss scaling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossScaling {
    pub init_loss_scaling: f32,
    /// Consecutive finite steps before growing the scaling.
    pub incr_every_n_steps: usize,
    /// Accumulated non-finite steps before shrinking the scaling.
    pub decr_every_n_nan_or_inf: usize,
    pub incr_ratio: f32,
    pub decr_ratio: f32,
}

impl Default for LossScaling {
    fn default() -> Self {
        Self {
            init_loss_scaling: 32768.,
            incr_every_n_steps: 1000,
            decr_every_n_nan_or_inf: 2,
            incr_ratio: 2.,
            decr_ratio: 0.8,
        }
    }
}

/// Runs the gradients of an inner optimizer through half precision.
///
/// Gradients are scaled by the loss scaling, rounded to `f16` and unscaled. Steps whose
/// gradients aren't finite afterwards are skipped and the loss scaling shrinks, long runs
/// of finite steps grow it back.
pub struct MixedPrecision<O: LocalOptimizer> {
    inner: O,
    config: LossScaling,
    loss_scaling: f32,
    good_steps: usize,
    bad_steps: usize,
}

impl<O: LocalOptimizer> MixedPrecision<O> {
    pub fn new(inner: O) -> Self {
        Self::with_config(inner, LossScaling::default())
    }

    pub fn with_config(inner: O, config: LossScaling) -> Self {
        Self {
            inner,
            config,
            loss_scaling: config.init_loss_scaling,
            good_steps: 0,
            bad_steps: 0,
        }
    }

    pub fn loss_scaling(&self) -> f32 {
        self.loss_scaling
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn round_trip(&self, grad: &mut [f32]) {
        let scale = self.loss_scaling;
        grad.iter_mut()
            .for_each(|g| *g = f16::from_f32(*g * scale).to_f32() / scale);
    }

    fn update_loss_scaling(&mut self, finite: bool) {
        if finite {
            self.bad_steps = 0;
            self.good_steps += 1;

            if self.good_steps == self.config.incr_every_n_steps {
                let grown = self.loss_scaling * self.config.incr_ratio;
                if grown.is_finite() {
                    self.loss_scaling = grown;
                }
                self.good_steps = 0;
            }
        } else {
            self.good_steps = 0;
            self.bad_steps += 1;

            if self.bad_steps == self.config.decr_every_n_nan_or_inf {
                self.loss_scaling = (self.loss_scaling * self.config.decr_ratio).max(1.);
                self.bad_steps = 0;
            }
        }
    }
}

/// Whether every gradient is finite.
pub(crate) fn all_finite(params_grads: &ParamsGrads) -> bool {
    params_grads
        .iter()
        .all(|(_, grad)| grad.iter().all(|g| g.is_finite()))
}

impl<O: LocalOptimizer> LocalOptimizer for MixedPrecision<O> {
    fn name(&self) -> &'static str {
        "MixedPrecision"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mixed_precision: true,
            ..self.inner.capabilities()
        }
    }

    fn update_rule(&self) -> Option<OptimizerSpec> {
        self.inner.update_rule()
    }

    fn backward(
        &mut self,
        loss: &dyn Objective,
        scope: &Scope,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads> {
        let mut params_grads = self
            .inner
            .backward(loss, scope, parameter_list, no_grad_set)?;

        for (_, grad) in params_grads.iter_mut() {
            self.round_trip(grad);
        }

        Ok(params_grads)
    }

    fn apply_gradients(
        &mut self,
        scope: &mut Scope,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        let finite = all_finite(params_grads);

        let mut ops = if finite {
            self.inner.apply_gradients(scope, params_grads)?
        } else {
            warn!(
                loss_scaling = self.loss_scaling;
                "skipping a step with non finite gradients"
            );

            params_grads
                .iter()
                .map(|(name, _)| OptimizeOp::new(OpKind::SkipUpdate, name.as_str()))
                .collect()
        };

        ops.extend(self.step_finished(finite));
        Ok(ops)
    }

    fn step_finished(&mut self, finite: bool) -> Vec<OptimizeOp> {
        self.update_loss_scaling(finite);
        debug!(loss_scaling = self.loss_scaling; "updated the loss scaling");

        vec![OptimizeOp::new(OpKind::UpdateLossScaling, LOSS_SCALING)]
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::Variable;

    use super::*;
    use crate::optimizer::SgdOptimizer;

    fn mixed() -> MixedPrecision<SgdOptimizer> {
        let sgd = SgdOptimizer::new(OptimizerSpec::GradientDescent { learning_rate: 1. });
        MixedPrecision::new(sgd)
    }

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope.insert(Variable::new("w", vec![2], vec![1., 1.]).unwrap());
        scope
    }

    #[test]
    fn keeps_the_inner_capabilities() {
        let caps = mixed().capabilities();

        assert!(caps.backward && caps.apply_gradients && caps.mixed_precision);
    }

    #[test]
    fn finite_steps_are_applied() {
        let mut opt = mixed();
        let mut scope = scope();

        let grads = vec![("w".to_string(), vec![0.5, -0.25])];
        let ops = opt.apply_gradients(&mut scope, &grads).unwrap();

        assert_eq!(ops[0], OptimizeOp::new(OpKind::Update, "w"));
        assert_eq!(ops[1].kind, OpKind::UpdateLossScaling);
        assert_eq!(scope.get("w").unwrap().data, [0.5, 1.25]);
        assert_eq!(opt.loss_scaling(), 32768.);
    }

    #[test]
    fn non_finite_steps_are_skipped_and_shrink_the_scaling() {
        let mut opt = mixed();
        let mut scope = scope();

        let grads = vec![("w".to_string(), vec![f32::INFINITY, 0.])];
        let ops = opt.apply_gradients(&mut scope, &grads).unwrap();

        assert_eq!(ops[0], OptimizeOp::new(OpKind::SkipUpdate, "w"));
        assert_eq!(scope.get("w").unwrap().data, [1., 1.]);
        assert_eq!(opt.loss_scaling(), 32768.);

        opt.apply_gradients(&mut scope, &grads).unwrap();
        assert_eq!(opt.loss_scaling(), 32768. * 0.8);
    }

    #[test]
    fn finite_runs_grow_the_scaling() {
        let config = LossScaling {
            incr_every_n_steps: 3,
            ..LossScaling::default()
        };
        let sgd = SgdOptimizer::new(OptimizerSpec::GradientDescent { learning_rate: 0. });
        let mut opt = MixedPrecision::with_config(sgd, config);
        let mut scope = scope();

        let grads = vec![("w".to_string(), vec![0., 0.])];
        for _ in 0..3 {
            opt.apply_gradients(&mut scope, &grads).unwrap();
        }

        assert_eq!(opt.loss_scaling(), 65536.);
    }

    #[test]
    fn remote_steps_update_the_scaling() {
        let mut opt = mixed();

        assert_eq!(opt.step_finished(false)[0].kind, OpKind::UpdateLossScaling);
        opt.step_finished(false);
        assert_eq!(opt.loss_scaling(), 32768. * 0.8);

        let mut boxed: Box<dyn LocalOptimizer> = Box::new(mixed());
        assert_eq!(boxed.step_finished(true).len(), 1);
    }

    #[test]
    fn half_precision_overflows_to_infinity() {
        let opt = mixed();

        let mut grad = [1., 4.];
        opt.round_trip(&mut grad);

        assert_eq!(grad[0], 1.);
        assert!(grad[1].is_infinite());
    }
}
