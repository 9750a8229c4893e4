use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use machine_learning::{
    MlErr, Scope,
    arch::Objective,
    optimization::{Optimizer, OptimizerSpec},
};

use crate::Result;

/// A parameter's name and the gradient of the loss w.r.t. it.
pub type ParamGrad = (String, Vec<f32>);

/// Gradients in the order the parameters were declared.
pub type ParamsGrads = Vec<ParamGrad>;

/// What a local optimizer can do, checked when a distributed adapter wraps it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Computes gradients of a loss.
    pub backward: bool,
    /// Applies gradients to the parameters in a scope.
    pub apply_gradients: bool,
    /// Wraps the gradients in reduced precision with loss scaling.
    pub mixed_precision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Update,
    AllReduce,
    Push,
    Pull,
    SkipUpdate,
    UpdateLossScaling,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Update => "update",
            OpKind::AllReduce => "all_reduce",
            OpKind::Push => "push",
            OpKind::Pull => "pull",
            OpKind::SkipUpdate => "skip_update",
            OpKind::UpdateLossScaling => "update_loss_scaling",
        };

        f.write_str(name)
    }
}

/// An operation performed on a variable while optimizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeOp {
    pub kind: OpKind,
    pub param: String,
}

impl OptimizeOp {
    pub fn new(kind: OpKind, param: impl Into<String>) -> Self {
        Self {
            kind,
            param: param.into(),
        }
    }
}

impl fmt::Display for OptimizeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.param)
    }
}

/// An optimizer running inside a single process.
pub trait LocalOptimizer: Send {
    /// A short name for diagnostics.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// The update rule parameter servers should apply on behalf of this optimizer.
    fn update_rule(&self) -> Option<OptimizerSpec>;

    /// Computes the gradients of `loss`.
    ///
    /// # Arguments
    /// * `loss` - The loss to differentiate.
    /// * `scope` - Holds the current values of the parameters.
    /// * `parameter_list` - Restricts the result to these parameters, all of them if `None`.
    /// * `no_grad_set` - Parameters left out of the result.
    ///
    /// # Returns
    /// The gradients, ordered as the loss declares its parameters.
    fn backward(
        &mut self,
        loss: &dyn Objective,
        scope: &Scope,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads>;

    /// Steps every parameter in `params_grads` with its gradient.
    ///
    /// # Returns
    /// The operations performed, in order.
    fn apply_gradients(
        &mut self,
        scope: &mut Scope,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>>;

    /// Tells the optimizer a step finished somewhere else, e.g. on the parameter servers.
    ///
    /// # Arguments
    /// * `finite` - Whether the step's gradients were finite and got applied.
    ///
    /// # Returns
    /// The bookkeeping operations this performed.
    fn step_finished(&mut self, _finite: bool) -> Vec<OptimizeOp> {
        Vec::new()
    }
}

impl<O: LocalOptimizer + ?Sized> LocalOptimizer for Box<O> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn update_rule(&self) -> Option<OptimizerSpec> {
        (**self).update_rule()
    }

    fn backward(
        &mut self,
        loss: &dyn Objective,
        scope: &Scope,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads> {
        (**self).backward(loss, scope, parameter_list, no_grad_set)
    }

    fn apply_gradients(
        &mut self,
        scope: &mut Scope,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        (**self).apply_gradients(scope, params_grads)
    }

    fn step_finished(&mut self, finite: bool) -> Vec<OptimizeOp> {
        (**self).step_finished(finite)
    }
}

/// Gradient based optimizer with one update rule instance per parameter.
pub struct SgdOptimizer {
    spec: OptimizerSpec,
    rules: HashMap<String, Box<dyn Optimizer + Send>>,
}

impl SgdOptimizer {
    /// Creates a new `SgdOptimizer`.
    ///
    /// # Arguments
    /// * `spec` - The update rule, instantiated lazily for every parameter it steps.
    pub fn new(spec: OptimizerSpec) -> Self {
        Self {
            spec,
            rules: HashMap::new(),
        }
    }

    pub fn spec(&self) -> OptimizerSpec {
        self.spec
    }
}

impl LocalOptimizer for SgdOptimizer {
    fn name(&self) -> &'static str {
        "SgdOptimizer"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            backward: true,
            apply_gradients: true,
            mixed_precision: false,
        }
    }

    fn update_rule(&self) -> Option<OptimizerSpec> {
        Some(self.spec)
    }

    fn backward(
        &mut self,
        loss: &dyn Objective,
        scope: &Scope,
        parameter_list: Option<&[String]>,
        no_grad_set: &HashSet<String>,
    ) -> Result<ParamsGrads> {
        let (_, grads) = loss.gradients(scope)?;

        let listed = parameter_list.unwrap_or_default();
        if let Some(missing) = listed.iter().find(|name| !grads.iter().any(|(n, _)| n == *name)) {
            return Err(MlErr::UnknownParam(missing.clone()).into());
        }

        let selected = grads
            .into_iter()
            .filter(|(name, _)| parameter_list.is_none_or(|list| list.contains(name)))
            .filter(|(name, _)| !no_grad_set.contains(name))
            .collect();

        Ok(selected)
    }

    fn apply_gradients(
        &mut self,
        scope: &mut Scope,
        params_grads: &ParamsGrads,
    ) -> Result<Vec<OptimizeOp>> {
        let spec = self.spec;
        let mut ops = Vec::with_capacity(params_grads.len());

        for (name, grad) in params_grads {
            let var = scope.get_mut(name)?;
            let rule = self
                .rules
                .entry(name.clone())
                .or_insert_with(|| spec.build(var.len()));

            rule.update_params(grad, &mut var.data)?;
            ops.push(OptimizeOp::new(OpKind::Update, name.as_str()));
        }

        Ok(ops)
    }
}

/// Adds `grads` into `acc`, appending the parameters `acc` doesn't have yet.
///
/// # Errors
/// `MlErr::SizeMismatch` if a parameter shows up with gradients of different lengths.
pub fn merge_grads(acc: &mut ParamsGrads, grads: ParamsGrads) -> Result<()> {
    for (name, grad) in grads {
        match acc.iter_mut().find(|(n, _)| *n == name) {
            Some((_, total)) => {
                if total.len() != grad.len() {
                    return Err(MlErr::SizeMismatch {
                        what: "merged gradient",
                        got: grad.len(),
                        expected: total.len(),
                    }
                    .into());
                }

                total.iter_mut().zip(grad).for_each(|(t, g)| *t += g);
            }
            None => acc.push((name, grad)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use machine_learning::Variable;

    use super::*;
    use crate::DistributedErr;

    /// `loss = sum_i (w_i - target_i)^2 / 2` over a single parameter per name.
    struct Quadratic(Vec<(String, Vec<f32>)>);

    impl Objective for Quadratic {
        fn params(&self) -> Vec<String> {
            self.0.iter().map(|(name, _)| name.clone()).collect()
        }

        fn value(&self, scope: &Scope) -> machine_learning::Result<f32> {
            let mut total = 0.;
            for (name, target) in &self.0 {
                let var = scope.get(name)?;
                total += var
                    .data
                    .iter()
                    .zip(target)
                    .map(|(w, t)| (w - t).powi(2) / 2.)
                    .sum::<f32>();
            }
            Ok(total)
        }

        fn gradients(
            &self,
            scope: &Scope,
        ) -> machine_learning::Result<(f32, machine_learning::arch::Gradients)> {
            let mut grads = Vec::new();
            for (name, target) in &self.0 {
                let var = scope.get(name)?;
                let grad = var.data.iter().zip(target).map(|(w, t)| w - t).collect();
                grads.push((name.clone(), grad));
            }
            Ok((self.value(scope)?, grads))
        }
    }

    fn setup() -> (Quadratic, Scope) {
        let mut scope = Scope::new();
        scope.insert(Variable::new("a", vec![2], vec![1., 1.]).unwrap());
        scope.insert(Variable::new("b", vec![1], vec![4.]).unwrap());

        let loss = Quadratic(vec![
            ("a".into(), vec![0., 2.]),
            ("b".into(), vec![0.]),
        ]);
        (loss, scope)
    }

    #[test]
    fn backward_filters_parameters() {
        let (loss, scope) = setup();
        let mut opt = SgdOptimizer::new(OptimizerSpec::GradientDescent { learning_rate: 1. });

        let all = opt.backward(&loss, &scope, None, &HashSet::new()).unwrap();
        assert_eq!(all, [("a".to_string(), vec![1., -1.]), ("b".to_string(), vec![4.])]);

        let no_grad = HashSet::from(["a".to_string()]);
        let some = opt.backward(&loss, &scope, None, &no_grad).unwrap();
        assert_eq!(some, [("b".to_string(), vec![4.])]);

        let list = ["a".to_string()];
        let listed = opt
            .backward(&loss, &scope, Some(&list), &HashSet::new())
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "a");
    }

    #[test]
    fn backward_rejects_unknown_listed_parameters() {
        let (loss, scope) = setup();
        let mut opt = SgdOptimizer::new(OptimizerSpec::GradientDescent { learning_rate: 1. });

        let list = ["c".to_string()];
        let err = opt.backward(&loss, &scope, Some(&list), &HashSet::new());
        assert!(matches!(
            err,
            Err(DistributedErr::Ml(MlErr::UnknownParam(name))) if name == "c"
        ));
    }

    #[test]
    fn apply_steps_every_listed_parameter() {
        let (loss, mut scope) = setup();
        let mut opt = SgdOptimizer::new(OptimizerSpec::GradientDescent { learning_rate: 0.5 });

        let grads = opt.backward(&loss, &scope, None, &HashSet::new()).unwrap();
        let ops = opt.apply_gradients(&mut scope, &grads).unwrap();

        assert_eq!(
            ops,
            [
                OptimizeOp::new(OpKind::Update, "a"),
                OptimizeOp::new(OpKind::Update, "b")
            ]
        );
        assert_eq!(scope.get("a").unwrap().data, [0.5, 1.5]);
        assert_eq!(scope.get("b").unwrap().data, [2.]);
    }

    #[test]
    fn merging_sums_by_name() {
        let mut acc = vec![("a".to_string(), vec![1., 1.])];
        merge_grads(&mut acc, vec![("b".into(), vec![3.]), ("a".into(), vec![1., 2.])]).unwrap();

        assert_eq!(acc, [("a".to_string(), vec![2., 3.]), ("b".to_string(), vec![3.])]);
        assert!(merge_grads(&mut acc, vec![("b".into(), vec![1., 1.])]).is_err());
    }
}
