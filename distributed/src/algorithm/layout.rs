use std::ops::Range;

use machine_learning::{MlErr, Scope};

use crate::{DistributedErr, Result, optimizer::ParamsGrads};

/// Where every persistable variable of a scope lives in a single flat buffer.
///
/// The buffer follows the scope's declaration order, so every process running the
/// same model agrees on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParamLayout {
    entries: Vec<(String, Range<usize>)>,
    len: usize,
}

impl ParamLayout {
    pub(crate) fn of(scope: &Scope) -> Self {
        let mut entries = Vec::new();
        let mut offset = 0;

        for var in scope.persistables() {
            entries.push((var.name.clone(), offset..offset + var.len()));
            offset += var.len();
        }

        Self {
            entries,
            len: offset,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn range(&self, name: &str) -> Result<Range<usize>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, range)| range.clone())
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()).into())
    }

    /// Copies the variables of `scope` into a flat buffer.
    pub(crate) fn gather(&self, scope: &Scope) -> Result<Vec<f32>> {
        let mut flat = vec![0.; self.len];

        for (name, range) in &self.entries {
            let var = scope.get(name)?;
            if var.len() != range.len() {
                return Err(DistributedErr::LengthMismatch {
                    got: var.len(),
                    expected: range.len(),
                });
            }

            flat[range.clone()].copy_from_slice(&var.data);
        }

        Ok(flat)
    }

    /// Writes a flat buffer back into the variables of `scope`.
    pub(crate) fn scatter(&self, flat: &[f32], scope: &mut Scope) -> Result<()> {
        if flat.len() != self.len {
            return Err(DistributedErr::LengthMismatch {
                got: flat.len(),
                expected: self.len,
            });
        }

        for (name, range) in &self.entries {
            scope.assign(name, &flat[range.clone()])?;
        }

        Ok(())
    }

    /// Lays `params_grads` out in a flat buffer, parameters without a gradient get zeros.
    pub(crate) fn flatten_grads(&self, params_grads: &ParamsGrads) -> Result<Vec<f32>> {
        let mut flat = vec![0.; self.len];

        for (name, grad) in params_grads {
            let range = self.range(name)?;
            if grad.len() != range.len() {
                return Err(DistributedErr::LengthMismatch {
                    got: grad.len(),
                    expected: range.len(),
                });
            }

            flat[range].copy_from_slice(grad);
        }

        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::Variable;

    use super::*;

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope.insert(Variable::new("w", vec![2], vec![1., 2.]).unwrap());
        scope.insert(Variable::new("x", vec![1], vec![9.]).unwrap().transient());
        scope.insert(Variable::new("b", vec![1], vec![3.]).unwrap());
        scope
    }

    #[test]
    fn only_persistables_are_laid_out() {
        let scope = scope();
        let layout = ParamLayout::of(&scope);

        assert_eq!(layout.len(), 3);
        assert_eq!(layout.gather(&scope).unwrap(), [1., 2., 3.]);
    }

    #[test]
    fn scatter_writes_back() {
        let mut scope = scope();
        let layout = ParamLayout::of(&scope);

        layout.scatter(&[4., 5., 6.], &mut scope).unwrap();
        assert_eq!(scope.get("w").unwrap().data, [4., 5.]);
        assert_eq!(scope.get("b").unwrap().data, [6.]);
        assert!(layout.scatter(&[0.; 2], &mut scope).is_err());
    }

    #[test]
    fn missing_gradients_are_zero() {
        let layout = ParamLayout::of(&scope());

        let flat = layout
            .flatten_grads(&vec![("b".to_string(), vec![1.])])
            .unwrap();
        assert_eq!(flat, [0., 0., 1.]);

        let unknown = layout.flatten_grads(&vec![("x".to_string(), vec![1.])]);
        assert!(matches!(unknown, Err(DistributedErr::Ml(MlErr::UnknownParam(_)))));
    }
}
