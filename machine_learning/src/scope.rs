use std::collections::HashMap;

use crate::{MlErr, Result};

/// A named tensor living in a `Scope`.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    /// Whether the variable is part of the model's state and must be
    /// checkpointed (weights, biases, norm statistics).
    pub persistable: bool,
}

impl Variable {
    /// Creates a new persistable `Variable`.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if `data` doesn't match the element count of `shape`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "variable",
                got: data.len(),
                expected,
            });
        }

        Ok(Self {
            name: name.into(),
            shape,
            data,
            persistable: true,
        })
    }

    /// A zero filled variable of the given shape.
    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            name: name.into(),
            shape,
            data: vec![0.; len],
            persistable: true,
        }
    }

    /// Marks the variable as transient (activations, feeds).
    pub fn transient(mut self) -> Self {
        self.persistable = false;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A set of named variables that keeps insertion order.
///
/// Ordering matters: gradients, checkpoints and the parameter server layout
/// all walk the variables in the order they were declared.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a variable, replacing the one with the same name in place.
    pub fn insert(&mut self, var: Variable) {
        match self.index.get(&var.name) {
            Some(&i) => self.vars[i] = var,
            None => {
                self.index.insert(var.name.clone(), self.vars.len());
                self.vars.push(var);
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&Variable> {
        self.index
            .get(name)
            .map(|&i| &self.vars[i])
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Variable> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.vars[i]),
            None => Err(MlErr::UnknownParam(name.to_string())),
        }
    }

    /// Overwrites the data of an existing variable.
    ///
    /// # Errors
    /// If the variable doesn't exist or `data` has a different length.
    pub fn assign(&mut self, name: &str, data: &[f32]) -> Result<()> {
        let var = self.get_mut(name)?;
        if var.data.len() != data.len() {
            return Err(MlErr::SizeMismatch {
                what: "assignment",
                got: data.len(),
                expected: var.data.len(),
            });
        }

        var.data.copy_from_slice(data);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|var| var.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn persistables(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter().filter(|var| var.persistable)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
