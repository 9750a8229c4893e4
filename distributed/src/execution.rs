use std::{fs, path::Path};

use log::debug;
use machine_learning::{Scope, Variable};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::{Deserialize, Serialize};

use crate::{DistributedErr, Result};

pub const PERSISTABLES_FILE: &str = "persistables.safetensors";
pub const MODEL_FILE: &str = "__model__.json";
pub const PARAMS_FILE: &str = "__params__.safetensors";

/// Where the executor runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    #[default]
    Cpu,
}

/// Describes an exported inference model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceManifest {
    pub feed: Vec<String>,
    pub fetch: Vec<String>,
    pub params_file: String,
    /// The variables stored in `params_file`, in declaration order.
    pub params: Vec<String>,
    pub export_for_deployment: bool,
}

/// The execution context of a process, it owns the variables of the model.
#[derive(Debug, Default)]
pub struct Executor {
    place: Place,
    scope: Scope,
}

impl Executor {
    pub fn new(place: Place) -> Self {
        Self {
            place,
            scope: Scope::new(),
        }
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Saves every persistable variable into `dirname`.
    ///
    /// # Arguments
    /// * `dirname` - The checkpoint directory, created if missing.
    ///
    /// # Returns
    /// The amount of variables written.
    pub fn save_persistables<P: AsRef<Path>>(&self, dirname: P) -> Result<usize> {
        let dirname = dirname.as_ref();
        fs::create_dir_all(dirname)?;

        let path = dirname.join(PERSISTABLES_FILE);
        let written = write_tensors(&path, self.scope.persistables())?;
        debug!(written = written; "saved persistables to {}", dirname.display());
        Ok(written)
    }

    /// Loads the persistable variables saved by `save_persistables` into the scope.
    ///
    /// # Arguments
    /// * `dirname` - The checkpoint directory.
    ///
    /// # Returns
    /// The amount of variables loaded.
    ///
    /// # Errors
    /// `DistributedErr::Checkpoint` if the checkpoint holds a variable that isn't declared
    /// in the scope or whose shape differs, or misses a declared persistable. The scope is
    /// left untouched on error.
    pub fn load_persistables<P: AsRef<Path>>(&mut self, dirname: P) -> Result<usize> {
        let vars = read_tensors(&dirname.as_ref().join(PERSISTABLES_FILE))?;

        for var in &vars {
            let declared = self.scope.get(&var.name).map_err(|_| {
                DistributedErr::Checkpoint(format!("{} isn't declared in the scope", var.name))
            })?;

            if declared.shape != var.shape {
                return Err(DistributedErr::Checkpoint(format!(
                    "{} has shape {:?} but the checkpoint holds {:?}",
                    var.name, declared.shape, var.shape
                )));
            }
        }

        if let Some(missing) = self
            .scope
            .persistables()
            .find(|declared| !vars.iter().any(|var| var.name == declared.name))
        {
            return Err(DistributedErr::Checkpoint(format!(
                "{} isn't in the checkpoint",
                missing.name
            )));
        }

        for var in &vars {
            self.scope.assign(&var.name, &var.data)?;
        }

        debug!(loaded = vars.len(); "loaded persistables");
        Ok(vars.len())
    }

    /// Exports the model for inference.
    ///
    /// Writes a manifest with the feed and fetch variable names and the parameters file.
    /// When exporting for deployment only the persistable variables are stored, otherwise
    /// every variable in the scope is.
    ///
    /// # Arguments
    /// * `dirname` - The export directory, created if missing.
    /// * `feeded_var_names` - The variables the model is fed with.
    /// * `target_vars` - The variables fetched as the model's output.
    /// * `export_for_deployment` - Whether to keep only the persistable variables.
    ///
    /// # Errors
    /// `DistributedErr::Ml` if a feed or target variable isn't in the scope.
    pub fn save_inference_model<P: AsRef<Path>>(
        &self,
        dirname: P,
        feeded_var_names: &[String],
        target_vars: &[String],
        export_for_deployment: bool,
    ) -> Result<InferenceManifest> {
        for name in feeded_var_names.iter().chain(target_vars) {
            self.scope.get(name)?;
        }

        let dirname = dirname.as_ref();
        fs::create_dir_all(dirname)?;

        let vars: Vec<_> = self
            .scope
            .iter()
            .filter(|var| var.persistable || !export_for_deployment)
            .collect();

        write_tensors(&dirname.join(PARAMS_FILE), vars.iter().copied())?;

        let manifest = InferenceManifest {
            feed: feeded_var_names.to_vec(),
            fetch: target_vars.to_vec(),
            params_file: PARAMS_FILE.to_string(),
            params: vars.iter().map(|var| var.name.clone()).collect(),
            export_for_deployment,
        };

        let raw = serde_json::to_string_pretty(&manifest)
            .map_err(|e| DistributedErr::Checkpoint(e.to_string()))?;
        fs::write(dirname.join(MODEL_FILE), raw)?;

        Ok(manifest)
    }
}

/// Reads an inference model exported by `Executor::save_inference_model`.
///
/// # Returns
/// The manifest and the stored variables in the manifest's order.
pub fn load_inference_model<P: AsRef<Path>>(
    dirname: P,
) -> Result<(InferenceManifest, Vec<Variable>)> {
    let dirname = dirname.as_ref();

    let raw = fs::read_to_string(dirname.join(MODEL_FILE))?;
    let manifest: InferenceManifest =
        serde_json::from_str(&raw).map_err(|e| DistributedErr::Checkpoint(e.to_string()))?;

    let mut vars = read_tensors(&dirname.join(&manifest.params_file))?;
    let mut ordered = Vec::with_capacity(vars.len());

    for name in &manifest.params {
        let pos = vars.iter().position(|var| var.name == *name).ok_or_else(|| {
            DistributedErr::Checkpoint(format!("{name} is missing from {}", manifest.params_file))
        })?;
        ordered.push(vars.swap_remove(pos));
    }

    Ok((manifest, ordered))
}

/// Writes `vars` into a safetensors file.
fn write_tensors<'a, I>(path: &Path, vars: I) -> Result<usize>
where
    I: Iterator<Item = &'a Variable>,
{
    let mut views = Vec::new();
    for var in vars {
        let bytes = bytemuck::cast_slice(&var.data);
        let view = TensorView::new(Dtype::F32, var.shape.clone(), bytes)?;
        views.push((var.name.clone(), view));
    }

    let written = views.len();
    let bytes = safetensors::serialize(views, &None)?;
    fs::write(path, bytes)?;

    Ok(written)
}

/// Reads every tensor of a safetensors file as a persistable `Variable`.
fn read_tensors(path: &Path) -> Result<Vec<Variable>> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut vars = Vec::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(DistributedErr::Checkpoint(format!(
                "{name} is stored as {:?}, expected F32",
                view.dtype()
            )));
        }

        let data = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        vars.push(Variable::new(name, view.shape().to_vec(), data)?);
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Executor {
        let mut executor = Executor::new(Place::Cpu);
        let scope = executor.scope_mut();
        scope.insert(Variable::new("fc_0", vec![2, 2], vec![1., -2., 3.5, 0.25]).unwrap());
        scope.insert(Variable::new("bias", vec![2], vec![0.5, 0.]).unwrap());
        scope.insert(Variable::zeros("x", vec![1, 2]).transient());
        executor
    }

    #[test]
    fn persistables_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor();

        assert_eq!(executor.save_persistables(dir.path()).unwrap(), 2);

        let mut restored = executor_with_zeros();
        assert_eq!(restored.load_persistables(dir.path()).unwrap(), 2);
        assert_eq!(
            restored.scope().get("fc_0").unwrap().data,
            [1., -2., 3.5, 0.25]
        );
        assert_eq!(restored.scope().get("bias").unwrap().data, [0.5, 0.]);
    }

    fn executor_with_zeros() -> Executor {
        let mut executor = Executor::new(Place::Cpu);
        executor.scope_mut().insert(Variable::zeros("fc_0", vec![2, 2]));
        executor.scope_mut().insert(Variable::zeros("bias", vec![2]));
        executor
    }

    #[test]
    fn load_rejects_shape_changes() {
        let dir = tempfile::tempdir().unwrap();
        executor().save_persistables(dir.path()).unwrap();

        let mut other = Executor::new(Place::Cpu);
        other.scope_mut().insert(Variable::zeros("fc_0", vec![4]));
        other.scope_mut().insert(Variable::zeros("bias", vec![2]));

        let err = other.load_persistables(dir.path());
        assert!(matches!(err, Err(DistributedErr::Checkpoint(_))));
    }

    #[test]
    fn failed_loads_leave_the_scope_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut saved = Executor::new(Place::Cpu);
        for i in 0..8 {
            let var = Variable::new(format!("v{i}"), vec![2], vec![1., 1.]).unwrap();
            saved.scope_mut().insert(var);
        }
        saved.save_persistables(dir.path()).unwrap();

        let mut other = Executor::new(Place::Cpu);
        for i in 0..7 {
            other.scope_mut().insert(Variable::zeros(format!("v{i}"), vec![2]));
        }
        other.scope_mut().insert(Variable::zeros("v7", vec![3]));

        let err = other.load_persistables(dir.path());
        assert!(matches!(err, Err(DistributedErr::Checkpoint(_))));
        assert!(other.scope().iter().all(|var| var.data.iter().all(|&x| x == 0.)));
    }

    #[test]
    fn load_requires_every_persistable() {
        let dir = tempfile::tempdir().unwrap();
        let mut saved = Executor::new(Place::Cpu);
        saved.scope_mut().insert(Variable::new("w", vec![1], vec![2.]).unwrap());
        saved.save_persistables(dir.path()).unwrap();

        let mut other = Executor::new(Place::Cpu);
        other.scope_mut().insert(Variable::zeros("w", vec![1]));
        other.scope_mut().insert(Variable::zeros("b", vec![1]));

        let err = other.load_persistables(dir.path());
        assert!(matches!(err, Err(DistributedErr::Checkpoint(_))));
        assert_eq!(other.scope().get("w").unwrap().data, [0.]);

        // Transient variables aren't checkpointed, so they may be missing.
        let mut only_w = Executor::new(Place::Cpu);
        only_w.scope_mut().insert(Variable::zeros("w", vec![1]));
        only_w.scope_mut().insert(Variable::zeros("x", vec![1]).transient());
        assert_eq!(only_w.load_persistables(dir.path()).unwrap(), 1);
        assert_eq!(only_w.scope().get("w").unwrap().data, [2.]);
    }

    #[test]
    fn inference_export() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor();
        let feed = vec!["x".to_string()];
        let fetch = vec!["fc_0".to_string()];

        let manifest = executor
            .save_inference_model(dir.path(), &feed, &fetch, true)
            .unwrap();
        assert_eq!(manifest.params, ["fc_0", "bias"]);

        let (loaded, vars) = load_inference_model(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(vars[1].data, [0.5, 0.]);

        let manifest = executor
            .save_inference_model(dir.path(), &feed, &fetch, false)
            .unwrap();
        assert_eq!(manifest.params, ["fc_0", "bias", "x"]);
    }

    #[test]
    fn inference_export_checks_names() {
        let dir = tempfile::tempdir().unwrap();
        let err = executor().save_inference_model(dir.path(), &["y".to_string()], &[], true);
        assert!(matches!(err, Err(DistributedErr::Ml(_))));
    }
}
