use std::{fs, path::Path, path::PathBuf};

use distributed::{DistributedErr, DistributedStrategy, JobConfig, Mode, Result};
use machine_learning::{
    arch::{Sequential, activations::ActFn, layers::Dense},
    initialization::Init,
    optimization::OptimizerSpec,
};
use serde::Deserialize;

/// A dense layer of the trained model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    #[serde(default)]
    pub act_fn: Option<ActFn>,
}

/// Everything a node needs to run its part of a training job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    /// The job topology, read from the environment if missing.
    pub job: Option<JobConfig>,
    pub mode: Mode,
    pub optimizer: OptimizerSpec,
    pub strategy: DistributedStrategy,
    pub mixed_precision: bool,
    pub init: Init,
    pub input_size: usize,
    pub layers: Vec<LayerSpec>,
    /// The amount of synthetic samples shared among the workers.
    pub samples: usize,
    pub steps: usize,
    /// Every process must use the same seed so that data and parameters match.
    pub seed: u64,
    /// A checkpoint servers load their parameters from.
    pub model_dir: Option<PathBuf>,
    /// Where the first worker saves the trained model.
    pub output_dir: Option<PathBuf>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            job: None,
            mode: Mode::Collective,
            optimizer: OptimizerSpec::GradientDescent {
                learning_rate: 0.05,
            },
            strategy: DistributedStrategy::default(),
            mixed_precision: false,
            init: Init::XavierUniform,
            input_size: 4,
            layers: vec![
                LayerSpec {
                    size: 8,
                    act_fn: Some(ActFn::Tanh),
                },
                LayerSpec {
                    size: 1,
                    act_fn: None,
                },
            ],
            samples: 256,
            steps: 200,
            seed: 42,
            model_dir: None,
            output_dir: None,
        }
    }
}

impl NodeSpec {
    /// Reads a `NodeSpec` from a JSON file, every missing field takes its default.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&raw)
            .map_err(|e| DistributedErr::InvalidConfig(e.to_string()))?;

        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid =
            |detail: &str| -> Result<()> { Err(DistributedErr::InvalidConfig(detail.to_string())) };

        if self.input_size == 0 {
            return invalid("the model needs at least one input");
        }

        match self.layers.last() {
            None => return invalid("the model needs at least one layer"),
            Some(layer) if layer.size != 1 => {
                return invalid("the last layer must have a single output");
            }
            Some(_) => {}
        }

        if self.layers.iter().any(|layer| layer.size == 0) {
            return invalid("layers can't be empty");
        }

        Ok(())
    }

    /// The job topology, read from the environment when `job` is missing.
    pub fn job(&self) -> Result<JobConfig> {
        match &self.job {
            Some(job) => {
                job.validate()?;
                Ok(job.clone())
            }
            None => JobConfig::from_env(),
        }
    }

    pub fn model(&self) -> Sequential {
        let mut n_in = self.input_size;

        Sequential::new(self.layers.iter().map(|layer| {
            let dense = Dense::new((n_in, layer.size), layer.act_fn);
            n_in = layer.size;
            dense
        }))
    }
}

#[cfg(test)]
mod tests {
    use distributed::{RoleKind, SyncMode};

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let raw = r#"{
            "mode": "transpiler",
            "optimizer": { "kind": "adam", "learning_rate": 0.01, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-8 },
            "strategy": { "sync_mode": "async" },
            "job": { "role": "worker", "worker_num": 2, "index": 1 }
        }"#;

        let spec: NodeSpec = serde_json::from_str(raw).unwrap();
        spec.validate().unwrap();

        assert_eq!(spec.mode, Mode::Transpiler);
        assert_eq!(spec.strategy.sync_mode, SyncMode::Async);
        assert_eq!(spec.layers, NodeSpec::default().layers);

        let job = spec.job().unwrap();
        assert_eq!(job.role, RoleKind::Worker);
        assert_eq!(job.index, 1);
    }

    #[test]
    fn the_model_chains_the_layer_sizes() {
        let spec = NodeSpec::default();
        let model = spec.model();

        assert_eq!(model.param_names(), ["fc_0", "fc_1"]);
        assert_eq!(model.size(), (4 + 1) * 8 + (8 + 1));
    }

    #[test]
    fn multi_output_models_are_rejected() {
        let spec = NodeSpec {
            layers: vec![LayerSpec {
                size: 2,
                act_fn: None,
            }],
            ..NodeSpec::default()
        };

        assert!(matches!(
            spec.validate(),
            Err(DistributedErr::InvalidConfig(_))
        ));
    }
}
