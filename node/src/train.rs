use std::{cell::RefCell, collections::HashSet, path::Path, rc::Rc, time::Duration};

use distributed::{
    Algorithm, DistributedErr, JobConfig, Losses, OptimizerAdapter, Result, RoleMaker,
    optimizer::{LocalOptimizer, MixedPrecision, SgdOptimizer},
};
use log::{debug, info};
use machine_learning::{
    Scope,
    arch::{Objective, Sequential, Supervised, loss::Mse},
};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::spec::NodeSpec;

const LOG_EVERY: usize = 20;
const INFERENCE_DIR: &str = "inference";

/// How the loss of a worker's shard evolved during training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub initial_loss: f32,
    pub final_loss: f32,
}

/// Runs this process' part of the job described by `spec`.
///
/// # Returns
/// The training report on workers, `None` on parameter servers.
pub async fn run<R: RoleMaker>(
    spec: &NodeSpec,
    job: &JobConfig,
    role_maker: R,
) -> Result<Option<Report>> {
    let mut algorithm = Algorithm::new(spec.mode);
    if let Algorithm::ParameterServer(ps) = &mut algorithm {
        let interval = Duration::from_millis(job.retry_interval_ms);
        ps.set_connect_retry(job.connect_retries, interval);
    }

    algorithm.init(role_maker).await?;

    let model = spec.model();
    declare(spec, &model, algorithm.executor_mut()?.scope_mut())?;

    let mut optimizer = algorithm.distributed_optimizer(local_optimizer(spec), Some(spec.strategy))?;

    if algorithm.is_server()? {
        algorithm.init_server(spec.model_dir.as_deref()).await?;
        algorithm.run_server().await?;
        return Ok(None);
    }

    algorithm.init_worker().await?;

    let (x, y) = synthetic(spec);
    let rows = algorithm.split_files(&(0..spec.samples).collect::<Vec<_>>())?;
    if rows.is_empty() {
        return Err(DistributedErr::InvalidConfig(format!(
            "{} samples leave worker {} without data",
            spec.samples,
            algorithm.worker_index()?
        )));
    }

    debug!(rows = rows.len(); "training on a shard of the synthetic data");
    let objective = Supervised::new(
        model.clone(),
        Mse,
        x.select(Axis(0), &rows),
        y.select(Axis(0), &rows),
    );

    let initial_loss = objective.value(algorithm.executor()?.scope())?;
    let no_grad_set = HashSet::new();

    for step in 0..spec.steps {
        optimizer
            .minimize(&mut algorithm, Losses::One(&objective), None, &no_grad_set)
            .await?;

        if step % LOG_EVERY == 0 {
            let loss = objective.value(algorithm.executor()?.scope())?;
            info!(step = step, loss = loss; "training");
        }
    }

    let final_loss = objective.value(algorithm.executor()?.scope())?;
    algorithm.stop_worker().await?;

    if let Some(dir) = &spec.output_dir {
        save(&algorithm, dir, &model)?;
    }

    Ok(Some(Report {
        initial_loss,
        final_loss,
    }))
}

fn local_optimizer(spec: &NodeSpec) -> Box<dyn LocalOptimizer> {
    let sgd = SgdOptimizer::new(spec.optimizer);

    if spec.mixed_precision {
        Box::new(MixedPrecision::new(sgd))
    } else {
        Box::new(sgd)
    }
}

/// Declares the model's parameters, every process draws the same values.
fn declare(spec: &NodeSpec, model: &Sequential, scope: &mut Scope) -> Result<()> {
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(spec.seed.wrapping_add(1))));
    model.declare(scope, spec.init, &rng)?;
    Ok(())
}

/// A noiseless linear regression problem, `y = x · c + 0.5`.
fn synthetic(spec: &NodeSpec) -> (Array2<f32>, Array2<f32>) {
    let mut rng = StdRng::seed_from_u64(spec.seed);

    let coeffs: Array1<f32> = (0..spec.input_size)
        .map(|_| rng.random_range(-1.0..1.0))
        .collect();
    let x = Array2::from_shape_fn((spec.samples, spec.input_size), |_| {
        rng.random_range(-1.0..1.0)
    });

    let y = (x.dot(&coeffs) + 0.5).insert_axis(Axis(1));
    (x, y)
}

fn save<R: RoleMaker>(algorithm: &Algorithm<R>, dir: &Path, model: &Sequential) -> Result<()> {
    let Some(written) = algorithm.save_persistables(dir)? else {
        return Ok(());
    };

    // The last layer's parameters produce the prediction.
    let names = model.param_names();
    let targets = &names[names.len().saturating_sub(1)..];
    algorithm.save_inference_model(dir.join(INFERENCE_DIR), &[], targets, true)?;

    info!(written = written; "saved the model into {}", dir.display());
    Ok(())
}
