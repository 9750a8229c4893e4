use std::{net::SocketAddr, ops::Range, path::Path, time::Duration};

use log::{debug, info};
use machine_learning::optimization::OptimizerSpec;
use tokio::net::{
    TcpListener,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use super::{AlgorithmBase, AlgorithmState, ParamLayout, partition_range};
use crate::{
    DistributedErr, Result,
    config::DistributedStrategy,
    execution::InferenceManifest,
    mode::Mode,
    optimizer::{LocalOptimizer, ParameterServerOptimizer, ParamsGrads},
    pserver::{PsClient, ServerBuilder},
    role::RoleKind,
    role_maker::RoleMaker,
};

const DEFAULT_CONNECT_RETRIES: usize = 30;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// The slice of the parameters a server process holds, ready to be served.
struct Serving {
    listener: TcpListener,
    range: Range<usize>,
    params: Vec<f32>,
}

/// Parameter server training: the flat parameters are split in contiguous ranges among
/// the servers, workers push gradients and pull the updated parameters.
pub struct ParameterServerAlgorithm<R: RoleMaker> {
    base: AlgorithmBase<R>,
    strategy: DistributedStrategy,
    update_rule: OptimizerSpec,
    connect_retries: usize,
    retry_interval: Duration,
    layout: Option<ParamLayout>,
    serving: Option<Serving>,
    client: Option<PsClient>,
}

impl<R: RoleMaker> ParameterServerAlgorithm<R> {
    /// Creates a new `ParameterServerAlgorithm`.
    ///
    /// # Arguments
    /// * `mode` - Either of the parameter server modes.
    pub fn new(mode: Mode) -> Self {
        Self {
            base: AlgorithmBase::new(mode),
            strategy: DistributedStrategy::default(),
            update_rule: OptimizerSpec::GradientDescent {
                learning_rate: 0.01,
            },
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            layout: None,
            serving: None,
            client: None,
        }
    }

    pub fn base(&self) -> &AlgorithmBase<R> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AlgorithmBase<R> {
        &mut self.base
    }

    pub fn strategy(&self) -> &DistributedStrategy {
        &self.strategy
    }

    /// The update rule the servers apply, taken from the bound optimizer.
    pub fn update_rule(&self) -> OptimizerSpec {
        self.update_rule
    }

    /// Sets how workers retry connecting to servers that aren't listening yet.
    pub fn set_connect_retry(&mut self, retries: usize, interval: Duration) {
        self.connect_retries = retries;
        self.retry_interval = interval;
    }

    fn expect_kind(&self, op: &'static str, expected: RoleKind) -> Result<()> {
        let kind = self.base.context()?.kind()?;
        if kind != expected {
            return Err(DistributedErr::RoleMisuse { op, kind });
        }

        Ok(())
    }

    /// Prepares this server's parameters and starts listening at its endpoint.
    ///
    /// # Arguments
    /// * `model_dir` - A checkpoint to load the parameters from, otherwise the current
    ///   values in the scope are served.
    ///
    /// # Errors
    /// `DistributedErr::RoleMisuse` on a worker.
    pub async fn init_server(&mut self, model_dir: Option<&Path>) -> Result<()> {
        self.expect_kind("init_server", RoleKind::Server)?;

        if let Some(dir) = model_dir {
            let loaded = self.base.executor_mut()?.load_persistables(dir)?;
            info!(loaded = loaded; "loaded the persistables from {}", dir.display());
        }

        let context = self.base.context()?;
        let (index, servers) = (context.server_index()?, context.server_num()?);
        let endpoint = context.current_endpoint()?.to_string();

        let scope = self.base.executor()?.scope();
        let layout = ParamLayout::of(scope);
        let range = partition_range(layout.len(), index, servers);
        let params = layout.gather(scope)?[range.clone()].to_vec();

        let listener = TcpListener::bind(&endpoint).await?;
        info!(
            server_index = index;
            "serving parameters {range:?} at {}", listener.local_addr()?
        );

        self.layout = Some(layout);
        self.serving = Some(Serving {
            listener,
            range,
            params,
        });
        Ok(())
    }

    /// The address `init_server` bound.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        let serving = self.serving.as_ref().ok_or(DistributedErr::Uninitialized)?;
        Ok(serving.listener.local_addr()?)
    }

    /// Serves every worker of the job until all of them disconnect, then writes the
    /// final parameters of this server back into the scope.
    ///
    /// # Errors
    /// * `DistributedErr::RoleMisuse` on a worker.
    /// * `DistributedErr::Uninitialized` if `init_server` wasn't called.
    pub async fn run_server(&mut self) -> Result<()> {
        self.expect_kind("run_server", RoleKind::Server)?;

        let Serving {
            listener,
            range,
            params,
        } = self.serving.take().ok_or(DistributedErr::Uninitialized)?;
        let workers = self.base.context()?.worker_num()?;

        self.base.set_state(AlgorithmState::ServerRunning);

        let mut server = ServerBuilder::new().build::<OwnedReadHalf, OwnedWriteHalf>(
            self.update_rule,
            &self.strategy,
            workers,
            &params,
        );

        for _ in 0..workers {
            let (stream, addr) = listener.accept().await?;
            debug!("worker connected from {addr}");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            server.spawn(rx, tx);
        }

        let params = server.run().await?;

        let layout = self.layout.as_ref().ok_or(DistributedErr::Uninitialized)?;
        let scope = self.base.executor_mut()?.scope_mut();
        let mut flat = layout.gather(scope)?;
        flat[range].copy_from_slice(&params);
        layout.scatter(&flat, scope)?;

        info!("every worker disconnected, server stopped");
        self.base.set_state(AlgorithmState::Stopped);
        Ok(())
    }

    /// Connects to every server and pulls the current parameters into the scope.
    ///
    /// # Errors
    /// `DistributedErr::RoleMisuse` on a server.
    pub async fn init_worker(&mut self) -> Result<()> {
        self.expect_kind("init_worker", RoleKind::Worker)?;

        let context = self.base.context()?;
        let index = context.worker_index()?;
        let endpoints = context.server_endpoints()?.to_vec();

        if endpoints.is_empty() {
            return Err(DistributedErr::InvalidConfig(
                "parameter server training needs at least one server".to_string(),
            ));
        }

        let layout = ParamLayout::of(self.base.executor()?.scope());
        let mut client = PsClient::connect(
            &endpoints,
            index,
            layout.len(),
            self.connect_retries,
            self.retry_interval,
        )
        .await?;

        let mut params = vec![0.; layout.len()];
        client.pull(&mut params).await?;
        layout.scatter(&params, self.base.executor_mut()?.scope_mut())?;

        info!(
            worker_index = index;
            "pulled {} parameters from {} servers", params.len(), endpoints.len()
        );

        self.layout = Some(layout);
        self.client = Some(client);
        self.base.set_state(AlgorithmState::WorkerRunning);
        Ok(())
    }

    /// Disconnects from every server.
    ///
    /// # Errors
    /// * `DistributedErr::RoleMisuse` on a server.
    /// * `DistributedErr::Uninitialized` if `init_worker` wasn't called.
    pub async fn stop_worker(&mut self) -> Result<()> {
        self.expect_kind("stop_worker", RoleKind::Worker)?;

        let mut client = self.client.take().ok_or(DistributedErr::Uninitialized)?;
        client.disconnect().await?;

        info!("parameter server worker stopped");
        self.base.set_state(AlgorithmState::Stopped);
        Ok(())
    }

    /// Pushes `params_grads` to the servers and writes the parameters they answer with
    /// into the scope.
    pub(crate) async fn push_pull(&mut self, params_grads: &ParamsGrads) -> Result<()> {
        let layout = self.layout.as_ref().ok_or(DistributedErr::Uninitialized)?;
        let client = self.client.as_mut().ok_or(DistributedErr::Uninitialized)?;

        let grad = layout.flatten_grads(params_grads)?;
        let mut params = vec![0.; client.len()];
        client.push_pull(&grad, &mut params).await?;

        layout.scatter(&params, self.base.executor_mut()?.scope_mut())
    }

    /// Wraps `optimizer` so its gradients are pushed to the servers.
    ///
    /// The optimizer's update rule and `strategy` are also the ones `init_server` and
    /// `run_server` use, so servers must bind the same optimizer as the workers.
    ///
    /// # Errors
    /// `DistributedErr::TypeMismatch` if `optimizer` can't compute and apply gradients.
    pub fn distributed_optimizer<O: LocalOptimizer>(
        &mut self,
        optimizer: O,
        strategy: Option<DistributedStrategy>,
    ) -> Result<ParameterServerOptimizer<O, R>> {
        let strategy = strategy.unwrap_or_default();
        let update_rule = optimizer.update_rule();
        let optimizer = ParameterServerOptimizer::new(optimizer, strategy)?;

        self.strategy = strategy;
        if let Some(rule) = update_rule {
            self.update_rule = rule;
        }

        self.base.bind_optimizer();
        Ok(optimizer)
    }

    fn is_first_worker(&self) -> Result<bool> {
        self.base.context()?.is_first_worker()
    }

    /// Saves the persistables, only the first worker writes.
    ///
    /// # Returns
    /// The amount of variables written, `None` on every other process.
    pub fn save_persistables<P: AsRef<Path>>(&self, dirname: P) -> Result<Option<usize>> {
        if !self.is_first_worker()? {
            debug!("not the first worker, skipping save_persistables");
            return Ok(None);
        }

        self.base.save_persistables(dirname).map(Some)
    }

    /// Exports the model for inference, only the first worker writes.
    pub fn save_inference_model<P: AsRef<Path>>(
        &self,
        dirname: P,
        feeded_var_names: &[String],
        target_vars: &[String],
        export_for_deployment: bool,
    ) -> Result<Option<InferenceManifest>> {
        if !self.is_first_worker()? {
            debug!("not the first worker, skipping save_inference_model");
            return Ok(None);
        }

        self.base
            .save_inference_model(dirname, feeded_var_names, target_vars, export_for_deployment)
            .map(Some)
    }
}
