use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info};
use machine_learning::optimization::{Optimizer, OptimizerSpec};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinSet,
};

use super::{BarrierSync, NoBlockingSync, ParameterHandle, ParameterStore, Synchronizer};
use crate::{
    DistributedErr, Result,
    config::{DistributedStrategy, SyncMode},
};

/// Lets the `ServerBuilder` return differently configured `ParameterServer`s.
#[async_trait::async_trait]
pub trait Server<R, W>: Send
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Indirection method for `ParameterServer::run`.
    async fn run(&mut self) -> Result<Vec<f32>>;

    /// Indirection method for `ParameterServer::spawn`.
    fn spawn(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>);
}

/// Serves the parameters of one server to the job's workers, one task per worker.
pub struct ParameterServer<O: Optimizer, S: Synchronizer> {
    tasks: JoinSet<Result<()>>,
    handle: ParameterHandle<O>,
    synchronizer: S,
}

impl<O, S> ParameterServer<O, S>
where
    O: Optimizer + Send + 'static,
    S: Synchronizer + Sync + 'static,
{
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `handle` - The handle to the server's parameters.
    /// * `synchronizer` - Decides when pushed gradients are applied.
    pub fn new(handle: ParameterHandle<O>, synchronizer: S) -> Self {
        Self {
            tasks: JoinSet::new(),
            handle,
            synchronizer,
        }
    }

    /// Waits until every worker disconnected.
    ///
    /// # Returns
    /// The final parameters of this server.
    pub async fn run(&mut self) -> Result<Vec<f32>> {
        while let Some(res) = self.tasks.join_next().await {
            res.map_err(io::Error::other)??;
        }

        let mut params = vec![0.; self.handle.len()];
        self.handle.pull_params(&mut params).await?;
        Ok(params)
    }

    /// Spawns the task that serves a newly connected worker.
    ///
    /// The worker must first send `Join`, then any amount of gradients or `Pull`s, each
    /// one answered with the current parameters, and finally `Disconnect`.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the connection.
    /// * `tx` - The sending end of the connection.
    pub fn spawn<R, W>(&mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = self.handle.clone();
        let synchronizer = self.synchronizer.clone();

        let task = async move {
            let mut rx_buf: Vec<f32> = Vec::new();
            let mut params = vec![0.; handle.len()];

            let msg: Msg = rx.recv_into(&mut rx_buf).await?;
            let Msg::Control(Command::Join { worker_index }) = msg else {
                return Err(DistributedErr::unexpected("join", &msg));
            };
            debug!(worker_index = worker_index; "worker joined");

            loop {
                let msg: Msg = rx.recv_into(&mut rx_buf).await?;

                match msg {
                    Msg::Data(Payload::Gradient(grad)) => {
                        synchronizer.step(&handle, grad, &mut params).await?
                    }
                    Msg::Control(Command::Pull) => handle.pull_params(&mut params).await?,
                    Msg::Control(Command::Disconnect) => break,
                    msg => return Err(DistributedErr::unexpected("gradient or pull", &msg)),
                }

                let msg = Msg::Data(Payload::Params(&mut params));
                tx.send(&msg).await?;
            }

            debug!(worker_index = worker_index; "worker disconnected");
            Ok(())
        };

        self.tasks.spawn(task);
    }
}

#[async_trait::async_trait]
impl<R, W, O, S> Server<R, W> for ParameterServer<O, S>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    O: Optimizer + Send + 'static,
    S: Synchronizer + Sync + 'static,
{
    async fn run(&mut self) -> Result<Vec<f32>> {
        self.run().await
    }

    fn spawn(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>) {
        self.spawn(rx, tx)
    }
}

/// Builds `Server`s for the parameter server strategy.
#[derive(Debug, Default)]
pub struct ServerBuilder;

impl ServerBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the server holding `params`.
    ///
    /// # Arguments
    /// * `update_rule` - The update rule applied to every shard.
    /// * `strategy` - Decides the synchronization, averaging and sharding.
    /// * `workers` - The amount of workers in the job.
    /// * `params` - The initial values of this server's parameters.
    pub fn build<R, W>(
        &self,
        update_rule: OptimizerSpec,
        strategy: &DistributedStrategy,
        workers: usize,
        params: &[f32],
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let grad_scale = match strategy.sync_mode {
            SyncMode::Sync if strategy.average_gradients => 1. / workers as f32,
            _ => 1.,
        };

        let factory = |len| update_rule.build(len);
        let store = ParameterStore::new(strategy.shard_size, params, factory, grad_scale);

        info!(
            params = params.len(),
            workers = workers;
            "built {:?} parameter server", strategy.sync_mode
        );

        self.resolve_synchronizer(strategy.sync_mode, workers, store)
    }

    /// Resolves the `Synchronizer` for the server.
    fn resolve_synchronizer<R, W, O>(
        &self,
        sync_mode: SyncMode,
        workers: usize,
        store: ParameterStore<O>,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
    {
        match sync_mode {
            SyncMode::Sync => self.terminate_build(store, BarrierSync::new(workers)),
            SyncMode::Async => self.terminate_build(store, NoBlockingSync::new()),
        }
    }

    /// Terminates the build and instantiates the server.
    fn terminate_build<R, W, O, S>(
        &self,
        store: ParameterStore<O>,
        synchronizer: S,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
        S: Synchronizer + Sync + 'static,
    {
        let handle = ParameterHandle::new(store);
        Box::new(ParameterServer::new(handle, synchronizer))
    }
}
