use std::{fmt, time::Duration};

use log::{debug, info};
use tokio::net::TcpListener;

use crate::{
    DistributedErr, Result,
    collective::{ReduceOp, StarCollective},
    config::JobConfig,
    role::{Role, RoleContext, RoleKind},
    transport,
};

/// What a role maker can provide to a distributed algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleMakerCapabilities {
    /// Knows about parameter servers.
    pub servers: bool,
    /// Provides collective operations among more than one worker.
    pub collective: bool,
}

impl fmt::Display for RoleMakerCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = [("servers", self.servers), ("collective", self.collective)]
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect();

        write!(f, "{{{}}}", names.join(", "))
    }
}

impl RoleMakerCapabilities {
    /// Whether every capability in `required` is also in `self`.
    pub fn contains(&self, required: &RoleMakerCapabilities) -> bool {
        (self.servers || !required.servers) && (self.collective || !required.collective)
    }
}

/// Discovers the role of this process and provides the collectives among workers.
#[allow(unused)]
#[trait_variant::make(RoleMaker: Send)]
pub trait RoleMakerTemplate {
    /// A short name for diagnostics.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> RoleMakerCapabilities;

    /// Runs role discovery, must be called once before any other method.
    async fn generate_role(&mut self) -> Result<()>;

    /// The role discovered by `generate_role`.
    fn context(&self) -> &RoleContext;

    /// Reduces `input` across all workers into `output`.
    ///
    /// # Errors
    /// `DistributedErr::LengthMismatch` if `input` and `output` differ in length.
    async fn all_reduce_worker(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        op: ReduceOp,
    ) -> Result<()>;

    /// Blocks until every worker reached the barrier.
    async fn barrier_worker(&mut self) -> Result<()>;
}

/// A role maker whose role is set explicitly by the user.
///
/// It has no transport, collectives only work on single worker jobs.
#[derive(Debug, Clone)]
pub struct UserDefinedRoleMaker {
    role: Role,
    context: RoleContext,
}

impl UserDefinedRoleMaker {
    /// Creates a new `UserDefinedRoleMaker`.
    ///
    /// # Arguments
    /// * `kind` - The kind of this process.
    /// * `index` - The index of this process among its peers of the same kind.
    /// * `worker_num` - The amount of workers in the job.
    /// * `server_endpoints` - The endpoints of the parameter servers.
    /// * `current_endpoint` - The endpoint of this process.
    pub fn new(
        kind: RoleKind,
        index: usize,
        worker_num: usize,
        server_endpoints: Vec<String>,
        current_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            role: Role {
                kind,
                index,
                worker_num,
                current_endpoint: current_endpoint.into(),
                worker_endpoints: Vec::new(),
                server_endpoints,
            },
            context: RoleContext::new(),
        }
    }

    fn single_worker(&self) -> Result<()> {
        if self.context.worker_num()? > 1 {
            return Err(DistributedErr::CollectiveUnsupported);
        }

        Ok(())
    }
}

impl RoleMaker for UserDefinedRoleMaker {
    fn name(&self) -> &'static str {
        "UserDefinedRoleMaker"
    }

    fn capabilities(&self) -> RoleMakerCapabilities {
        RoleMakerCapabilities {
            servers: true,
            collective: false,
        }
    }

    async fn generate_role(&mut self) -> Result<()> {
        let Role {
            kind,
            index,
            worker_num,
            ref server_endpoints,
            ..
        } = self.role;

        let out_of_range = match kind {
            RoleKind::Worker => index >= worker_num,
            RoleKind::Server => index >= server_endpoints.len(),
        };

        if worker_num == 0 || out_of_range {
            return Err(DistributedErr::InvalidConfig(format!(
                "{kind} {index} doesn't fit in a job with {worker_num} workers and {} servers",
                server_endpoints.len()
            )));
        }

        self.context.set(self.role.clone());
        Ok(())
    }

    fn context(&self) -> &RoleContext {
        &self.context
    }

    async fn all_reduce_worker(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        _op: ReduceOp,
    ) -> Result<()> {
        self.single_worker()?;

        if input.len() != output.len() {
            return Err(DistributedErr::LengthMismatch {
                got: input.len(),
                expected: output.len(),
            });
        }

        output.copy_from_slice(input);
        Ok(())
    }

    async fn barrier_worker(&mut self) -> Result<()> {
        self.single_worker()
    }
}

/// A role maker that reads the role from a `JobConfig` and connects the workers in a
/// star collective rooted at worker `0`.
pub struct CollectiveRoleMaker {
    config: JobConfig,
    context: RoleContext,
    collective: Option<StarCollective>,
}

impl CollectiveRoleMaker {
    /// Creates a new `CollectiveRoleMaker` that builds its collective over TCP.
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            context: RoleContext::new(),
            collective: None,
        }
    }

    /// Creates a new `CollectiveRoleMaker` over an already established collective.
    ///
    /// # Arguments
    /// * `config` - The job configuration.
    /// * `collective` - The collective among the job's workers.
    pub fn with_collective(config: JobConfig, collective: StarCollective) -> Self {
        Self {
            config,
            context: RoleContext::new(),
            collective: Some(collective),
        }
    }

    fn collective(&mut self) -> Result<&mut StarCollective> {
        let kind = self.context.kind()?;

        self.collective.as_mut().ok_or(DistributedErr::RoleMisuse {
            op: "collective operations",
            kind,
        })
    }

    /// Connects this worker with the rest of the job's workers.
    async fn connect(config: &JobConfig) -> Result<StarCollective> {
        let JobConfig {
            index,
            worker_num,
            ref worker_endpoints,
            connect_retries,
            retry_interval_ms,
            ..
        } = *config;

        let root = worker_endpoints.first().ok_or_else(|| {
            DistributedErr::InvalidConfig(format!(
                "a collective among {worker_num} workers needs the worker endpoints"
            ))
        })?;

        if index == 0 {
            let listener = TcpListener::bind(root).await?;
            info!("collective root listening at {root}");

            let mut peers = Vec::with_capacity(worker_num - 1);
            for _ in 1..worker_num {
                let (stream, addr) = listener.accept().await?;
                debug!("worker connected from {addr}");
                peers.push(stream.into_split());
            }

            StarCollective::accept(worker_num, peers).await
        } else {
            let interval = Duration::from_millis(retry_interval_ms);
            let stream = transport::connect_with_retry(root, connect_retries, interval).await?;
            info!(worker_index = index; "connected to the collective root at {root}");

            let (rx, tx) = stream.into_split();
            StarCollective::join(index, worker_num, rx, tx).await
        }
    }
}

impl RoleMaker for CollectiveRoleMaker {
    fn name(&self) -> &'static str {
        "CollectiveRoleMaker"
    }

    fn capabilities(&self) -> RoleMakerCapabilities {
        RoleMakerCapabilities {
            servers: true,
            collective: true,
        }
    }

    async fn generate_role(&mut self) -> Result<()> {
        self.config.validate()?;
        let role = self.config.role();

        if role.kind == RoleKind::Worker && self.collective.is_none() {
            let collective = match role.worker_num {
                1 => StarCollective::solo(),
                _ => Self::connect(&self.config).await?,
            };

            self.collective = Some(collective);
        }

        info!(index = role.index; "generated {} role", role.kind);
        self.context.set(role);
        Ok(())
    }

    fn context(&self) -> &RoleContext {
        &self.context
    }

    async fn all_reduce_worker(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        op: ReduceOp,
    ) -> Result<()> {
        self.collective()?.all_reduce(input, output, op).await
    }

    async fn barrier_worker(&mut self) -> Result<()> {
        self.collective()?.barrier().await
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectiveRoleMaker, RoleMaker, RoleMakerCapabilities, UserDefinedRoleMaker};
    use crate::{DistributedErr, collective::ReduceOp, config::JobConfig, role::RoleKind};

    #[test]
    fn capability_containment() {
        let servers_only = RoleMakerCapabilities {
            servers: true,
            collective: false,
        };
        let both = RoleMakerCapabilities {
            servers: true,
            collective: true,
        };

        assert!(both.contains(&servers_only));
        assert!(!servers_only.contains(&both));
        assert_eq!(both.to_string(), "{servers, collective}");
    }

    #[tokio::test]
    async fn user_defined_single_worker_collectives() {
        let mut role_maker = UserDefinedRoleMaker::new(RoleKind::Worker, 0, 1, Vec::new(), "");
        role_maker.generate_role().await.unwrap();

        let mut out = [0.; 2];
        role_maker
            .all_reduce_worker(&[1., 2.], &mut out, ReduceOp::Sum)
            .await
            .unwrap();
        assert_eq!(out, [1., 2.]);
        role_maker.barrier_worker().await.unwrap();
    }

    #[tokio::test]
    async fn user_defined_multi_worker_collectives_are_unsupported() {
        let mut role_maker = UserDefinedRoleMaker::new(RoleKind::Worker, 1, 2, Vec::new(), "");
        role_maker.generate_role().await.unwrap();

        let mut out = [0.; 1];
        let err = role_maker
            .all_reduce_worker(&[1.], &mut out, ReduceOp::Sum)
            .await;
        assert!(matches!(err, Err(DistributedErr::CollectiveUnsupported)));
    }

    #[tokio::test]
    async fn user_defined_rejects_out_of_range_roles() {
        let endpoints = vec!["127.0.0.1:6000".to_string()];
        let mut role_maker = UserDefinedRoleMaker::new(RoleKind::Server, 1, 2, endpoints, "");

        let err = role_maker.generate_role().await;
        assert!(matches!(err, Err(DistributedErr::InvalidConfig(_))));
        assert!(!role_maker.context().is_initialized());
    }

    #[tokio::test]
    async fn servers_have_no_collective() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "role": "server",
                "worker_num": 2,
                "server_endpoints": ["127.0.0.1:6000"],
                "current_endpoint": "127.0.0.1:6000"
            }"#,
        )
        .unwrap();

        let mut role_maker = CollectiveRoleMaker::new(config);
        role_maker.generate_role().await.unwrap();

        let err = role_maker.barrier_worker().await;
        assert!(matches!(
            err,
            Err(DistributedErr::RoleMisuse {
                kind: RoleKind::Server,
                ..
            })
        ));
    }
}
