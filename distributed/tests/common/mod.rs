#![allow(dead_code)]

use distributed::{
    CollectiveRoleMaker, JobConfig, RoleKind, StarCollective, UserDefinedRoleMaker,
};
use machine_learning::{
    Scope, Variable,
    arch::{Gradients, Objective},
};
use tokio::io;

/// `sum_i (w_i - t_i)^2 / 2` for every parameter `w` with its target `t`.
pub struct Quadratic {
    targets: Vec<(String, Vec<f32>)>,
}

impl Quadratic {
    pub fn new(targets: &[(&str, &[f32])]) -> Self {
        Self {
            targets: targets
                .iter()
                .map(|(name, target)| (name.to_string(), target.to_vec()))
                .collect(),
        }
    }
}

impl Objective for Quadratic {
    fn params(&self) -> Vec<String> {
        self.targets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn value(&self, scope: &Scope) -> machine_learning::Result<f32> {
        let mut total = 0.;
        for (name, target) in &self.targets {
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

    fn gradients(&self, scope: &Scope) -> machine_learning::Result<(f32, Gradients)> {
        let mut grads = Vec::with_capacity(self.targets.len());
        for (name, target) in &self.targets {
            let var = scope.get(name)?;
            let grad = var.data.iter().zip(target).map(|(w, t)| w - t).collect();
            grads.push((name.clone(), grad));
        }

        Ok((self.value(scope)?, grads))
    }
}

/// Declares persistable variables with the given values.
pub fn declare(scope: &mut Scope, vars: &[(&str, &[f32])]) {
    for (name, data) in vars {
        let var = Variable::new(*name, vec![data.len()], data.to_vec()).unwrap();
        scope.insert(var);
    }
}

pub fn single_worker(server_endpoints: Vec<String>) -> UserDefinedRoleMaker {
    UserDefinedRoleMaker::new(RoleKind::Worker, 0, 1, server_endpoints, "")
}

pub fn worker_config(index: usize, worker_num: usize) -> JobConfig {
    JobConfig {
        role: RoleKind::Worker,
        index,
        worker_num,
        worker_endpoints: Vec::new(),
        server_endpoints: Vec::new(),
        current_endpoint: String::new(),
        connect_retries: 0,
        retry_interval_ms: 0,
    }
}

/// A star collective of `size` participants over in memory streams, indexed by worker.
pub async fn collectives(size: usize) -> Vec<StarCollective> {
    let mut leaves = Vec::with_capacity(size - 1);
    let mut root_ends = Vec::with_capacity(size - 1);

    for index in 1..size {
        let (root_side, leaf_side) = io::duplex(1 << 16);
        let (rx, tx) = io::split(leaf_side);
        leaves.push(StarCollective::join(index, size, rx, tx).await.unwrap());
        root_ends.push(io::split(root_side));
    }

    let root = StarCollective::accept(size, root_ends).await.unwrap();

    let mut all = vec![root];
    all.extend(leaves);
    all
}

/// Role makers for `size` workers connected in memory.
pub async fn collective_role_makers(size: usize) -> Vec<CollectiveRoleMaker> {
    collectives(size)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, collective)| {
            CollectiveRoleMaker::with_collective(worker_config(index, size), collective)
        })
        .collect()
}
