use std::ops::Deref;

use machine_learning::optimization::Optimizer;
use tokio::task;

use super::ParameterStore;
use crate::Result;

/// Bridges the async server tasks with the blocking, CPU bound `ParameterStore`.
pub struct ParameterHandle<O: Optimizer>(ParameterStore<O>);

impl<O: Optimizer> Clone for ParameterHandle<O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<O: Optimizer> Deref for ParameterHandle<O> {
    type Target = ParameterStore<O>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<O: Optimizer> ParameterHandle<O> {
    pub fn new(store: ParameterStore<O>) -> Self {
        Self(store)
    }
}

impl<O: Optimizer + Send> ParameterHandle<O> {
    /// Async call to `ParameterStore::accumulate`.
    pub async fn accumulate(&self, grad: &[f32]) -> Result<()> {
        task::block_in_place(|| self.0.accumulate(grad))
    }

    /// Async call to `ParameterStore::update_params`.
    pub async fn update_params(&self) -> Result<()> {
        task::block_in_place(|| self.0.update_params())
    }

    /// Async call to `ParameterStore::pull_params`.
    pub async fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        task::block_in_place(|| self.0.pull_params(out))
    }
}
