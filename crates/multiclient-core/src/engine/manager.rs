use super::{
    dispatcher::{DispatchPolicy, Dispatcher},
    errors::{DispatchError, PoolError},
    monitor::HealthMonitor,
    pool::EnginePool,
};
use crate::{
    metrics::MetricsCollector,
    types::{DispatchMode, EngineId, EngineStatus, EngineTarget, Request, Response},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Entry point tying the pool, the health monitor and the dispatcher together.
///
/// Built with [`MultiClientBuilder`](super::builder::MultiClientBuilder). Call
/// [`start`](Self::start) from within a Tokio runtime to begin health probing.
pub struct MultiClient {
    pool: Arc<EnginePool>,
    dispatcher: Dispatcher,
    monitor: HealthMonitor,
    metrics: Arc<MetricsCollector>,
}

impl MultiClient {
    pub(crate) fn new(
        pool: Arc<EnginePool>,
        dispatcher: Dispatcher,
        monitor: HealthMonitor,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { pool, dispatcher, monitor, metrics }
    }

    /// Spawns the health probe tasks.
    pub fn start(&self) {
        self.metrics.record_pool_size(self.pool.len());
        self.monitor.start();
    }

    /// Submits `payload` with the given mode and optional per-call timeout.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn submit(
        &self,
        payload: Value,
        mode: DispatchMode,
        timeout: Option<Duration>,
    ) -> Result<Response, DispatchError> {
        let mut request = Request::new(payload, mode);
        request.timeout = timeout;
        self.send(&request).await
    }

    /// Submits a fully specified request.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn send(&self, request: &Request) -> Result<Response, DispatchError> {
        self.dispatcher.dispatch(request, &CancellationToken::new()).await
    }

    /// Submits a request that the caller can cancel through `cancel`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn send_with_cancel(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        self.dispatcher.dispatch(request, cancel).await
    }

    /// Status of every engine in registration order.
    #[must_use]
    pub fn pool_status(&self) -> Vec<EngineStatus> {
        self.pool.status()
    }

    /// Adds an engine and starts probing it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Full`] or [`PoolError::Connect`].
    pub fn add_engine(&self, target: EngineTarget) -> Result<EngineId, PoolError> {
        let handle = self.pool.insert(target)?;
        let id = handle.id();
        self.monitor.watch(handle);
        self.metrics.record_pool_size(self.pool.len());
        Ok(id)
    }

    /// Removes an engine and stops probing it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] or [`PoolError::AtMinimum`].
    pub fn remove_engine(&self, id: EngineId) -> Result<(), PoolError> {
        self.pool.remove(id)?;
        self.monitor.unwatch(id);
        self.metrics.record_pool_size(self.pool.len());
        Ok(())
    }

    /// Replaces an engine with a fresh handle, keeping its ranking slot. Returns the new id.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] or [`PoolError::Connect`].
    pub fn replace_engine(
        &self,
        id: EngineId,
        target: Option<EngineTarget>,
    ) -> Result<EngineId, PoolError> {
        let (_, fresh) = self.pool.replace(id, target)?;
        let fresh_id = fresh.id();
        self.monitor.unwatch(id);
        self.monitor.watch(fresh);
        Ok(fresh_id)
    }

    /// Probes an engine immediately. Returns `None` for unknown engines or while another
    /// probe of the engine is running.
    pub async fn check_engine(&self, id: EngineId) -> Option<EngineStatus> {
        self.monitor.check(id).await?;
        self.pool.get(id).map(|handle| handle.status())
    }

    /// Best masterchain height among engines that are not Dead.
    #[must_use]
    pub fn consensus_height(&self) -> Option<u64> {
        self.pool.consensus_height()
    }

    #[must_use]
    pub fn policy(&self) -> Arc<DispatchPolicy> {
        self.dispatcher.policy()
    }

    /// Replaces the dispatch policy for later dispatches.
    pub fn update_policy(&self, policy: DispatchPolicy) {
        info!(
            retry_budget = policy.retry_budget,
            default_timeout_ms = policy.default_timeout.as_millis(),
            broadcast_policy = ?policy.broadcast_policy,
            "dispatch policy updated"
        );
        self.dispatcher.update_policy(policy);
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Stops every probe task. Dispatches keep working on the last published health.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
    }
}
