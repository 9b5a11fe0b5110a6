//! Builder pattern for constructing a [`MultiClient`].

use super::{
    dispatcher::{DispatchPolicy, Dispatcher},
    errors::PoolError,
    manager::MultiClient,
    monitor::{HealthMonitor, MonitorConfig},
    pool::{EnginePool, PoolBounds},
    transport::{EngineConnector, HttpConnector},
};
use crate::{config::AppConfig, metrics::MetricsCollector, types::EngineTarget};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building a [`MultiClient`].
#[derive(Debug, Error)]
pub enum BuilderError {
    /// The default HTTP connector could not be created.
    #[error("Failed to initialize HTTP connector: {0}")]
    ConnectorInit(String),

    #[error("Invalid pool bounds: min {min} > max {max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("Fewer engines ({count}) than the pool minimum ({min})")]
    BelowMinimum { count: usize, min: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An initial engine could not be added.
    #[error(transparent)]
    Engine(#[from] PoolError),
}

/// Builder for a [`MultiClient`].
///
/// # Examples
///
/// ```no_run
/// # use multiclient_core::{engine::MultiClientBuilder, types::EngineTarget};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = MultiClientBuilder::new()
///     .engine(EngineTarget::new("ls-1", "http://127.0.0.1:8081"))
///     .engine(EngineTarget::new("ls-2", "http://127.0.0.1:8082"))
///     .build()?;
/// client.start();
/// # Ok(())
/// # }
/// ```
pub struct MultiClientBuilder {
    targets: Vec<EngineTarget>,
    policy: DispatchPolicy,
    monitor: MonitorConfig,
    bounds: PoolBounds,
    connector: Option<Arc<dyn EngineConnector>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MultiClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            policy: DispatchPolicy::default(),
            monitor: MonitorConfig::default(),
            bounds: PoolBounds::default(),
            connector: None,
            metrics: None,
        }
    }

    /// Seeds the builder from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidConfig`] if the configuration does not validate.
    pub fn from_config(config: &AppConfig) -> Result<Self, BuilderError> {
        config.validate().map_err(BuilderError::InvalidConfig)?;

        Ok(Self::new()
            .engines(config.engines.iter().cloned())
            .dispatch_policy(config.policy.dispatch_policy())
            .monitor_config(config.policy.monitor_config())
            .bounds(config.policy.bounds()))
    }

    #[must_use]
    pub fn engine(mut self, target: EngineTarget) -> Self {
        self.targets.push(target);
        self
    }

    #[must_use]
    pub fn engines(mut self, targets: impl IntoIterator<Item = EngineTarget>) -> Self {
        self.targets.extend(targets);
        self
    }

    #[must_use]
    pub fn dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    #[must_use]
    pub fn bounds(mut self, bounds: PoolBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Replaces the default HTTP connector.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn EngineConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client and connects the initial engines in order. Probing starts with
    /// [`MultiClient::start`].
    ///
    /// # Errors
    ///
    /// - [`BuilderError::InvalidBounds`] if `min_engines > max_engines`
    /// - [`BuilderError::BelowMinimum`] if fewer targets than `min_engines` were given
    /// - [`BuilderError::ConnectorInit`] if the default connector cannot be created
    /// - [`BuilderError::Engine`] if an initial engine cannot be added
    pub fn build(self) -> Result<MultiClient, BuilderError> {
        let PoolBounds { min_engines, max_engines } = self.bounds;
        if min_engines > max_engines {
            return Err(BuilderError::InvalidBounds { min: min_engines, max: max_engines });
        }
        if self.targets.len() < min_engines {
            return Err(BuilderError::BelowMinimum { count: self.targets.len(), min: min_engines });
        }

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(
                HttpConnector::new().map_err(|e| BuilderError::ConnectorInit(e.to_string()))?,
            ),
        };
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(MetricsCollector::new()));

        let pool = Arc::new(EnginePool::new(connector, self.bounds));
        for target in self.targets {
            pool.insert(target)?;
        }

        let dispatcher = Dispatcher::new(Arc::clone(&pool), self.policy, Arc::clone(&metrics));
        let monitor = HealthMonitor::new(Arc::clone(&pool), self.monitor, Arc::clone(&metrics));

        Ok(MultiClient::new(pool, dispatcher, monitor, metrics))
    }
}

impl Default for MultiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
