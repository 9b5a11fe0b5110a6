use super::{
    errors::ErrorKind,
    handle::EngineHandle,
    health::{HealthRecord, HealthSignal, HealthState, HealthThresholds},
    pool::EnginePool,
};
use crate::{metrics::MetricsCollector, types::EngineId};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Probe schedule, probe requests and debounce thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
    /// Probe interval of Dead engines.
    pub dead_probe_interval: Duration,
    pub probe_timeout: Duration,
    pub archival_check_interval: Duration,
    /// Read-only liveness query.
    pub probe_request: Value,
    /// JSON pointer to the height inside the probe response.
    pub height_pointer: String,
    /// Lookup of an early block, answered only by engines that keep full history.
    pub archival_request: Value,
    pub thresholds: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(2),
            dead_probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            archival_check_interval: Duration::from_secs(120),
            probe_request: json!({"@type": "blocks.getMasterchainInfo"}),
            height_pointer: "/last/seqno".to_string(),
            archival_request: json!({
                "@type": "blocks.lookupBlock",
                "mode": 1,
                "id": {
                    "@type": "ton.blockId",
                    "workchain": -1,
                    "shard": "-9223372036854775808",
                    "seqno": 3
                },
                "lt": 0,
                "utime": 0
            }),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Runs probes and publishes their health records.
struct Prober {
    pool: Arc<EnginePool>,
    config: MonitorConfig,
    metrics: Arc<MetricsCollector>,
}

impl Prober {
    /// Probes `handle` once. Returns `None` without probing if another probe of the same
    /// engine is running.
    async fn probe(&self, handle: &EngineHandle) -> Option<Arc<HealthRecord>> {
        let _guard = handle.try_begin_probe()?;

        let now = Instant::now();
        let probed = handle.probe(&self.config.probe_request, self.config.probe_timeout).await;
        let signal = match probed {
            Ok(response) => match read_height(&response, &self.config.height_pointer) {
                Some(height) => {
                    let best = self.pool.best_height().unwrap_or(height).max(height);
                    HealthSignal::classify(height, best, self.config.thresholds.max_height_lag)
                }
                None => {
                    debug!(engine = %handle.name(), "probe response without height");
                    HealthSignal::Failure(ErrorKind::Protocol)
                }
            },
            Err(e) => {
                debug!(engine = %handle.name(), error = %e, "probe failed");
                HealthSignal::Failure(e.kind())
            }
        };

        let current = handle.health();
        let (mut next, transition) = current.apply(signal, &self.config.thresholds, now);

        if signal.is_success()
            && next.archival_check_due(self.config.archival_check_interval, now)
        {
            if let Some(archival) = self.check_archival(handle).await {
                if next.archival != Some(archival) {
                    info!(engine = %handle.name(), archival, "archival capability detected");
                }
                next.archival = Some(archival);
                next.last_archival_check = Some(now);
            }
        }

        let height = next.height;
        let state = next.state;
        handle.publish_health(next);
        self.metrics.record_probe(handle.name(), signal.is_success(), height);

        if let Some(transition) = transition {
            self.log_transition(handle, transition.from, transition.to);
            self.metrics.record_health_transition(handle.name(), transition.from, transition.to);
        } else {
            self.metrics.record_health(handle.name(), state);
        }

        Some(handle.health())
    }

    /// `Some(true)` if the engine answered the lookup, `Some(false)` if it reported an
    /// error, `None` if the probe itself failed.
    async fn check_archival(&self, handle: &EngineHandle) -> Option<bool> {
        match handle.probe(&self.config.archival_request, self.config.probe_timeout).await {
            Ok(_) => Some(true),
            Err(e) if e.kind() == ErrorKind::Protocol => Some(false),
            Err(e) => {
                debug!(engine = %handle.name(), error = %e, "archival probe failed");
                None
            }
        }
    }

    fn log_transition(&self, handle: &EngineHandle, from: HealthState, to: HealthState) {
        match to {
            HealthState::Healthy => info!(
                engine_id = %handle.id(),
                engine = %handle.name(),
                from = from.as_str(),
                "engine healthy"
            ),
            HealthState::Degraded | HealthState::Dead => warn!(
                engine_id = %handle.id(),
                engine = %handle.name(),
                from = from.as_str(),
                to = to.as_str(),
                "engine health degraded"
            ),
            HealthState::Unknown => {}
        }
    }
}

fn read_height(response: &Value, pointer: &str) -> Option<u64> {
    let value = response.pointer(pointer)?;
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Keeps one probe task per engine.
///
/// Tasks are independent of request traffic and stop when their engine is unwatched or
/// the monitor shuts down.
pub struct HealthMonitor {
    prober: Arc<Prober>,
    tasks: DashMap<EngineId, CancellationToken>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        pool: Arc<EnginePool>,
        config: MonitorConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            prober: Arc::new(Prober { pool, config, metrics }),
            tasks: DashMap::new(),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.prober.config
    }

    /// Spawns a probe task for every engine currently in the pool. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let handles = self.prober.pool.handles();
        info!(engines = handles.len(), "health monitor started");
        for handle in handles.iter() {
            self.watch(Arc::clone(handle));
        }
    }

    /// Starts probing `handle`. No-op before [`start`](Self::start) or after shutdown.
    pub fn watch(&self, handle: Arc<EngineHandle>) {
        if !self.started.load(Ordering::Acquire) || self.shutdown.is_cancelled() {
            return;
        }

        let id = handle.id();
        let token = self.shutdown.child_token();
        if let Some(previous) = self.tasks.insert(id, token.clone()) {
            previous.cancel();
        }

        // A removal that ran before the token was registered found nothing to unwatch.
        let still_pooled =
            self.prober.pool.get(id).is_some_and(|pooled| Arc::ptr_eq(&pooled, &handle));
        if !still_pooled {
            token.cancel();
            self.tasks.remove_if(&id, |_, registered| registered.is_cancelled());
            debug!(engine_id = %id, "engine left the pool before probing started");
            return;
        }

        let prober = Arc::clone(&self.prober);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = prober.probe(&handle) => {}
                }

                let wait = if handle.health().state == HealthState::Dead {
                    prober.config.dead_probe_interval
                } else {
                    prober.config.probe_interval
                };

                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }
            }
            debug!(engine = %handle.name(), "probe task stopped");
        });
    }

    /// Stops probing the engine.
    pub fn unwatch(&self, id: EngineId) {
        if let Some((_, token)) = self.tasks.remove(&id) {
            token.cancel();
        }
    }

    /// Probes the engine immediately, outside its schedule.
    ///
    /// Returns `None` for unknown engines and when a probe of the engine is already
    /// running.
    pub async fn check(&self, id: EngineId) -> Option<Arc<HealthRecord>> {
        let handle = self.prober.pool.get(id)?;
        self.prober.probe(&handle).await
    }

    #[must_use]
    pub fn watched(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every probe task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.clear();
        info!("health monitor shutting down");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
