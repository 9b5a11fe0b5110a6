use super::{
    errors::EngineError,
    health::HealthRecord,
    transport::{inspect_response, EngineTransport},
};
use crate::types::{EngineId, EngineStatus, EngineTarget};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One engine connection owned by the pool.
///
/// The dispatcher drives [`execute`](Self::execute) and the in-flight counter; the health
/// monitor is the only writer of the health record.
pub struct EngineHandle {
    id: EngineId,
    target: EngineTarget,
    transport: Arc<dyn EngineTransport>,
    in_flight: AtomicUsize,
    /// Milliseconds since the Unix epoch, 0 if no call ever succeeded.
    last_success_ms: AtomicI64,
    health: ArcSwap<HealthRecord>,
    probe_in_progress: AtomicBool,
}

/// RAII guard ensuring the in-flight counter is decremented on every exit path.
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Held while a health probe runs; clears the probe flag on drop.
pub struct ProbeGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl EngineHandle {
    #[must_use]
    pub fn new(id: EngineId, target: EngineTarget, transport: Arc<dyn EngineTransport>) -> Self {
        Self {
            id,
            target,
            transport,
            in_flight: AtomicUsize::new(0),
            last_success_ms: AtomicI64::new(0),
            health: ArcSwap::from_pointee(HealthRecord::new(Instant::now())),
            probe_in_progress: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> EngineId {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> &EngineTarget {
        &self.target
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.target.name
    }

    /// Runs one call against the engine.
    ///
    /// No retry happens here. The deadline and the cancellation token race the
    /// transport; whichever fires first drops the in-progress call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if `timeout` elapses first
    /// - [`EngineError::Cancelled`] if `cancel` fires first
    /// - [`EngineError::EngineReported`] if the engine answers with an error object
    /// - any transport error
    pub async fn execute(
        &self,
        payload: &Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let _guard = InFlightGuard::new(&self.in_flight);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.call_with_deadline(payload, timeout) => result,
        };

        if result.is_ok() {
            self.last_success_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        result
    }

    /// Runs a health probe. Probes are not counted as traffic: they neither touch the
    /// in-flight counter nor the last-success timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), minus cancellation.
    pub async fn probe(&self, payload: &Value, timeout: Duration) -> Result<Value, EngineError> {
        self.call_with_deadline(payload, timeout).await
    }

    async fn call_with_deadline(
        &self,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        match tokio::time::timeout(timeout, self.transport.call(payload)).await {
            Ok(result) => result.and_then(inspect_response),
            Err(_) => Err(EngineError::Timeout),
        }
    }

    /// Claims the single probe slot of this engine, or `None` if a probe is running.
    pub fn try_begin_probe(&self) -> Option<ProbeGuard<'_>> {
        self.probe_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ProbeGuard { flag: &self.probe_in_progress })
    }

    #[must_use]
    pub fn is_probing(&self) -> bool {
        self.probe_in_progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthRecord> {
        self.health.load_full()
    }

    /// Replaces the health record. Only the monitor calls this, while holding the
    /// probe guard.
    pub fn publish_health(&self, record: HealthRecord) {
        self.health.store(Arc::new(record));
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_success_ms(&self) -> i64 {
        self.last_success_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms() {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let health = self.health.load();
        EngineStatus {
            id: self.id,
            name: self.target.name.clone(),
            address: self.target.address.clone(),
            state: health.state,
            last_success: self.last_success(),
            in_flight: self.in_flight(),
            height: health.height,
            archival: health.archival,
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("name", &self.target.name)
            .field("state", &self.health.load().state)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
