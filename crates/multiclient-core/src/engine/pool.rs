use super::{
    errors::PoolError,
    handle::EngineHandle,
    health::HealthState,
    snapshot::PoolSnapshot,
    transport::EngineConnector,
};
use crate::types::{EngineId, EngineStatus, EngineTarget};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::info;

/// Membership bounds enforced on add and remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    pub min_engines: usize,
    pub max_engines: usize,
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self { min_engines: 0, max_engines: 64 }
    }
}

/// Owns the engine handles.
///
/// Reads are lock-free through `ArcSwap`; membership writers are serialised by one mutex
/// so that bound checks and id allocation see a consistent list.
pub struct EnginePool {
    engines: ArcSwap<Vec<Arc<EngineHandle>>>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
    bounds: PoolBounds,
    connector: Arc<dyn EngineConnector>,
}

impl EnginePool {
    #[must_use]
    pub fn new(connector: Arc<dyn EngineConnector>, bounds: PoolBounds) -> Self {
        Self {
            engines: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            bounds,
            connector,
        }
    }

    #[must_use]
    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    fn open(&self, target: EngineTarget) -> Result<Arc<EngineHandle>, PoolError> {
        let transport = self
            .connector
            .connect(&target)
            .map_err(|source| PoolError::Connect { name: target.name.clone(), source })?;
        let id = EngineId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(EngineHandle::new(id, target, transport)))
    }

    /// Connects `target` and appends it to the pool.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Full`] if the pool is at `max_engines`
    /// - [`PoolError::Connect`] if the connector rejects the target
    pub fn insert(&self, target: EngineTarget) -> Result<Arc<EngineHandle>, PoolError> {
        let _write = self.write_lock.lock();
        let current = self.engines.load_full();
        if current.len() >= self.bounds.max_engines {
            return Err(PoolError::Full(self.bounds.max_engines));
        }

        let handle = self.open(target)?;
        let mut next = (*current).clone();
        next.push(Arc::clone(&handle));
        self.engines.store(Arc::new(next));

        info!(engine_id = %handle.id(), engine = %handle.name(), "engine added");
        Ok(handle)
    }

    /// Removes the engine and returns its handle. Calls already running on it finish
    /// normally.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotFound`] for unknown ids
    /// - [`PoolError::AtMinimum`] if the pool is at `min_engines`
    pub fn remove(&self, id: EngineId) -> Result<Arc<EngineHandle>, PoolError> {
        let _write = self.write_lock.lock();
        let current = self.engines.load_full();
        let index =
            current.iter().position(|handle| handle.id() == id).ok_or(PoolError::NotFound(id))?;
        if current.len() <= self.bounds.min_engines {
            return Err(PoolError::AtMinimum(self.bounds.min_engines));
        }

        let mut next = (*current).clone();
        let removed = next.remove(index);
        self.engines.store(Arc::new(next));

        info!(engine_id = %id, engine = %removed.name(), "engine removed");
        Ok(removed)
    }

    /// Swaps the engine for a fresh handle with a new id in the same slot, connected to
    /// `target` or to the old target when `None`. Returns `(old, new)`.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotFound`] for unknown ids
    /// - [`PoolError::Connect`] if the connector rejects the target; the old engine stays
    pub fn replace(
        &self,
        id: EngineId,
        target: Option<EngineTarget>,
    ) -> Result<(Arc<EngineHandle>, Arc<EngineHandle>), PoolError> {
        let _write = self.write_lock.lock();
        let current = self.engines.load_full();
        let index =
            current.iter().position(|handle| handle.id() == id).ok_or(PoolError::NotFound(id))?;

        let old = Arc::clone(&current[index]);
        let fresh = self.open(target.unwrap_or_else(|| old.target().clone()))?;
        let mut next = (*current).clone();
        next[index] = Arc::clone(&fresh);
        self.engines.store(Arc::new(next));

        info!(
            old_engine_id = %id,
            engine_id = %fresh.id(),
            engine = %fresh.name(),
            "engine replaced"
        );
        Ok((old, fresh))
    }

    #[must_use]
    pub fn get(&self, id: EngineId) -> Option<Arc<EngineHandle>> {
        self.engines.load().iter().find(|handle| handle.id() == id).cloned()
    }

    /// All handles in registration order.
    #[must_use]
    pub fn handles(&self) -> Arc<Vec<Arc<EngineHandle>>> {
        self.engines.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.load().is_empty()
    }

    /// Ranked snapshot of every engine, Dead ones included.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::capture(&self.engines.load())
    }

    /// Ranked snapshot with Dead engines excluded, or the engine that has been Dead the
    /// longest when nothing else is left.
    #[must_use]
    pub fn routing_snapshot(&self) -> PoolSnapshot {
        self.snapshot().routable()
    }

    /// Highest height reported by any engine that is not Dead.
    #[must_use]
    pub fn best_height(&self) -> Option<u64> {
        self.engines
            .load()
            .iter()
            .map(|handle| handle.health())
            .filter(|health| health.state != HealthState::Dead)
            .filter_map(|health| health.height)
            .max()
    }

    /// Chain height the live engines agree has been reached.
    #[must_use]
    pub fn consensus_height(&self) -> Option<u64> {
        self.best_height()
    }

    #[must_use]
    pub fn status(&self) -> Vec<EngineStatus> {
        self.engines.load().iter().map(|handle| handle.status()).collect()
    }
}
