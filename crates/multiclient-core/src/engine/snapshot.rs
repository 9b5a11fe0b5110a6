use super::{
    handle::EngineHandle,
    health::{HealthRecord, HealthState},
};
use crate::types::{EngineId, RequestParameters};
use std::{cmp::Reverse, sync::Arc};

/// One engine as captured by a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub handle: Arc<EngineHandle>,
    pub health: Arc<HealthRecord>,
    pub in_flight: usize,
    pub last_success_ms: i64,
    /// Registration position in the pool at capture time.
    pub slot: usize,
}

impl SnapshotEntry {
    #[must_use]
    pub fn id(&self) -> EngineId {
        self.handle.id()
    }

    #[must_use]
    pub fn state(&self) -> HealthState {
        self.health.state
    }
}

/// Immutable, ranked view of the pool.
///
/// Entries are ordered by health state, then lowest in-flight count, then most recent
/// successful call. Every refinement returns a new snapshot; nothing is mutated in place.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl PoolSnapshot {
    /// Captures the current health and load of `handles` and ranks them.
    #[must_use]
    pub fn capture(handles: &[Arc<EngineHandle>]) -> Self {
        let mut entries: Vec<SnapshotEntry> = handles
            .iter()
            .enumerate()
            .map(|(slot, handle)| SnapshotEntry {
                handle: Arc::clone(handle),
                health: handle.health(),
                in_flight: handle.in_flight(),
                last_success_ms: handle.last_success_ms(),
                slot,
            })
            .collect();

        entries.sort_by_key(|entry| {
            (entry.state().rank(), entry.in_flight, Reverse(entry.last_success_ms), entry.slot)
        });

        Self { entries }
    }

    /// Drops Dead engines unless every engine is Dead, in which case only the engine that
    /// has been Dead the longest is kept as a fallback.
    #[must_use]
    pub fn routable(self) -> Self {
        if self.entries.iter().any(|entry| entry.state() != HealthState::Dead) {
            let entries = self
                .entries
                .into_iter()
                .filter(|entry| entry.state() != HealthState::Dead)
                .collect();
            return Self { entries };
        }

        let fallback = self
            .entries
            .into_iter()
            .min_by_key(|entry| (entry.health.dead_since, entry.slot));
        Self { entries: fallback.into_iter().collect() }
    }

    /// Keeps only the engines eligible for `params`.
    #[must_use]
    pub fn filtered(self, params: &RequestParameters) -> Self {
        if !params.archival && params.engines.is_none() {
            return self;
        }

        let entries = self
            .entries
            .into_iter()
            .filter(|entry| !params.archival || entry.health.archival == Some(true))
            .filter(|entry| params.engines.as_ref().is_none_or(|ids| ids.contains(&entry.id())))
            .collect();
        Self { entries }
    }

    /// Keeps only Healthy and Degraded engines. Returns the snapshot unchanged when none
    /// are left, so unprobed engines and the all-dead fallback still get traffic.
    #[must_use]
    pub fn serving(self) -> Self {
        let serving = |entry: &SnapshotEntry| {
            matches!(entry.state(), HealthState::Healthy | HealthState::Degraded)
        };
        if !self.entries.iter().any(serving) {
            return self;
        }

        let entries = self.entries.into_iter().filter(serving).collect();
        Self { entries }
    }

    /// Keeps the `limit` best-ranked engines.
    #[must_use]
    pub fn top(mut self, limit: usize) -> Self {
        self.entries.truncate(limit);
        self
    }

    /// Healthy engines in registration order, the round-robin rotation.
    #[must_use]
    pub fn healthy_in_registration_order(&self) -> Vec<&SnapshotEntry> {
        let mut healthy: Vec<&SnapshotEntry> =
            self.entries.iter().filter(|entry| entry.state() == HealthState::Healthy).collect();
        healthy.sort_by_key(|entry| entry.slot);
        healthy
    }

    #[must_use]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    #[must_use]
    pub fn ids(&self) -> Vec<EngineId> {
        self.entries.iter().map(SnapshotEntry::id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
