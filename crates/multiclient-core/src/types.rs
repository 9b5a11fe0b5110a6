use crate::engine::{errors::ErrorKind, health::HealthState};
use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

/// Stable identifier of an engine handle.
///
/// Ids are never reused: a replaced engine gets a fresh id even when it points at the
/// same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an engine connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTarget {
    /// Human-readable name used in logs and metrics.
    pub name: String,
    /// Node address handed to the connector.
    pub address: String,
    /// Root of the engine's key store, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_store: Option<PathBuf>,
}

impl EngineTarget {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self { name: name.into(), address: address.into(), key_store: None }
    }

    #[must_use]
    pub fn with_key_store(mut self, key_store: impl Into<PathBuf>) -> Self {
        self.key_store = Some(key_store.into());
        self
    }
}

/// How broadcast outcomes are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPolicy {
    /// Return the first successful response and cancel the remaining calls.
    #[default]
    FirstSuccess,
    /// Wait for every target and return the complete outcome map.
    AllResults,
}

/// Options of a broadcast dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastOptions {
    /// Reconciliation policy; `None` uses the dispatcher's configured default.
    pub policy: Option<BroadcastPolicy>,
    /// Fan out to at most this many top-ranked engines.
    pub limit: Option<usize>,
}

/// Routing mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Best-ranked engine, retried on the next-ranked ones.
    Single,
    /// Rotating cursor over the healthy engines.
    RoundRobin,
    /// Every eligible engine at once.
    Broadcast(BroadcastOptions),
}

impl DispatchMode {
    #[must_use]
    pub fn broadcast(policy: BroadcastPolicy) -> Self {
        Self::Broadcast(BroadcastOptions { policy: Some(policy), limit: None })
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::RoundRobin => "round_robin",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

/// Routing filters applied before mode selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters {
    /// Only route to engines known to keep full history.
    pub archival: bool,
    /// Only route to these engines.
    pub engines: Option<Vec<EngineId>>,
}

/// A caller request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct Request {
    pub payload: Arc<Value>,
    pub mode: DispatchMode,
    /// Per-call deadline override.
    pub timeout: Option<Duration>,
    pub params: RequestParameters,
}

impl Request {
    #[must_use]
    pub fn new(payload: Value, mode: DispatchMode) -> Self {
        Self {
            payload: Arc::new(payload),
            mode,
            timeout: None,
            params: RequestParameters::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn archival_only(mut self) -> Self {
        self.params.archival = true;
        self
    }

    #[must_use]
    pub fn pinned_to(mut self, engines: Vec<EngineId>) -> Self {
        self.params.engines = Some(engines);
        self
    }
}

/// Outcome of one call attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    Success(Value),
    Failure(ErrorKind),
    Timeout,
}

impl CallOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(kind) => kind.as_str(),
            Self::Timeout => "timeout",
        }
    }
}

/// Per-engine outcomes in snapshot order.
///
/// Serializes as a JSON object keyed by engine id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeMap(Vec<(EngineId, CallOutcome)>);

impl OutcomeMap {
    #[must_use]
    pub fn new(entries: Vec<(EngineId, CallOutcome)>) -> Self {
        Self(entries)
    }

    #[must_use]
    pub fn get(&self, id: EngineId) -> Option<&CallOutcome> {
        self.0.iter().find(|(engine_id, _)| *engine_id == id).map(|(_, outcome)| outcome)
    }

    pub fn ids(&self) -> impl Iterator<Item = EngineId> + '_ {
        self.0.iter().map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(EngineId, CallOutcome)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for OutcomeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, outcome) in &self.0 {
            map.serialize_entry(id, outcome)?;
        }
        map.end()
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// One payload from one engine (Single, RoundRobin, Broadcast first-success).
    Single {
        engine_id: EngineId,
        payload: Value,
        /// Number of call attempts made, including the successful one.
        attempts: u32,
    },
    /// One outcome per targeted engine (Broadcast all-results).
    Broadcast { outcomes: OutcomeMap },
}

impl Response {
    /// Source engine of a single-payload response.
    #[must_use]
    pub fn engine_id(&self) -> Option<EngineId> {
        match self {
            Self::Single { engine_id, .. } => Some(*engine_id),
            Self::Broadcast { .. } => None,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Single { payload, .. } => Some(payload),
            Self::Broadcast { .. } => None,
        }
    }

    #[must_use]
    pub fn outcomes(&self) -> Option<&OutcomeMap> {
        match self {
            Self::Single { .. } => None,
            Self::Broadcast { outcomes } => Some(outcomes),
        }
    }
}

/// Point-in-time view of one engine, as reported by `pool_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub id: EngineId,
    pub name: String,
    pub address: String,
    pub state: HealthState,
    pub last_success: Option<DateTime<Utc>>,
    pub in_flight: usize,
    /// Last masterchain height reported by the liveness probe.
    pub height: Option<u64>,
    /// Whether the engine keeps full history, once known.
    pub archival: Option<bool>,
}
