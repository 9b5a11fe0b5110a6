use crate::types::EngineId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failed engine call.
///
/// Used for diagnostics in aggregate failures and as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No connection to the engine could be established.
    Unreachable,
    /// The per-call deadline elapsed before a response arrived.
    Timeout,
    /// The engine answered with a malformed response or an error object.
    Protocol,
    /// The call was abandoned after cooperative cancellation.
    Cancelled,
}

impl ErrorKind {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors produced by a single engine call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// The underlying connection is not established or was refused.
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its deadline.
    #[error("Request timeout")]
    Timeout,

    /// The response could not be parsed or had an unexpected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The engine returned an error object instead of a result.
    #[error("Engine error {code}: {message}")]
    EngineReported { code: i64, message: String },

    /// The call observed cancellation before it completed.
    #[error("Call cancelled")]
    Cancelled,
}

impl EngineError {
    /// Maps the error onto its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::Timeout => ErrorKind::Timeout,
            Self::Protocol(_) | Self::EngineReported { .. } => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// One entry of the per-engine diagnostics attached to an aggregate failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineFailure {
    pub engine_id: EngineId,
    pub kind: ErrorKind,
}

/// Errors surfaced to callers of `submit`.
///
/// Engine-level failures never appear here directly: they are retried on other engines
/// or folded into [`DispatchError::AllEnginesFailed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No engine is registered, or none is eligible for the request's filters.
    #[error("No engines available")]
    PoolEmpty,

    /// Every attempt failed; carries the failure kind of each attempted engine.
    #[error("All engines failed ({} attempts)", failures.len())]
    AllEnginesFailed { failures: Vec<EngineFailure> },

    /// The caller cancelled the dispatch before it produced a result.
    #[error("Dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolEmpty => "pool_empty",
            Self::AllEnginesFailed { .. } => "all_engines_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors from pool membership changes.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Engine {0} not found")]
    NotFound(EngineId),

    #[error("Pool is full ({0} engines)")]
    Full(usize),

    #[error("Pool cannot shrink below {0} engines")]
    AtMinimum(usize),

    #[error("Failed to connect engine {name}: {source}")]
    Connect {
        name: String,
        #[source]
        source: EngineError,
    },
}
