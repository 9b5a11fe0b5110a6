//! Reconciliation of call attempts into caller-visible results.
//!
//! Pure functions: the dispatcher collects [`CallAttempt`]s in completion order and hands
//! them over once it knows which policy applies.

use super::errors::{DispatchError, EngineError, EngineFailure, ErrorKind};
use crate::types::{CallOutcome, EngineId, OutcomeMap, Response};
use std::time::Duration;
use tokio::time::Instant;

/// One (request, engine) pairing and how it ended.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub engine_id: EngineId,
    /// 1-based position of this attempt within its dispatch.
    pub attempt: u32,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub outcome: CallOutcome,
}

impl CallAttempt {
    #[must_use]
    pub fn finished(
        engine_id: EngineId,
        attempt: u32,
        started_at: Instant,
        result: Result<serde_json::Value, EngineError>,
    ) -> Self {
        let outcome = match result {
            Ok(payload) => CallOutcome::Success(payload),
            Err(EngineError::Timeout) => CallOutcome::Timeout,
            Err(e) => CallOutcome::Failure(e.kind()),
        };
        Self { engine_id, attempt, started_at, elapsed: started_at.elapsed(), outcome }
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            CallOutcome::Success(_) => None,
            CallOutcome::Failure(kind) => Some(*kind),
            CallOutcome::Timeout => Some(ErrorKind::Timeout),
        }
    }
}

fn failures(attempts: &[CallAttempt]) -> Vec<EngineFailure> {
    attempts
        .iter()
        .filter_map(|attempt| {
            attempt.failure_kind().map(|kind| EngineFailure { engine_id: attempt.engine_id, kind })
        })
        .collect()
}

fn single(attempt: &CallAttempt, attempts: usize) -> Option<Response> {
    match &attempt.outcome {
        CallOutcome::Success(payload) => Some(Response::Single {
            engine_id: attempt.engine_id,
            payload: payload.clone(),
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }),
        _ => None,
    }
}

/// Result of a retry sequence: the last attempt if it succeeded, otherwise every failure.
///
/// # Errors
///
/// Returns [`DispatchError::AllEnginesFailed`] when no attempt succeeded.
pub fn sequential(attempts: &[CallAttempt]) -> Result<Response, DispatchError> {
    attempts
        .iter()
        .find_map(|attempt| single(attempt, attempts.len()))
        .ok_or_else(|| DispatchError::AllEnginesFailed { failures: failures(attempts) })
}

/// First success in completion order, regardless of the engine's rank.
///
/// # Errors
///
/// Returns [`DispatchError::AllEnginesFailed`] when every attempt failed.
pub fn first_success(attempts: &[CallAttempt]) -> Result<Response, DispatchError> {
    attempts
        .iter()
        .enumerate()
        .find_map(|(index, attempt)| single(attempt, index + 1))
        .ok_or_else(|| DispatchError::AllEnginesFailed { failures: failures(attempts) })
}

/// One outcome per target, keyed in target order. Targets without an attempt are
/// reported as [`CallOutcome::Timeout`].
#[must_use]
pub fn all_results(targets: &[EngineId], attempts: Vec<CallAttempt>) -> Response {
    let mut attempts = attempts;
    let outcomes = targets
        .iter()
        .map(|id| {
            let outcome = attempts
                .iter()
                .position(|attempt| attempt.engine_id == *id)
                .map_or(CallOutcome::Timeout, |index| attempts.swap_remove(index).outcome);
            (*id, outcome)
        })
        .collect();

    Response::Broadcast { outcomes: OutcomeMap::new(outcomes) }
}
