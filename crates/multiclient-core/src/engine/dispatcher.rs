use super::{
    aggregator::{self, CallAttempt},
    errors::{DispatchError, ErrorKind},
    handle::EngineHandle,
    health::HealthState,
    pool::EnginePool,
    snapshot::{PoolSnapshot, SnapshotEntry},
};
use crate::{
    metrics::MetricsCollector,
    types::{BroadcastOptions, BroadcastPolicy, CallOutcome, DispatchMode, Request, Response},
};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{task::JoinSet, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Dispatch parameters, swappable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Per-call deadline when the request carries none.
    pub default_timeout: Duration,
    /// Total attempts of a Single or RoundRobin dispatch, first call included.
    pub retry_budget: u32,
    /// Reconciliation of broadcasts that do not pick one.
    pub broadcast_policy: BroadcastPolicy,
    /// Broadcast only to Healthy and Degraded engines while there are any.
    pub exclude_dead: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            retry_budget: 3,
            broadcast_policy: BroadcastPolicy::FirstSuccess,
            exclude_dead: true,
        }
    }
}

/// Routes requests to engines.
///
/// Every dispatch takes one routing snapshot and never looks at the pool again, so
/// membership and policy changes only affect later dispatches.
pub struct Dispatcher {
    pool: Arc<EnginePool>,
    policy: ArcSwap<DispatchPolicy>,
    cursor: AtomicUsize,
    metrics: Arc<MetricsCollector>,
}

async fn run_attempt(
    handle: Arc<EngineHandle>,
    payload: Arc<Value>,
    attempt: u32,
    timeout: Duration,
    scope: CancellationToken,
    metrics: Arc<MetricsCollector>,
) -> CallAttempt {
    let started_at = Instant::now();
    let result = handle.execute(&payload, timeout, &scope).await;
    let call = CallAttempt::finished(handle.id(), attempt, started_at, result);

    match &call.outcome {
        CallOutcome::Success(_) => debug!(
            engine_id = %call.engine_id,
            engine = %handle.name(),
            attempt,
            elapsed_ms = call.elapsed.as_millis(),
            "call succeeded"
        ),
        CallOutcome::Failure(ErrorKind::Cancelled) => debug!(
            engine_id = %call.engine_id,
            engine = %handle.name(),
            attempt,
            "call cancelled"
        ),
        outcome => warn!(
            engine_id = %call.engine_id,
            engine = %handle.name(),
            attempt,
            outcome = outcome.as_str(),
            elapsed_ms = call.elapsed.as_millis(),
            "call failed"
        ),
    }

    metrics.record_call_attempt(handle.name(), call.outcome.as_str(), call.elapsed);
    metrics.record_in_flight(handle.name(), handle.in_flight());
    call
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        pool: Arc<EnginePool>,
        policy: DispatchPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { pool, policy: ArcSwap::from_pointee(policy), cursor: AtomicUsize::new(0), metrics }
    }

    #[must_use]
    pub fn policy(&self) -> Arc<DispatchPolicy> {
        self.policy.load_full()
    }

    /// Replaces the policy. Dispatches already running keep the one they started with.
    pub fn update_policy(&self, policy: DispatchPolicy) {
        self.policy.store(Arc::new(policy));
    }

    /// Routes `request` according to its mode.
    ///
    /// Cancelling `cancel`, or dropping the returned future, cancels every call attempt
    /// of this dispatch and nothing else.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::PoolEmpty`] if no engine is eligible
    /// - [`DispatchError::AllEnginesFailed`] if every attempt failed
    /// - [`DispatchError::Cancelled`] if `cancel` fired first
    pub async fn dispatch(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        let started = Instant::now();
        let policy = self.policy.load_full();

        let result = self.route(request, &policy, cancel).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.as_str(),
        };
        self.metrics.record_dispatch(request.mode.as_str(), outcome, started.elapsed());
        result
    }

    async fn route(
        &self,
        request: &Request,
        policy: &DispatchPolicy,
        cancel: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        let snapshot = self.pool.snapshot().filtered(&request.params).routable();
        if snapshot.is_empty() {
            debug!(mode = request.mode.as_str(), "no eligible engine");
            return Err(DispatchError::PoolEmpty);
        }

        let scope = cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();
        let timeout = request.timeout.unwrap_or(policy.default_timeout);
        let budget = usize::try_from(policy.retry_budget.max(1)).unwrap_or(usize::MAX);

        match request.mode {
            DispatchMode::Single => {
                self.in_order(request, snapshot.entries().iter(), budget, timeout, &scope).await
            }
            DispatchMode::RoundRobin => {
                self.round_robin(request, &snapshot, budget, timeout, &scope).await
            }
            DispatchMode::Broadcast(options) => {
                self.broadcast(request, snapshot, options, policy, timeout, &scope).await
            }
        }
    }

    /// Tries `candidates` one after another until one succeeds or the budget is spent.
    async fn in_order<'a>(
        &self,
        request: &Request,
        candidates: impl Iterator<Item = &'a SnapshotEntry>,
        budget: usize,
        timeout: Duration,
        scope: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        let mut attempts: Vec<CallAttempt> = Vec::with_capacity(budget);

        for entry in candidates.take(budget) {
            if scope.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let attempt = run_attempt(
                Arc::clone(&entry.handle),
                Arc::clone(&request.payload),
                u32::try_from(attempts.len() + 1).unwrap_or(u32::MAX),
                timeout,
                scope.clone(),
                Arc::clone(&self.metrics),
            )
            .await;

            if attempt.outcome == CallOutcome::Failure(ErrorKind::Cancelled) {
                return Err(DispatchError::Cancelled);
            }

            let succeeded = attempt.outcome.is_success();
            attempts.push(attempt);
            if succeeded {
                break;
            }
        }

        aggregator::sequential(&attempts)
    }

    async fn round_robin(
        &self,
        request: &Request,
        snapshot: &PoolSnapshot,
        budget: usize,
        timeout: Duration,
        scope: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        let healthy = snapshot.healthy_in_registration_order();
        if healthy.is_empty() {
            return self.in_order(request, snapshot.entries().iter(), budget, timeout, scope).await;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let rest = snapshot.entries().iter().filter(|entry| entry.state() != HealthState::Healthy);
        let order = healthy[start..].iter().chain(healthy[..start].iter()).copied().chain(rest);

        self.in_order(request, order, budget, timeout, scope).await
    }

    async fn broadcast(
        &self,
        request: &Request,
        snapshot: PoolSnapshot,
        options: BroadcastOptions,
        policy: &DispatchPolicy,
        timeout: Duration,
        scope: &CancellationToken,
    ) -> Result<Response, DispatchError> {
        let reconcile = options.policy.unwrap_or(policy.broadcast_policy);

        let mut targets = snapshot;
        if policy.exclude_dead {
            targets = targets.serving();
        }
        if let Some(limit) = options.limit {
            targets = targets.top(limit.max(1));
        }
        if targets.is_empty() {
            return Err(DispatchError::PoolEmpty);
        }

        let target_ids = targets.ids();
        let mut tasks = JoinSet::new();
        let mut task_engines = HashMap::with_capacity(target_ids.len());

        for entry in targets.entries() {
            let abort = tasks.spawn(run_attempt(
                Arc::clone(&entry.handle),
                Arc::clone(&request.payload),
                1,
                timeout,
                scope.clone(),
                Arc::clone(&self.metrics),
            ));
            task_engines.insert(abort.id(), entry.id());
        }

        debug!(targets = target_ids.len(), policy = ?reconcile, "broadcast started");

        let mut attempts: Vec<CallAttempt> = Vec::with_capacity(target_ids.len());
        loop {
            let joined = tokio::select! {
                biased;
                () = scope.cancelled() => return Err(DispatchError::Cancelled),
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else { break };

            let attempt = match joined {
                Ok((_, attempt)) => attempt,
                Err(e) => {
                    let Some(engine_id) = task_engines.get(&e.id()).copied() else { continue };
                    warn!(engine_id = %engine_id, error = %e, "broadcast task failed");
                    CallAttempt {
                        engine_id,
                        attempt: 1,
                        started_at: Instant::now(),
                        elapsed: Duration::ZERO,
                        outcome: CallOutcome::Failure(ErrorKind::Protocol),
                    }
                }
            };

            let won = reconcile == BroadcastPolicy::FirstSuccess && attempt.outcome.is_success();
            attempts.push(attempt);
            if won {
                scope.cancel();
                tasks.detach_all();
                break;
            }
        }

        match reconcile {
            BroadcastPolicy::FirstSuccess => aggregator::first_success(&attempts),
            BroadcastPolicy::AllResults => Ok(aggregator::all_results(&target_ids, attempts)),
        }
    }
}
