//! Debounced liveness state of an engine.
//!
//! [`HealthRecord::apply`] is a pure transition function: the monitor feeds it one
//! [`HealthSignal`] per probe and publishes the returned record into the handle.

use super::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not probed yet.
    #[default]
    Unknown,
    Healthy,
    /// Reachable but lagging, or failing below the dead threshold.
    Degraded,
    Dead,
}

impl HealthState {
    /// Routing preference, lower is better.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unknown => 2,
            Self::Dead => 3,
        }
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
        }
    }

    /// Numeric encoding for the health gauge.
    #[must_use]
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Unknown | Self::Dead => 0.0,
        }
    }
}

/// Classified result of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    /// Probe succeeded and the engine is within the allowed lag of the best height.
    Fresh { height: u64 },
    /// Probe succeeded but the engine lags too far behind.
    Stale { height: u64 },
    Failure(ErrorKind),
}

impl HealthSignal {
    /// Classifies a successful probe against the best height known across the pool.
    #[must_use]
    pub fn classify(height: u64, best_height: u64, max_height_lag: u64) -> Self {
        if best_height.saturating_sub(height) <= max_height_lag {
            Self::Fresh { height }
        } else {
            Self::Stale { height }
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }
}

/// Debounce thresholds of the health state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Consecutive successful probes a Degraded or Dead engine needs before it moves.
    pub recovery_successes: u32,
    /// Consecutive failures that demote a Healthy engine to Degraded.
    pub degrade_after_failures: u32,
    /// Consecutive failures that mark any engine Dead.
    pub dead_after_failures: u32,
    /// Largest height lag still considered fresh.
    pub max_height_lag: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            recovery_successes: 3,
            degrade_after_failures: 2,
            dead_after_failures: 10,
            max_height_lag: 10,
        }
    }
}

/// A state change produced by [`HealthRecord::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

/// Health of one engine, replaced atomically on every probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub state: HealthState,
    /// Last height reported by a successful probe.
    pub height: Option<u64>,
    pub archival: Option<bool>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    /// Successes counted toward leaving Degraded or Dead. Reset on every transition.
    pub recovery_streak: u32,
    pub last_probe: Option<Instant>,
    pub last_transition: Instant,
    /// When the engine last became Dead; orders the all-dead fallback.
    pub dead_since: Option<Instant>,
    pub last_archival_check: Option<Instant>,
    pub last_error: Option<ErrorKind>,
}

impl HealthRecord {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            state: HealthState::Unknown,
            height: None,
            archival: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            recovery_streak: 0,
            last_probe: None,
            last_transition: now,
            dead_since: None,
            last_archival_check: None,
            last_error: None,
        }
    }

    /// Computes the record that follows `signal`.
    #[must_use]
    pub fn apply(
        &self,
        signal: HealthSignal,
        thresholds: &HealthThresholds,
        now: Instant,
    ) -> (Self, Option<Transition>) {
        let mut next = self.clone();
        next.last_probe = Some(now);

        match signal {
            HealthSignal::Fresh { height } | HealthSignal::Stale { height } => {
                next.height = Some(height);
                next.consecutive_successes = next.consecutive_successes.saturating_add(1);
                next.consecutive_failures = 0;
                next.last_error = None;
            }
            HealthSignal::Failure(kind) => {
                next.consecutive_failures = next.consecutive_failures.saturating_add(1);
                next.consecutive_successes = 0;
                next.recovery_streak = 0;
                next.last_error = Some(kind);
            }
        }

        let target = next.target_state(signal, thresholds);
        if target == self.state {
            return (next, None);
        }

        next.state = target;
        next.recovery_streak = 0;
        next.last_transition = now;
        next.dead_since = (target == HealthState::Dead).then_some(now);

        (next, Some(Transition { from: self.state, to: target }))
    }

    /// Updates the recovery streak as a side effect.
    fn target_state(&mut self, signal: HealthSignal, thresholds: &HealthThresholds) -> HealthState {
        use HealthState::{Dead, Degraded, Healthy, Unknown};

        if let HealthSignal::Failure(_) = signal {
            if self.consecutive_failures >= thresholds.dead_after_failures {
                return Dead;
            }
            return match self.state {
                Healthy if self.consecutive_failures >= thresholds.degrade_after_failures => {
                    Degraded
                }
                state => state,
            };
        }

        let fresh = matches!(signal, HealthSignal::Fresh { .. });
        match self.state {
            Unknown | Healthy => {
                if fresh {
                    Healthy
                } else {
                    Degraded
                }
            }
            Degraded => {
                if fresh {
                    self.recovery_streak += 1;
                } else {
                    self.recovery_streak = 0;
                }
                if self.recovery_streak >= thresholds.recovery_successes {
                    Healthy
                } else {
                    Degraded
                }
            }
            Dead => {
                self.recovery_streak += 1;
                if self.recovery_streak < thresholds.recovery_successes {
                    Dead
                } else if fresh {
                    Healthy
                } else {
                    Degraded
                }
            }
        }
    }

    /// Whether an archival capability probe is due.
    #[must_use]
    pub fn archival_check_due(&self, interval: std::time::Duration, now: Instant) -> bool {
        match self.last_archival_check {
            None => true,
            Some(checked) => now.saturating_duration_since(checked) >= interval,
        }
    }
}
