//! Convergence primitives.
//!
//! Control-plane operations often cannot observe their effect immediately:
//! a kill intent is submitted, and only later do the tasks actually reach a
//! terminal state. This library provides the pieces for waiting on such
//! conditions:
//!
//! - **Probe**: a read of current state classified as a [`ConvergenceStatus`].
//! - **Backoff**: the bounded delay sequence between probes ([`BackoffPolicy`]).
//! - **Poll loop**: [`poll_until_converged`], which is caller-attached and
//!   cancellable through a [`CancellationToken`].
//!
//! [`SpecHash`] gives a stable digest of a serializable spec so that two
//! configurations can be compared without field-by-field code.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default first delay between convergence probes.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling on the delay between convergence probes.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default ceiling on the number of probes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The backoff budget ran out before convergence.
    #[error("timeout after {elapsed:?} ({attempts} probes) waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// The wait was cancelled by the caller.
    #[error("cancelled while waiting for {resource}")]
    Cancelled { resource: String },

    /// The probe reported a state that cannot converge.
    #[error("{0} diverged")]
    Diverged(String),

    /// The probe itself failed.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (current matches desired).
    Converged,

    /// Resource is converging (current is moving toward desired).
    Converging,

    /// Resource has diverged (requires intervention).
    Diverged,

    /// Status is unknown (insufficient data).
    Unknown,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the resource is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}

/// Exponential backoff bounds for a convergence wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first unsuccessful probe.
    pub initial: Duration,

    /// Upper bound for any single delay.
    pub max: Duration,

    /// Give up after waiting once at `max` instead of retrying at `max` forever.
    pub stop_at_max: bool,

    /// Hard ceiling on the number of probes, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_BACKOFF,
            max: DEFAULT_MAX_BACKOFF,
            stop_at_max: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_stop_at_max(mut self, stop_at_max: bool) -> Self {
        self.stop_at_max = stop_at_max;
        self
    }

    /// The delays to sleep between probes, in order.
    pub fn delays(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            next: Some(self.initial.min(self.max)),
            waits: 0,
        }
    }
}

/// Iterator over the delays of a [`BackoffPolicy`].
///
/// Each delay doubles the previous one, capped at `max`. The sequence ends
/// when the attempt ceiling is reached, or right after the first `max`
/// delay when `stop_at_max` is set.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Option<Duration>,
    waits: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.waits.saturating_add(1) >= self.policy.max_attempts {
            return None;
        }

        let current = self.next?;
        self.waits += 1;
        self.next = if current >= self.policy.max {
            (!self.policy.stop_at_max).then_some(self.policy.max)
        } else {
            Some(current.saturating_mul(2).min(self.policy.max))
        };

        Some(current)
    }
}

/// Result of a successful convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Number of probes run, including the converged one.
    pub attempts: u32,

    /// Wall time spent waiting.
    pub elapsed: Duration,
}

/// Probes until `probe` reports [`ConvergenceStatus::Converged`].
///
/// The first probe runs immediately. Between probes the loop sleeps for the
/// next delay of `policy`; when the delays run out the wait fails with
/// [`ReconcileError::Timeout`]. Cancelling `cancel` while probing or
/// sleeping fails the wait with [`ReconcileError::Cancelled`].
pub async fn poll_until_converged<F, Fut>(
    resource: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ConvergenceStatus, ReconcileError>>,
{
    let started = Instant::now();
    let mut delays = policy.delays();
    let mut attempts: u32 = 0;

    let cancelled = || ReconcileError::Cancelled {
        resource: resource.to_string(),
    };

    loop {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            status = probe() => status?,
        };
        attempts += 1;

        match status {
            ConvergenceStatus::Converged => {
                return Ok(PollOutcome {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            ConvergenceStatus::Diverged => {
                return Err(ReconcileError::Diverged(resource.to_string()));
            }
            ConvergenceStatus::Converging | ConvergenceStatus::Unknown => {}
        }

        let Some(delay) = delays.next() else {
            return Err(ReconcileError::Timeout {
                resource: resource.to_string(),
                elapsed: started.elapsed(),
                attempts,
            });
        };

        debug!(
            resource,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Not converged yet, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// A spec hash for deterministic comparison.
///
/// Used to detect when a task configuration has changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    /// Compute a spec hash for any serializable value.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::from_json(&serde_json::to_value(value)?))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
