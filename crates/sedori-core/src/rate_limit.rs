use sedori_types::{SedoriError, SedoriResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Thread-safe per-key request budget.
///
/// Counts are invocation-scoped: there is no time window, the limit is a hard
/// ceiling over the lifetime of the owning client object.
#[derive(Debug, Default)]
pub struct RequestBudget {
    counts: Mutex<HashMap<String, u32>>,
}

impl RequestBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests still available for `key` under `limit`.
    pub fn remaining(&self, key: &str, limit: u32) -> u32 {
        let counts = self.counts.lock().unwrap();
        let consumed = counts.get(key).copied().unwrap_or(0);
        limit.saturating_sub(consumed)
    }

    /// Atomically consume one unit for `key`, failing once `limit` is reached.
    pub fn consume(&self, key: &str, limit: u32) -> SedoriResult<u32> {
        let mut counts = self.counts.lock().unwrap();
        let consumed = counts.entry(key.to_string()).or_insert(0);
        if *consumed >= limit {
            return Err(SedoriError::BudgetExceeded(key.to_string()));
        }
        *consumed += 1;
        Ok(limit - *consumed)
    }
}

/// Counting semaphores keyed by endpoint scope, created lazily per key.
#[derive(Debug)]
pub struct KeySemaphore {
    max_inflight: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl KeySemaphore {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            max_inflight,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a permit for `key`. The permit releases on drop, so the slot is
    /// returned on every exit path.
    pub async fn acquire(&self, key: &str) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut semaphores = self.semaphores.lock().unwrap();
            semaphores
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight)))
                .clone()
        };
        semaphore
            .acquire_owned()
            .await
            .expect("key semaphore is never closed")
    }
}

/// Counter-based circuit breaker with cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Permit a call, or fail with `CircuitOpen` while the breaker is open and
    /// the cooldown has not elapsed. An elapsed cooldown resets the breaker.
    pub fn allow(&self) -> SedoriResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(opened_at) = state.opened_at else {
            return Ok(());
        };
        if opened_at.elapsed() >= self.cooldown {
            state.failures = 0;
            state.opened_at = None;
            return Ok(());
        }
        Err(SedoriError::CircuitOpen)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;
        if state.failures >= self.failure_threshold {
            if state.opened_at.is_none() {
                warn!(
                    failures = state.failures,
                    "circuit breaker opened after consecutive failures"
                );
            }
            state.opened_at = Some(Instant::now());
        }
    }
}
