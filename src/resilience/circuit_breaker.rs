use crate::config::CircuitBreakerOptions;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Buckets the sampling window is divided into.
const HEALTH_BUCKETS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_ratio: f64,
    pub minimum_throughput: u32,
    /// Outcomes recorded in the current sampling window.
    pub throughput: u32,
    pub failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Outcome counts over the trailing sampling duration, kept in coarse buckets.
#[derive(Debug)]
struct HealthWindow {
    buckets: VecDeque<Bucket>,
    bucket_len: Duration,
    sampling: Duration,
}

impl HealthWindow {
    fn new(sampling: Duration) -> Self {
        Self {
            buckets: VecDeque::new(),
            bucket_len: (sampling / HEALTH_BUCKETS).max(Duration::from_nanos(1)),
            sampling,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started) >= self.sampling {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.prune(now);
        let fresh = match self.buckets.back() {
            Some(b) => now.saturating_duration_since(b.started) >= self.bucket_len,
            None => true,
        };
        if fresh {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(b) = self.buckets.back_mut() {
            if failed {
                b.failures = b.failures.saturating_add(1);
            } else {
                b.successes = b.successes.saturating_add(1);
            }
        }
    }

    /// (throughput, failures) within the window.
    fn totals(&mut self, now: Instant) -> (u32, u32) {
        self.prune(now);
        self.buckets.iter().fold((0u32, 0u32), |(total, failures), b| {
            (
                total.saturating_add(b.successes).saturating_add(b.failures),
                failures.saturating_add(b.failures),
            )
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    health: HealthWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Frees the half-open trial slot if the trial future is dropped before it resolves.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut st = self.breaker.lock();
            if let Phase::HalfOpen { trial_in_flight } = &mut st.phase {
                *trial_in_flight = false;
            }
        }
    }
}

/// Ratio-based circuit breaker.
///
/// - Closed: calls pass through; outcomes are sampled over `sampling_duration`
/// - opens when throughput >= `minimum_throughput` and failures / throughput >= `failure_ratio`
/// - Open: calls fail fast with [`Error::CircuitOpen`] for `break_duration`
/// - HalfOpen: a single trial call decides between Closed and Open
///
/// Only dependency failures count (see [`Error::is_dependency_failure`]); a 4xx
/// answer proves the remote side is up and is recorded as a success.
pub struct CircuitBreaker {
    scope: String,
    cfg: CircuitBreakerOptions,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(scope: impl Into<String>, cfg: CircuitBreakerOptions) -> Self {
        let health = HealthWindow::new(cfg.sampling_duration);
        Self {
            scope: scope.into(),
            cfg,
            state: Mutex::new(State {
                phase: Phase::Closed,
                health,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self) -> Result<Admission> {
        let mut st = self.lock();
        let now = Instant::now();
        let phase = st.phase;
        match phase {
            Phase::Closed => Ok(Admission::Normal),
            Phase::Open { until } if now < until => Err(Error::CircuitOpen {
                scope: self.scope.clone(),
                retry_after: Some(until - now),
            }),
            Phase::Open { .. } | Phase::HalfOpen { trial_in_flight: false } => {
                st.phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                info!(
                    scope = self.scope.as_str(),
                    state = CircuitState::HalfOpen.name(),
                    "circuit breaker admitting trial call"
                );
                Ok(Admission::Trial)
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => Err(Error::CircuitOpen {
                scope: self.scope.clone(),
                retry_after: None,
            }),
        }
    }

    fn open_locked(&self, st: &mut State, now: Instant) {
        st.phase = Phase::Open {
            until: now + self.cfg.break_duration,
        };
        st.health.reset();
    }

    fn on_outcome(&self, admission: Admission, failed: bool) {
        let mut st = self.lock();
        let now = Instant::now();
        let phase = st.phase;
        match (admission, phase) {
            (Admission::Trial, Phase::HalfOpen { .. }) => {
                if failed {
                    self.open_locked(&mut st, now);
                    warn!(
                        scope = self.scope.as_str(),
                        break_ms = self.cfg.break_duration.as_millis() as u64,
                        "circuit breaker trial failed, reopening"
                    );
                } else {
                    st.phase = Phase::Closed;
                    st.health.reset();
                    info!(scope = self.scope.as_str(), "circuit breaker closed");
                }
            }
            (Admission::Normal, Phase::Closed) => {
                st.health.record(now, failed);
                if !failed {
                    return;
                }
                let (throughput, failures) = st.health.totals(now);
                if throughput >= self.cfg.minimum_throughput
                    && failures as f64 / throughput as f64 >= self.cfg.failure_ratio
                {
                    self.open_locked(&mut st, now);
                    warn!(
                        scope = self.scope.as_str(),
                        throughput,
                        failures,
                        break_ms = self.cfg.break_duration.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            // another call already moved the breaker on; this outcome is stale
            _ => {}
        }
    }

    /// Run `operation` under the breaker.
    pub async fn guard<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.cfg.enabled {
            return operation().await;
        }

        let admission = self.admit()?;
        let mut slot = TrialSlot {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let result = operation().await;
        if matches!(result, Err(Error::Disposed)) {
            // no verdict on the dependency; the slot guard frees a trial
            return result;
        }
        slot.armed = false;

        let failed = matches!(&result, Err(e) if e.is_dependency_failure());
        self.on_outcome(admission, failed);
        result
    }

    pub fn state(&self) -> CircuitState {
        if !self.cfg.enabled {
            return CircuitState::Closed;
        }
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() < until => CircuitState::Open,
            Phase::Open { .. } | Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        let now = Instant::now();
        let mut st = self.lock();
        let (throughput, failures) = st.health.totals(now);
        let open_remaining_ms = match st.phase {
            Phase::Open { until } if until > now => Some((until - now).as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            state,
            failure_ratio: self.cfg.failure_ratio,
            minimum_throughput: self.cfg.minimum_throughput,
            throughput,
            failures,
            open_remaining_ms,
        }
    }
}
