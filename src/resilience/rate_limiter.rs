use crate::config::RateLimitingOptions;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub permit_limit: u32,
    pub available: u32,
    /// Callers currently waiting for a permit.
    pub queued: usize,
    /// Time until the next segment returns permits (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

/// An acquired permit. Permits are not returned on drop; they expire with
/// the window segment they were taken in.
#[derive(Debug)]
pub struct RateLimitPermit {
    queued: bool,
}

impl RateLimitPermit {
    /// Whether the caller had to wait in the queue for this permit.
    pub fn was_queued(&self) -> bool {
        self.queued
    }
}

/// Where a queued caller's permit was charged.
#[derive(Debug, Clone, Copy)]
struct Grant {
    segment: usize,
    rotation: u64,
}

#[derive(Debug)]
struct Window {
    /// Permits consumed in each segment; `current` is the segment being filled.
    segments: Vec<u32>,
    current: usize,
    /// Segment boundaries crossed since creation.
    rotations: u64,
    segment_started: Instant,
    available: u32,
    waiters: VecDeque<oneshot::Sender<Grant>>,
    closed: bool,
}

/// A caller parked in the queue. If the caller goes away after its permit was
/// sent but before it was received, the permit is handed back.
struct QueuedWaiter<'a> {
    limiter: &'a RateLimiter,
    rx: oneshot::Receiver<Grant>,
    received: bool,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.received {
            return;
        }
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.limiter.give_back(grant);
        }
    }
}

/// Sliding-window rate limiter with a bounded FIFO queue.
///
/// - `permit_limit` permits per `window`
/// - the window is split into `segments_per_window` segments; permits taken in a
///   segment come back when that segment slides out of the window
/// - when empty, up to `queue_limit` callers wait in arrival order
///
/// Waiters drive the clock themselves (no background task): each one sleeps
/// until the next segment boundary and advances the window on wake.
pub struct RateLimiter {
    scope: String,
    cfg: RateLimitingOptions,
    segment_len: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(scope: impl Into<String>, cfg: RateLimitingOptions) -> Self {
        let segments = cfg.segments_per_window.max(1);
        let segment_len = (cfg.window / segments).max(Duration::from_nanos(1));
        let state = Mutex::new(Window {
            segments: vec![0; segments as usize],
            current: 0,
            rotations: 0,
            segment_started: Instant::now(),
            available: cfg.permit_limit,
            waiters: VecDeque::new(),
            closed: false,
        });
        Self {
            scope: scope.into(),
            cfg,
            segment_len,
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rotate expired segments back into the pool, then serve waiters in order.
    fn advance_locked(&self, st: &mut Window, now: Instant) {
        let elapsed = now.saturating_duration_since(st.segment_started);
        let seg_nanos = self.segment_len.as_nanos();
        let ticks = elapsed.as_nanos() / seg_nanos;
        if ticks > 0 {
            let n = st.segments.len();
            for _ in 0..ticks.min(n as u128) {
                st.current = (st.current + 1) % n;
                st.available += std::mem::take(&mut st.segments[st.current]);
            }
            st.rotations = st
                .rotations
                .saturating_add(u64::try_from(ticks).unwrap_or(u64::MAX));
            let rem = (elapsed.as_nanos() % seg_nanos) as u64;
            st.segment_started = now - Duration::from_nanos(rem);
        }

        while st.available > 0 {
            let Some(tx) = st.waiters.pop_front() else {
                break;
            };
            let grant = Grant {
                segment: st.current,
                rotation: st.rotations,
            };
            // A dropped receiver means the waiter gave up; keep the permit.
            if tx.send(grant).is_ok() {
                Self::take_locked(st);
            }
        }
    }

    /// Return a permit granted to a caller that stopped waiting before
    /// receiving it, unless its segment has already expired.
    fn give_back(&self, grant: Grant) {
        let mut st = self.lock();
        let now = Instant::now();
        self.advance_locked(&mut st, now);
        let in_window = st.rotations < grant.rotation.saturating_add(st.segments.len() as u64);
        if in_window && st.segments[grant.segment] > 0 {
            st.segments[grant.segment] -= 1;
            st.available += 1;
            debug!(scope = self.scope.as_str(), "unclaimed permit returned");
            self.advance_locked(&mut st, now);
        }
    }

    fn take_locked(st: &mut Window) {
        st.available -= 1;
        let cur = st.current;
        st.segments[cur] += 1;
    }

    fn rejected(&self) -> Error {
        warn!(
            scope = self.scope.as_str(),
            permit_limit = self.cfg.permit_limit,
            queue_limit = self.cfg.queue_limit,
            "rate limit rejected request"
        );
        Error::RateLimitRejected {
            scope: self.scope.clone(),
            queue_limit: self.cfg.queue_limit,
        }
    }

    /// Acquire one permit, waiting in the queue if the window is exhausted.
    pub async fn acquire(&self) -> Result<RateLimitPermit> {
        if !self.cfg.enabled {
            return Ok(RateLimitPermit { queued: false });
        }

        let rx = {
            let mut st = self.lock();
            if st.closed {
                return Err(Error::Disposed);
            }
            self.advance_locked(&mut st, Instant::now());
            st.waiters.retain(|tx| !tx.is_closed());
            if st.available > 0 && st.waiters.is_empty() {
                Self::take_locked(&mut st);
                return Ok(RateLimitPermit { queued: false });
            }
            if st.waiters.len() >= self.cfg.queue_limit as usize {
                return Err(self.rejected());
            }
            let (tx, rx) = oneshot::channel();
            st.waiters.push_back(tx);
            debug!(
                scope = self.scope.as_str(),
                queued = st.waiters.len(),
                "rate limit exhausted, request queued"
            );
            rx
        };
        let mut waiter = QueuedWaiter {
            limiter: self,
            rx,
            received: false,
        };

        loop {
            let next_boundary = {
                let st = self.lock();
                st.segment_started + self.segment_len
            };
            tokio::select! {
                granted = &mut waiter.rx => {
                    waiter.received = granted.is_ok();
                    return match granted {
                        Ok(_) => Ok(RateLimitPermit { queued: true }),
                        // sender dropped without a permit: the limiter was closed
                        Err(_) => Err(Error::Disposed),
                    };
                }
                _ = tokio::time::sleep_until(next_boundary) => {
                    let mut st = self.lock();
                    self.advance_locked(&mut st, Instant::now());
                }
            }
        }
    }

    /// Try to take a permit without queueing.
    pub fn try_acquire(&self) -> bool {
        if !self.cfg.enabled {
            return true;
        }
        let mut st = self.lock();
        if st.closed {
            return false;
        }
        self.advance_locked(&mut st, Instant::now());
        if st.available > 0 && st.waiters.is_empty() {
            Self::take_locked(&mut st);
            true
        } else {
            false
        }
    }

    /// Run `next` once a permit has been acquired.
    pub async fn run<T, F, Fut>(&self, next: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        next().await
    }

    /// Release every waiter with [`Error::Disposed`] and refuse further permits.
    pub fn close(&self) {
        let mut st = self.lock();
        st.closed = true;
        st.waiters.clear();
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        if !self.cfg.enabled {
            return RateLimiterSnapshot {
                permit_limit: self.cfg.permit_limit,
                available: self.cfg.permit_limit,
                queued: 0,
                estimated_wait_ms: None,
            };
        }
        let mut st = self.lock();
        let now = Instant::now();
        self.advance_locked(&mut st, now);
        let queued = st.waiters.iter().filter(|tx| !tx.is_closed()).count();
        let estimated_wait_ms = if st.available == 0 {
            let next = st.segment_started + self.segment_len;
            Some(next.saturating_duration_since(now).as_millis() as u64)
        } else {
            None
        };
        RateLimiterSnapshot {
            permit_limit: self.cfg.permit_limit,
            available: st.available,
            queued,
            estimated_wait_ms,
        }
    }
}
