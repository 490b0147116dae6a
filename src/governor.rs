//! Fixed-throughput governor: the shared, FIFO-ordered front end of a [`RateState`].
//!
//! Semantics:
//! - All refills and spends happen under one mutex, so concurrent admissions
//!   never double-spend or observe a torn token count.
//! - Waiters queue in arrival order and only the head of the queue may spend
//!   tokens; a later, smaller request never overtakes an earlier, larger one.
//! - An arrival that finds the queue empty and enough tokens is admitted
//!   without queueing.
//! - Spent tokens are never refunded. A waiter that times out or is cancelled
//!   leaves the queue without spending anything.
//!
//! Scheduling:
//! - [`Governor::admit_blocking`] parks the calling thread on a condition
//!   variable. Those waits run on real time, so pair it with a clock that
//!   tracks real time ([`MonotonicClock`], the default).
//! - [`Governor::admit_async`] suspends the task, sleeping through the
//!   configured [`Sleeper`]. Dropping the future cancels the request.
//!
//! Example
//! ```rust
//! use io_fixed_throughput::{Governor, GovernorConfig};
//!
//! # fn main() -> Result<(), io_fixed_throughput::GovernorError> {
//! let governor = Governor::new(GovernorConfig::new(1_000_000.0, 4096)?);
//! let grant = governor.admit_blocking(4096)?;
//! assert_eq!(grant.granted(), 4096);
//! # Ok(())
//! # }
//! ```

use crate::bucket::{AdmissionDecision, RateState};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{DynamicConfig, GovernorConfig};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::GovernorError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// A completed admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    requested: u64,
    granted: u64,
    waited: Duration,
}

impl Grant {
    pub fn requested(&self) -> u64 {
        self.requested
    }

    /// Units the caller may now transfer. Less than `requested` only under
    /// partial admission.
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Time spent queued, per the governor's clock.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn is_partial(&self) -> bool {
        self.granted < self.requested
    }
}

/// Point-in-time copy of the governor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    /// Requests admitted in whole or in part.
    pub admitted_requests: u64,
    /// Units spent across all admissions.
    pub admitted_units: u64,
    /// Admissions that granted less than requested.
    pub partial_grants: u64,
    /// Requests that had to queue.
    pub deferred: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    /// Requests larger than capacity.
    pub rejections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    admitted_requests: AtomicU64,
    admitted_units: AtomicU64,
    partial_grants: AtomicU64,
    deferred: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    rejections: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GovernorStats {
        GovernorStats {
            admitted_requests: self.admitted_requests.load(Ordering::Relaxed),
            admitted_units: self.admitted_units.load(Ordering::Relaxed),
            partial_grants: self.partial_grants.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    size: u64,
}

#[derive(Debug)]
struct Queue {
    bucket: RateState,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl Queue {
    fn is_head(&self, ticket: u64) -> bool {
        self.waiters.front().is_some_and(|w| w.ticket == ticket)
    }

    fn remove(&mut self, ticket: u64) -> bool {
        match self.waiters.iter().position(|w| w.ticket == ticket) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    fn queued_demand(&self) -> u64 {
        self.waiters.iter().fold(0u64, |acc, w| acc.saturating_add(w.size))
    }
}

enum Entry {
    Granted(u64),
    Queued(u64),
}

enum Step {
    Granted(u64),
    /// `Some(d)`: head of queue, retry after `d`. `None`: park until woken.
    Wait(Option<Duration>),
}

struct Shared {
    config: DynamicConfig<GovernorConfig>,
    queue: Mutex<Queue>,
    parked: Condvar,
    notify: Notify,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // The queue holds plain arithmetic state; a panic elsewhere cannot
        // leave it half-updated.
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wake_all(&self) {
        self.parked.notify_all();
        self.notify.notify_waiters();
    }

    fn reject(&self, size: u64, capacity: u64) -> GovernorError {
        Counters::bump(&self.counters.rejections, 1);
        GovernorError::RequestExceedsCapacity { requested: size, capacity }
    }

    fn grant(&self, requested: u64, granted: u64, waited: Duration) -> Grant {
        Counters::bump(&self.counters.admitted_requests, 1);
        Counters::bump(&self.counters.admitted_units, granted);
        if granted < requested {
            Counters::bump(&self.counters.partial_grants, 1);
        }
        Grant { requested, granted, waited }
    }

    fn enter(&self, queue: &mut Queue, size: u64, now: Duration) -> Result<Entry, GovernorError> {
        let capacity = queue.bucket.capacity();
        if size > capacity {
            return Err(self.reject(size, capacity));
        }
        if size == 0 {
            return Ok(Entry::Granted(0));
        }
        if queue.waiters.is_empty() {
            match queue.bucket.try_admit(size, now)? {
                AdmissionDecision::Wait(_) => {}
                decision => return Ok(Entry::Granted(decision.granted(size))),
            }
        }
        let ticket = queue.next_ticket;
        queue.next_ticket = queue.next_ticket.wrapping_add(1);
        queue.waiters.push_back(Waiter { ticket, size });
        Counters::bump(&self.counters.deferred, 1);
        tracing::debug!(ticket, size, queued = queue.waiters.len(), "admission deferred");
        Ok(Entry::Queued(ticket))
    }

    fn step(
        &self,
        queue: &mut Queue,
        ticket: u64,
        size: u64,
        now: Duration,
    ) -> Result<Step, GovernorError> {
        if !queue.is_head(ticket) {
            return Ok(Step::Wait(None));
        }
        let decision = queue.bucket.try_admit(size, now);
        if let Ok(AdmissionDecision::Wait(wait)) = decision {
            return Ok(Step::Wait(Some(wait)));
        }
        queue.waiters.pop_front();
        self.wake_all();
        match decision {
            Ok(decision) => {
                let granted = decision.granted(size);
                tracing::trace!(ticket, granted, "queued admission granted");
                Ok(Step::Granted(granted))
            }
            // Capacity shrank below this request while it was queued.
            Err(_) => Err(self.reject(size, queue.bucket.capacity())),
        }
    }

    fn expire(&self, queue: &mut Queue, ticket: u64, waited: Duration, timeout: Duration) -> GovernorError {
        if queue.remove(ticket) {
            self.wake_all();
        }
        Counters::bump(&self.counters.timeouts, 1);
        tracing::debug!(ticket, ?waited, ?timeout, "admission wait timed out");
        GovernorError::WaitTimedOut { waited, timeout }
    }
}

/// Removes a queued ticket if the waiting caller goes away early.
struct QueueSlot<'a> {
    shared: &'a Shared,
    ticket: Option<u64>,
}

impl<'a> QueueSlot<'a> {
    fn vacant(shared: &'a Shared) -> Self {
        Self { shared, ticket: None }
    }

    fn disarm(&mut self) {
        self.ticket = None;
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let mut queue = self.shared.lock();
        if queue.remove(ticket) {
            Counters::bump(&self.shared.counters.cancellations, 1);
            self.shared.wake_all();
            tracing::debug!(ticket, "queued admission cancelled");
        }
    }
}

/// Shared handle to a fixed-throughput governor. Clones share one bucket and
/// one wait queue.
#[derive(Clone)]
pub struct Governor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("config", &self.shared.config.get())
            .field("queue_len", &self.queue_len())
            .field("clock", &self.shared.clock)
            .field("sleeper", &self.shared.sleeper)
            .finish()
    }
}

impl Governor {
    /// Governor with a [`MonotonicClock`] and a [`TokioSleeper`].
    pub fn new(config: GovernorConfig) -> Self {
        Self::builder(config).build()
    }

    /// Shorthand for `Governor::new(GovernorConfig::new(rate, burst)?)`.
    pub fn with_rate(target_rate: f64, burst_capacity: u64) -> Result<Self, GovernorError> {
        Ok(Self::new(GovernorConfig::new(target_rate, burst_capacity)?))
    }

    pub fn builder(config: GovernorConfig) -> GovernorBuilder {
        GovernorBuilder {
            config,
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<GovernorConfig> {
        self.shared.config.get()
    }

    /// Swap in a new rate/capacity/partial setting.
    ///
    /// Tokens accrued so far are kept (clamped to the new capacity) and every
    /// waiter re-evaluates against the new settings.
    pub fn reconfigure(&self, config: GovernorConfig) -> Result<(), GovernorError> {
        config.validate()?;
        let now = self.shared.clock.now();
        {
            let mut queue = self.shared.lock();
            queue.bucket.retune(&config, now);
            tracing::info!(
                target_rate = config.target_rate(),
                burst_capacity = config.burst_capacity(),
                partial_admission = config.partial_admission(),
                "governor reconfigured"
            );
            self.shared.config.set(config);
        }
        self.shared.wake_all();
        Ok(())
    }

    /// Tokens available right now (after a refill).
    pub fn available(&self) -> f64 {
        let now = self.shared.clock.now();
        let mut queue = self.shared.lock();
        queue.bucket.refill(now);
        queue.bucket.tokens()
    }

    /// Requests currently waiting.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    pub fn stats(&self) -> GovernorStats {
        self.shared.counters.snapshot()
    }

    /// Non-blocking admission check.
    ///
    /// Never overtakes queued waiters: while any are queued this returns
    /// `Wait` with an estimate covering their demand plus `size`, without
    /// spending tokens.
    ///
    /// # Errors
    ///
    /// [`GovernorError::RequestExceedsCapacity`] when `size` exceeds the burst capacity.
    pub fn try_admit(&self, size: u64) -> Result<AdmissionDecision, GovernorError> {
        let shared = &*self.shared;
        let now = shared.clock.now();
        let mut queue = shared.lock();
        let capacity = queue.bucket.capacity();
        if size > capacity {
            return Err(shared.reject(size, capacity));
        }
        if size == 0 {
            return Ok(AdmissionDecision::Admit);
        }
        if queue.waiters.is_empty() {
            let decision = queue.bucket.try_admit(size, now)?;
            if decision.is_admitted() {
                shared.grant(size, decision.granted(size), Duration::ZERO);
            }
            return Ok(decision);
        }
        queue.bucket.refill(now);
        let demand = queue.queued_demand().saturating_add(size);
        Ok(AdmissionDecision::Wait(queue.bucket.wait_for(demand)))
    }

    /// Block the calling thread until `size` units are admitted.
    pub fn admit_blocking(&self, size: u64) -> Result<Grant, GovernorError> {
        self.blocking(size, None)
    }

    /// Like [`Governor::admit_blocking`], giving up after `timeout` with
    /// [`GovernorError::WaitTimedOut`] and no tokens spent.
    pub fn admit_blocking_timeout(&self, size: u64, timeout: Duration) -> Result<Grant, GovernorError> {
        self.blocking(size, Some(timeout))
    }

    /// Suspend the current task until `size` units are admitted.
    ///
    /// Cancel-safe: dropping the future before it resolves releases the queue
    /// slot without spending tokens.
    pub async fn admit_async(&self, size: u64) -> Result<Grant, GovernorError> {
        self.suspend(size, None).await
    }

    /// Like [`Governor::admit_async`], giving up after `timeout` (measured on
    /// the governor's clock, slept through its sleeper).
    pub async fn admit_async_timeout(&self, size: u64, timeout: Duration) -> Result<Grant, GovernorError> {
        self.suspend(size, Some(timeout)).await
    }

    fn blocking(&self, size: u64, timeout: Option<Duration>) -> Result<Grant, GovernorError> {
        let shared = &*self.shared;
        let started = shared.clock.now();
        // Declared before the guard so it drops after the lock is released.
        let mut slot = QueueSlot::vacant(shared);
        let mut queue = shared.lock();
        let ticket = match shared.enter(&mut queue, size, started)? {
            Entry::Granted(granted) => return Ok(shared.grant(size, granted, Duration::ZERO)),
            Entry::Queued(ticket) => ticket,
        };
        slot.ticket = Some(ticket);

        loop {
            let now = shared.clock.now();
            let waited = now.saturating_sub(started);
            let wait = match shared.step(&mut queue, ticket, size, now) {
                Ok(Step::Granted(granted)) => {
                    slot.disarm();
                    return Ok(shared.grant(size, granted, waited));
                }
                Ok(Step::Wait(wait)) => wait,
                Err(e) => {
                    slot.disarm();
                    return Err(e);
                }
            };
            let wait = match timeout {
                Some(timeout) if waited >= timeout => {
                    slot.disarm();
                    return Err(shared.expire(&mut queue, ticket, waited, timeout));
                }
                Some(timeout) => {
                    let left = timeout - waited;
                    Some(wait.map_or(left, |w| w.min(left)))
                }
                None => wait,
            };
            queue = match wait {
                Some(d) => shared
                    .parked
                    .wait_timeout(queue, d)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|p| p.into_inner().0),
                None => shared.parked.wait(queue).unwrap_or_else(|p| p.into_inner()),
            };
        }
    }

    async fn suspend(&self, size: u64, timeout: Option<Duration>) -> Result<Grant, GovernorError> {
        let shared = &*self.shared;
        let started = shared.clock.now();
        let entry = {
            let mut queue = shared.lock();
            shared.enter(&mut queue, size, started)?
        };
        let ticket = match entry {
            Entry::Granted(granted) => return Ok(shared.grant(size, granted, Duration::ZERO)),
            Entry::Queued(ticket) => ticket,
        };
        let mut slot = QueueSlot { shared, ticket: Some(ticket) };

        loop {
            // Register before checking so a wake between check and await is not lost.
            let notified = shared.notify.notified();
            let now = shared.clock.now();
            let waited = now.saturating_sub(started);
            let step = {
                let mut queue = shared.lock();
                shared.step(&mut queue, ticket, size, now)
            };
            let wait = match step {
                Ok(Step::Granted(granted)) => {
                    slot.disarm();
                    return Ok(shared.grant(size, granted, waited));
                }
                Ok(Step::Wait(wait)) => wait,
                Err(e) => {
                    slot.disarm();
                    return Err(e);
                }
            };
            let wait = match timeout {
                Some(timeout) if waited >= timeout => {
                    slot.disarm();
                    let err = {
                        let mut queue = shared.lock();
                        shared.expire(&mut queue, ticket, waited, timeout)
                    };
                    return Err(err);
                }
                Some(timeout) => {
                    let left = timeout - waited;
                    Some(wait.map_or(left, |w| w.min(left)))
                }
                None => wait,
            };
            match wait {
                Some(d) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = shared.sleeper.sleep(d) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Builder for [`Governor`], for swapping the clock and sleeper.
#[derive(Debug)]
pub struct GovernorBuilder {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl GovernorBuilder {
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The bucket starts full as of the clock's current reading.
    pub fn build(self) -> Governor {
        let bucket = RateState::new(&self.config, self.clock.now());
        Governor {
            shared: Arc::new(Shared {
                config: DynamicConfig::new(self.config),
                queue: Mutex::new(Queue { bucket, waiters: VecDeque::new(), next_ticket: 0 }),
                parked: Condvar::new(),
                notify: Notify::new(),
                clock: self.clock,
                sleeper: self.sleeper,
                counters: Counters::default(),
            }),
        }
    }
}
