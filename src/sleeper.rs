//! Abstraction for sleeping/waiting
//!
//! Enables fast, deterministic tests without real time delays. Only the async
//! admission path sleeps through a [`Sleeper`]; blocking admission parks the
//! thread on a condition variable instead.

use crate::clock::ManualClock;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstraction for sleeping/waiting
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Test sleeper that records every requested duration and then advances a
/// [`ManualClock`] by it, so a waiting request observes exactly the time it
/// asked for.
#[derive(Debug, Clone)]
pub struct TrackingSleeper {
    clock: ManualClock,
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(duration);
        self.clock.advance(duration);
        // Yield so other tasks see the new time before we re-check.
        tokio::task::yield_now().boxed()
    }
}
