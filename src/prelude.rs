//! Convenient re-exports for common governor types.
pub use crate::{
    bucket::{AdmissionDecision, RateState},
    clock::{Clock, MonotonicClock},
    config::GovernorConfig,
    error::{GovernorError, ThrottleError},
    governor::{Governor, Grant},
    io::{ThrottledReader, ThrottledWriter},
    layer::GovernorLayer,
    sleeper::{Sleeper, TokioSleeper},
};
