//! Governor configuration and the live-updatable handle that carries it.
//!
//! [`GovernorConfig`] is validated on construction; the governor stores it in a
//! [`DynamicConfig`] so readers get a cheap snapshot while
//! [`Governor::reconfigure`](crate::Governor::reconfigure) swaps it in place.

use crate::GovernorError;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Fixed target rate, burst allowance and partial-admission switch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GovernorConfig {
    target_rate: f64,
    burst_capacity: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    partial_admission: bool,
}

impl GovernorConfig {
    /// Create a config with validation. Partial admission starts disabled.
    ///
    /// `target_rate` is in units per second, `burst_capacity` in units.
    pub fn new(target_rate: f64, burst_capacity: u64) -> Result<Self, GovernorError> {
        let cfg = Self { target_rate, burst_capacity, partial_admission: false };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start a builder with a 1 unit/s rate and a capacity of 1.
    pub fn builder() -> GovernorConfigBuilder {
        GovernorConfigBuilder::default()
    }

    /// Allow requests to be admitted in part when the bucket is short.
    pub fn with_partial_admission(mut self, allowed: bool) -> Self {
        self.partial_admission = allowed;
        self
    }

    /// Reject configurations the bucket cannot honour.
    ///
    /// Needed after deserializing, which bypasses [`GovernorConfig::new`].
    pub fn validate(&self) -> Result<(), GovernorError> {
        if !self.target_rate.is_finite() || self.target_rate <= 0.0 {
            return Err(GovernorError::invalid(format!(
                "target_rate must be a finite value > 0 (got {})",
                self.target_rate
            )));
        }
        if self.burst_capacity == 0 {
            return Err(GovernorError::invalid("burst_capacity must be > 0 (got 0)"));
        }
        Ok(())
    }

    /// Units added per second.
    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    /// Maximum tokens the bucket holds.
    pub fn burst_capacity(&self) -> u64 {
        self.burst_capacity
    }

    pub fn partial_admission(&self) -> bool {
        self.partial_admission
    }
}

/// Builder for [`GovernorConfig`].
#[derive(Debug, Clone)]
pub struct GovernorConfigBuilder {
    target_rate: f64,
    burst_capacity: u64,
    partial_admission: bool,
}

impl Default for GovernorConfigBuilder {
    fn default() -> Self {
        Self { target_rate: 1.0, burst_capacity: 1, partial_admission: false }
    }
}

impl GovernorConfigBuilder {
    pub fn target_rate(mut self, rate: f64) -> Self {
        self.target_rate = rate;
        self
    }

    pub fn burst_capacity(mut self, capacity: u64) -> Self {
        self.burst_capacity = capacity;
        self
    }

    pub fn partial_admission(mut self, allowed: bool) -> Self {
        self.partial_admission = allowed;
        self
    }

    pub fn build(self) -> Result<GovernorConfig, GovernorError> {
        Ok(GovernorConfig::new(self.target_rate, self.burst_capacity)?
            .with_partial_admission(self.partial_admission))
    }
}

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}
