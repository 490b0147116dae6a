#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # io-fixed-throughput
//!
//! A fixed-throughput governor for I/O: caps the rate at which bytes (or
//! operations) flow through a channel, smoothing bursts with a token bucket.
//!
//! ## Features
//!
//! - **Token bucket rate state** with a pure, clock-driven admission gate
//! - **FIFO waiting**: later, smaller requests never overtake earlier ones
//! - **Blocking and async admission** over the same state, with timeouts and
//!   cancel-safe futures
//! - **Partial admission** for callers that can move fewer units than asked
//! - **`Read`/`Write` adapters** and a **tower layer** for pacing streams and services
//! - **Injectable clocks and sleepers** for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use io_fixed_throughput::{Governor, GovernorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), io_fixed_throughput::GovernorError> {
//!     // 1 MB/s with room for one 64 KiB block.
//!     let governor = Governor::new(GovernorConfig::new(1_000_000.0, 64 * 1024)?);
//!
//!     let grant = governor.admit_async(64 * 1024).await?;
//!     assert_eq!(grant.granted(), 64 * 1024);
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod governor;
pub mod io;
pub mod layer;
pub mod prelude;
pub mod sleeper;
pub mod units;

// Re-exports
pub use bucket::{AdmissionDecision, RateState};
pub use clock::{Clock, ManualClock, MonotonicClock, TokioClock};
pub use config::{DynamicConfig, GovernorConfig, GovernorConfigBuilder};
pub use error::{GovernorError, ThrottleError};
pub use governor::{Governor, GovernorBuilder, GovernorStats, Grant};
pub use io::{ThrottledReader, ThrottledWriter};
pub use layer::{GovernorLayer, GovernorService};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use units::{parse_bandwidth, parse_duration, parse_size, ParseSizeError};
