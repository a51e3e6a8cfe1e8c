//! Synthetic canary for a media-storage ingestion pipeline.
//!
//! A run watches one stream for a fixed budget in one of two modes:
//!
//! * **Fragment continuity**: after a grace period, poll the fragment listing
//!   every few seconds and report `FragmentReceived` as 1.0 when the
//!   cumulative count grew since the last poll, 0.0 otherwise.
//! * **Time to first fragment**: from the moment the run starts, repeatedly
//!   open the live media feed and report `TimeToFirstFragment` (milliseconds)
//!   once, when the first byte arrives.
//!
//! Every measurement is published twice, once under the stream's own
//! dimension and once under the run label, so individual streams and whole
//! fleets can be alarmed on separately.
//!
//! The storage service and the metrics backend are traits
//! ([`storage::StorageService`], [`metrics::MetricsSink`]); reqwest-backed
//! implementations ship in this crate. In-memory ones live in the `testing`
//! module, built only for tests or with the `testing` feature.

pub mod cli;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{CanaryConfig, CanaryMode, ConfigLayer, ScheduleConfig};
pub use context::CanaryContext;
pub use error::{CanaryError, ConfigError, MetricsError, StorageError};
pub use metrics::{MetricEmitter, MetricSample, MetricsSink};
pub use scheduler::{Canary, RunReport};
pub use storage::StorageService;
