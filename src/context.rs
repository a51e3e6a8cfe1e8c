//! Immutable per-run context shared by the controller, the detectors and the
//! metric emitter.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::{CanaryConfig, MAX_SPAN};

/// Identity and clock anchors for one canary run.
///
/// Built once at startup and handed out behind an `Arc`. Nothing in it ever
/// changes after construction.
#[derive(Debug, Clone)]
pub struct CanaryContext {
    pub stream_name: String,
    pub canary_label: String,
    pub region: String,
    /// Run budget, capped at [`MAX_SPAN`].
    pub run_duration: Duration,
    /// Wall-clock start; lower bound of every fragment query window.
    pub start_time: DateTime<Utc>,
    /// Monotonic start; elapsed-time measurements and timers hang off this.
    pub started_at: Instant,
}

impl CanaryContext {
    /// Capture the start of the run now.
    pub fn start(config: &CanaryConfig) -> Self {
        Self {
            stream_name: config.stream_name.clone(),
            canary_label: config.canary_label.clone(),
            region: config.region.clone(),
            run_duration: config.run_duration.min(MAX_SPAN),
            start_time: Utc::now(),
            started_at: Instant::now(),
        }
    }

    /// Monotonic time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Monotonic instant at which the run budget is spent.
    pub fn deadline(&self) -> Instant {
        self.started_at + self.run_duration
    }
}
