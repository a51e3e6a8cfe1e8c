//! # Detectors
//!
//! Each detector turns one round of storage-service calls into at most one
//! [`Signal`], ships it through the [`crate::metrics::MetricEmitter`], and
//! reports what happened as a [`PollOutcome`]. A failed call is never fatal:
//! it is logged, nothing is emitted, and detector state is left untouched.
//!
//! Network calls run on a helper task awaited under a single bound (see
//! [`bounded_call`]) so a stuck connection cannot wedge the scheduler.

pub mod continuity;
pub mod first_fragment;

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::error::StorageError;
use crate::metrics::{MetricUnit, FRAGMENT_RECEIVED, TIME_TO_FIRST_FRAGMENT};

pub use continuity::{FragmentContinuityDetector, FragmentSnapshot};
pub use first_fragment::TimeToFirstFragmentDetector;

/// A measurement produced by one poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Whether the cumulative fragment count grew since the previous poll.
    FragmentReceived(bool),
    /// Time from canary start until the first live byte was read.
    TimeToFirstFragment(Duration),
}

impl Signal {
    /// Metric name, value and unit for the emitter.
    pub fn measurement(&self) -> (&'static str, f64, MetricUnit) {
        match self {
            Signal::FragmentReceived(grew) => {
                (FRAGMENT_RECEIVED, if *grew { 1.0 } else { 0.0 }, MetricUnit::None)
            }
            Signal::TimeToFirstFragment(elapsed) => (
                TIME_TO_FIRST_FRAGMENT,
                elapsed.as_millis() as f64,
                MetricUnit::Milliseconds,
            ),
        }
    }
}

/// Result of a single detector invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// A signal was measured and handed to the emitter.
    Emitted(Signal),
    /// Calls succeeded but there was nothing to report yet.
    NoData,
    /// A collaborator call failed; the poll was a no-op.
    Failed,
    /// The detector already fired earlier; no call was made.
    Done,
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` on a helper task and wait at most `limit` for it.
///
/// The helper is aborted on timeout and also when the returned future is
/// dropped, so a cancelled poll leaves nothing running behind it. A panic
/// inside the helper comes back as [`StorageError::Worker`] instead of
/// unwinding into the caller.
pub async fn bounded_call<T, F>(limit: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    let _guard = AbortOnDrop(handle.abort_handle());
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(StorageError::Worker(join_err.to_string())),
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}
