//! Fragment continuity: does the stream keep producing fragments?
//!
//! Every poll lists all fragments with a server timestamp in
//! `[canary start, now)`. The lower bound never moves, so each poll sees the
//! whole cumulative history of the run. Growth is judged by count alone: the
//! poll reports 1.0 when the list is strictly longer than the previous
//! snapshot and 0.0 otherwise. A list that shrinks (e.g. a lagging replica)
//! therefore reads as "nothing new" rather than as an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::{bounded_call, PollOutcome, Signal};
use crate::context::CanaryContext;
use crate::error::StorageError;
use crate::metrics::MetricEmitter;
use crate::storage::{ApiName, Fragment, StorageService, TimestampRange};

/// Everything observed as of the last successful poll.
///
/// Replaced wholesale by each successful poll; never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSnapshot {
    fragments: Vec<Fragment>,
}

impl FragmentSnapshot {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}

pub struct FragmentContinuityDetector {
    ctx: Arc<CanaryContext>,
    storage: Arc<dyn StorageService>,
    emitter: MetricEmitter,
    call_timeout: Duration,
}

impl FragmentContinuityDetector {
    pub fn new(
        ctx: Arc<CanaryContext>,
        storage: Arc<dyn StorageService>,
        emitter: MetricEmitter,
        call_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            storage,
            emitter,
            call_timeout,
        }
    }

    /// Run one poll against `previous` and return the snapshot to carry forward.
    ///
    /// On failure the previous snapshot comes back unchanged and nothing is
    /// emitted.
    pub async fn poll(&self, previous: FragmentSnapshot) -> (FragmentSnapshot, PollOutcome) {
        let range = TimestampRange {
            start: self.ctx.start_time,
            end: Utc::now(),
        };

        let fragments = match self.fetch(range).await {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(
                    stream = %self.ctx.stream_name,
                    error = %e,
                    "fragment continuity poll failed, skipping this interval"
                );
                return (previous, PollOutcome::Failed);
            }
        };

        let grew = fragments.len() > previous.len();
        info!(
            stream = %self.ctx.stream_name,
            fragments = fragments.len(),
            previous = previous.len(),
            "new fragment received: {grew}"
        );

        let signal = Signal::FragmentReceived(grew);
        let (name, value, unit) = signal.measurement();
        self.emitter.emit(name, value, unit).await;

        (FragmentSnapshot::new(fragments), PollOutcome::Emitted(signal))
    }

    async fn fetch(&self, range: TimestampRange) -> Result<Vec<Fragment>, StorageError> {
        let storage = Arc::clone(&self.storage);
        let stream = self.ctx.stream_name.clone();
        bounded_call(self.call_timeout, async move {
            let endpoint = storage
                .resolve_endpoint(&stream, ApiName::ListFragments)
                .await?;
            storage.list_fragments(&stream, &endpoint, range).await
        })
        .await
    }
}
