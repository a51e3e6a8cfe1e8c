//! Time to first fragment: how long after a cold start until live media flows?
//!
//! Each attempt resolves the GetMedia endpoint, opens a fresh live stream
//! positioned at "now", and waits up to `read_timeout` for a single byte. The
//! read bound is what actually limits resolution; the scheduler's short
//! interval only decides how soon the next attempt starts. The first byte
//! fires the detector exactly once; after that every poll is a no-op that
//! touches nothing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{bounded_call, PollOutcome, Signal};
use crate::context::CanaryContext;
use crate::error::StorageError;
use crate::metrics::MetricEmitter;
use crate::storage::{ApiName, LiveStream, StorageService};

pub struct TimeToFirstFragmentDetector {
    ctx: Arc<CanaryContext>,
    storage: Arc<dyn StorageService>,
    emitter: MetricEmitter,
    call_timeout: Duration,
    read_timeout: Duration,
    fired: bool,
}

impl TimeToFirstFragmentDetector {
    pub fn new(
        ctx: Arc<CanaryContext>,
        storage: Arc<dyn StorageService>,
        emitter: MetricEmitter,
        call_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            storage,
            emitter,
            call_timeout,
            read_timeout,
            fired: false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// One attempt. Returns [`PollOutcome::Done`] without any call once fired.
    pub async fn poll(&mut self) -> PollOutcome {
        if self.fired {
            return PollOutcome::Done;
        }

        let mut stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    stream = %self.ctx.stream_name,
                    error = %e,
                    "cannot open live stream, retrying next tick"
                );
                return PollOutcome::Failed;
            }
        };

        match tokio::time::timeout(self.read_timeout, first_byte(&mut stream)).await {
            Ok(Ok(Some(_))) => {}
            Ok(Ok(None)) => {
                debug!(stream = %self.ctx.stream_name, "live stream ended without data");
                return PollOutcome::NoData;
            }
            Ok(Err(e)) => {
                warn!(
                    stream = %self.ctx.stream_name,
                    error = %e,
                    "live stream read failed, retrying next tick"
                );
                return PollOutcome::Failed;
            }
            Err(_) => {
                debug!(
                    stream = %self.ctx.stream_name,
                    read_timeout_ms = self.read_timeout.as_millis() as u64,
                    "no live data yet"
                );
                return PollOutcome::NoData;
            }
        }

        let elapsed = self.ctx.elapsed();
        self.fired = true;
        info!(
            stream = %self.ctx.stream_name,
            elapsed_ms = elapsed.as_millis() as u64,
            "first live data received"
        );

        let signal = Signal::TimeToFirstFragment(elapsed);
        let (name, value, unit) = signal.measurement();
        self.emitter.emit(name, value, unit).await;
        PollOutcome::Emitted(signal)
    }

    async fn open(&self) -> Result<LiveStream, StorageError> {
        let storage = Arc::clone(&self.storage);
        let stream = self.ctx.stream_name.clone();
        bounded_call(self.call_timeout, async move {
            let endpoint = storage.resolve_endpoint(&stream, ApiName::GetMedia).await?;
            storage.open_live_stream(&stream, &endpoint).await
        })
        .await
    }
}

/// First byte of the stream, skipping empty chunks. `None` if it ends first.
async fn first_byte(stream: &mut LiveStream) -> Result<Option<u8>, StorageError> {
    while let Some(chunk) = stream.next().await {
        if let Some(&b) = chunk?.first() {
            return Ok(Some(b));
        }
    }
    Ok(None)
}
