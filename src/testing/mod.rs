//! In-memory collaborators for tests and local experiments.
//!
//! [`ScriptedStorage`] replays queued responses and records every call it
//! receives; [`RecordingSink`] keeps every published batch. Both are cheap to
//! share behind an `Arc` and can be scripted after the canary holds them.

pub mod http;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::{MetricsError, StorageError};
use crate::metrics::{MetricSample, MetricsSink};
use crate::storage::{ApiName, Endpoint, Fragment, LiveStream, StorageService, TimestampRange};

/// Endpoint handed out when no endpoint response is scripted.
pub const MEMORY_ENDPOINT: &str = "memory://data";

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `n` distinct fragments one second apart.
pub fn fragments(n: usize) -> Vec<Fragment> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
    (0..n)
        .map(|i| Fragment::new(format!("{}", 1000 + i), base + ChronoDuration::seconds(i as i64)))
        .collect()
}

/// What a scripted `open_live_stream` call produces.
#[derive(Debug)]
pub enum ScriptedStream {
    /// A stream that yields these chunks and then ends.
    Chunks(Vec<Bytes>),
    /// A stream that yields these chunks, then one error, then ends.
    Broken { chunks: Vec<Bytes>, error: StorageError },
    /// A stream that never yields.
    Silent,
    /// The open call itself fails.
    Fail(StorageError),
}

impl ScriptedStream {
    /// Ends immediately without data.
    pub fn empty() -> Self {
        ScriptedStream::Chunks(Vec::new())
    }

    pub fn bytes(data: &'static [u8]) -> Self {
        ScriptedStream::Chunks(vec![Bytes::from_static(data)])
    }

    /// Opens fine, then the first read fails with `error`.
    pub fn broken(error: StorageError) -> Self {
        ScriptedStream::Broken {
            chunks: Vec::new(),
            error,
        }
    }
}

/// One observed collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    ResolveEndpoint(ApiName),
    ListFragments(TimestampRange),
    OpenLiveStream,
}

/// A [`StorageService`] that replays queued responses.
///
/// When a queue runs dry: endpoints resolve to [`MEMORY_ENDPOINT`], fragment
/// lists repeat the last successful list (empty at first), and live streams
/// end without data.
#[derive(Debug, Default)]
pub struct ScriptedStorage {
    endpoints: Mutex<VecDeque<Result<Endpoint, StorageError>>>,
    lists: Mutex<VecDeque<Result<Vec<Fragment>, StorageError>>>,
    last_list: Mutex<Vec<Fragment>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    calls: Mutex<Vec<(Instant, StorageCall)>>,
    delay: Option<Duration>,
}

impl ScriptedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_endpoint(&self, response: Result<Endpoint, StorageError>) -> &Self {
        locked(&self.endpoints).push_back(response);
        self
    }

    pub fn push_list(&self, response: Result<Vec<Fragment>, StorageError>) -> &Self {
        locked(&self.lists).push_back(response);
        self
    }

    pub fn push_stream(&self, stream: ScriptedStream) -> &Self {
        locked(&self.streams).push_back(stream);
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<StorageCall> {
        locked(&self.calls).iter().map(|(_, c)| c.clone()).collect()
    }

    /// Every call with the (tokio) instant it arrived.
    pub fn call_log(&self) -> Vec<(Instant, StorageCall)> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    fn record(&self, call: StorageCall) {
        locked(&self.calls).push((Instant::now(), call));
    }

    async fn pause(&self) {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl StorageService for ScriptedStorage {
    async fn resolve_endpoint(
        &self,
        _stream: &str,
        api: ApiName,
    ) -> Result<Endpoint, StorageError> {
        self.record(StorageCall::ResolveEndpoint(api));
        self.pause().await;
        let next = locked(&self.endpoints).pop_front();
        next.unwrap_or_else(|| Ok(Endpoint(MEMORY_ENDPOINT.to_string())))
    }

    async fn list_fragments(
        &self,
        _stream: &str,
        _endpoint: &Endpoint,
        range: TimestampRange,
    ) -> Result<Vec<Fragment>, StorageError> {
        self.record(StorageCall::ListFragments(range));
        self.pause().await;
        let next = locked(&self.lists).pop_front();
        match next {
            Some(Ok(list)) => {
                *locked(&self.last_list) = list.clone();
                Ok(list)
            }
            Some(Err(e)) => Err(e),
            None => Ok(locked(&self.last_list).clone()),
        }
    }

    async fn open_live_stream(
        &self,
        _stream: &str,
        _endpoint: &Endpoint,
    ) -> Result<LiveStream, StorageError> {
        self.record(StorageCall::OpenLiveStream);
        self.pause().await;
        let next = locked(&self.streams).pop_front();
        match next.unwrap_or_else(ScriptedStream::empty) {
            ScriptedStream::Chunks(chunks) => {
                Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            ScriptedStream::Broken { chunks, error } => {
                let tail = stream::once(async move { Err(error) });
                Ok(stream::iter(chunks.into_iter().map(Ok)).chain(tail).boxed())
            }
            ScriptedStream::Silent => Ok(stream::pending().boxed()),
            ScriptedStream::Fail(e) => Err(e),
        }
    }
}

/// One batch as received by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedBatch {
    pub namespace: String,
    pub samples: Vec<MetricSample>,
}

/// A [`MetricsSink`] that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<PublishedBatch>>,
    failing: AtomicBool,
    rejected: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every batch.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<PublishedBatch> {
        locked(&self.batches).clone()
    }

    /// All accepted samples, flattened in publish order.
    pub fn samples(&self) -> Vec<MetricSample> {
        locked(&self.batches)
            .iter()
            .flat_map(|b| b.samples.iter().cloned())
            .collect()
    }

    /// Values of accepted samples named `name`, one per batch.
    pub fn values(&self, name: &str) -> Vec<f64> {
        locked(&self.batches)
            .iter()
            .filter_map(|b| b.samples.iter().find(|s| s.name == name).map(|s| s.value))
            .collect()
    }

    /// Number of batches refused while failing.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn publish(
        &self,
        namespace: &str,
        samples: Vec<MetricSample>,
    ) -> Result<(), MetricsError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(MetricsError::Rejected("sink configured to fail".to_string()));
        }
        locked(&self.batches).push(PublishedBatch {
            namespace: namespace.to_string(),
            samples,
        });
        Ok(())
    }
}
