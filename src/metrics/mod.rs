//! # Metric emission
//!
//! Every observation goes out as a pair of samples: one tagged with the
//! stream name, one tagged with the run label. The pair shares name, unit and
//! value, so the same signal can be queried per stream or across all streams
//! in a run.
//!
//! Publishing is fire-and-forget. [`MetricEmitter::emit`] never returns an
//! error; failures are logged and dropped.

pub mod sinks;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::CanaryContext;
use crate::error::MetricsError;

pub use sinks::{HttpMetricsSink, HttpMetricsSinkBuilder, LogMetricsSink};

pub const FRAGMENT_RECEIVED: &str = "FragmentReceived";
pub const TIME_TO_FIRST_FRAGMENT: &str = "TimeToFirstFragment";

/// Per-stream dimension name.
pub const STREAM_DIMENSION: &str = "StorageWebRTCSDKCanaryStreamName";
/// Aggregate dimension name.
pub const LABEL_DIMENSION: &str = "StorageWebRTCSDKCanaryLabel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricUnit {
    /// Unit-less count or flag.
    None,
    Milliseconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One dimensioned numeric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub dimension: Dimension,
}

/// Metrics-backend collaborator.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Submit one batch under `namespace`. No acknowledgement beyond the result.
    async fn publish(
        &self,
        namespace: &str,
        samples: Vec<MetricSample>,
    ) -> Result<(), MetricsError>;
}

/// Turns a (name, value, unit) observation into the dimension pair and ships it.
#[derive(Clone)]
pub struct MetricEmitter {
    ctx: Arc<CanaryContext>,
    namespace: String,
    sink: Arc<dyn MetricsSink>,
    publish_timeout: Duration,
}

impl MetricEmitter {
    pub fn new(
        ctx: Arc<CanaryContext>,
        namespace: impl Into<String>,
        sink: Arc<dyn MetricsSink>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            namespace: namespace.into(),
            sink,
            publish_timeout,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The per-stream and aggregate samples for one observation, in that order.
    pub fn samples(&self, name: &str, value: f64, unit: MetricUnit) -> [MetricSample; 2] {
        let sample = |dimension: Dimension| MetricSample {
            name: name.to_string(),
            value,
            unit,
            dimension,
        };
        [
            sample(Dimension::new(STREAM_DIMENSION, &self.ctx.stream_name)),
            sample(Dimension::new(LABEL_DIMENSION, &self.ctx.canary_label)),
        ]
    }

    /// Publish both samples in one batch. Failures are logged, never returned.
    pub async fn emit(&self, name: &str, value: f64, unit: MetricUnit) {
        let batch = Vec::from(self.samples(name, value, unit));
        let publish = self.sink.publish(&self.namespace, batch);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {
                debug!(metric = name, value, namespace = %self.namespace, "published metric");
            }
            Ok(Err(e)) => {
                warn!(metric = name, value, error = %e, "metric publish failed, dropping sample");
            }
            Err(_) => {
                let e = MetricsError::Timeout(self.publish_timeout);
                warn!(metric = name, value, error = %e, "metric publish failed, dropping sample");
            }
        }
    }
}
