//! Concrete [`MetricsSink`]s: an HTTP ingest client and a log-only sink.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::{Dimension, MetricSample, MetricUnit, MetricsSink};
use crate::error::{CanaryError, MetricsError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutMetricDataRequest<'a> {
    namespace: &'a str,
    metric_data: Vec<MetricDatum<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDatum<'a> {
    metric_name: &'a str,
    value: f64,
    unit: MetricUnit,
    dimensions: &'a [Dimension],
}

impl<'a> From<&'a MetricSample> for MetricDatum<'a> {
    fn from(s: &'a MetricSample) -> Self {
        Self {
            metric_name: &s.name,
            value: s.value,
            unit: s.unit,
            dimensions: std::slice::from_ref(&s.dimension),
        }
    }
}

/// Posts each batch as a PutMetricData-shaped JSON document.
pub struct HttpMetricsSink {
    url: String,
    client: reqwest::Client,
}

impl HttpMetricsSink {
    pub fn builder(url: impl Into<String>) -> HttpMetricsSinkBuilder {
        HttpMetricsSinkBuilder::new(url)
    }
}

#[async_trait]
impl MetricsSink for HttpMetricsSink {
    async fn publish(
        &self,
        namespace: &str,
        samples: Vec<MetricSample>,
    ) -> Result<(), MetricsError> {
        let body = PutMetricDataRequest {
            namespace,
            metric_data: samples.iter().map(MetricDatum::from).collect(),
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MetricsError::Connect {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(MetricsError::Http {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

/// Builder for [`HttpMetricsSink`].
pub struct HttpMetricsSinkBuilder {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpMetricsSinkBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpMetricsSink, CanaryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| CanaryError::Client(e.to_string()))?;
        Ok(HttpMetricsSink {
            url: self.url,
            client,
        })
    }
}

/// Writes samples to the log. Used for dry runs and when no ingest URL is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn publish(
        &self,
        namespace: &str,
        samples: Vec<MetricSample>,
    ) -> Result<(), MetricsError> {
        for s in &samples {
            info!(
                namespace,
                metric = %s.name,
                value = s.value,
                unit = ?s.unit,
                dimension = %s.dimension.name,
                dimension_value = %s.dimension.value,
                "metric"
            );
        }
        Ok(())
    }
}
