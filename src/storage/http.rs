//! JSON-over-HTTP storage client.
//!
//! Speaks the video-stream REST shape: `getDataEndpoint` on the control plane,
//! `listFragments` and `getMedia` on the resolved data plane. Requests are
//! not signed; point `control_endpoint` at a signing proxy or a compatible
//! service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fragment::{epoch_seconds, server_order, Fragment};
use super::{ApiName, Endpoint, LiveStream, StorageService, TimestampRange};
use crate::error::{CanaryError, StorageError};

/// Page size requested from ListFragments.
pub const LIST_PAGE_SIZE: u32 = 1_000;

// --- Wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetDataEndpointRequest<'a> {
    stream_name: &'a str,
    #[serde(rename = "APIName")]
    api_name: ApiName,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetDataEndpointResponse {
    data_endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListFragmentsRequest<'a> {
    stream_name: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    fragment_selector: FragmentSelector,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FragmentSelector {
    fragment_selector_type: &'static str,
    timestamp_range: WireTimestampRange,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireTimestampRange {
    #[serde(with = "epoch_seconds")]
    start_timestamp: DateTime<Utc>,
    #[serde(with = "epoch_seconds")]
    end_timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListFragmentsResponse {
    #[serde(default)]
    fragments: Vec<Fragment>,
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetMediaRequest<'a> {
    stream_name: &'a str,
    start_selector: StartSelector,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartSelector {
    start_selector_type: &'static str,
}

// --- Client ---

/// Settings for [`HttpStorageClient`].
#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    /// Control-plane base URL.
    pub control_endpoint: String,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout for the JSON calls. The media stream is exempt.
    pub request_timeout: Duration,
}

impl HttpStorageConfig {
    /// Defaults: connect 3 s, request 10 s.
    pub fn new(control_endpoint: impl Into<String>) -> Self {
        Self {
            control_endpoint: control_endpoint.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed [`StorageService`].
pub struct HttpStorageClient {
    config: HttpStorageConfig,
    client: reqwest::Client,
}

impl HttpStorageClient {
    pub fn builder(control_endpoint: impl Into<String>) -> HttpStorageClientBuilder {
        HttpStorageClientBuilder::new(control_endpoint)
    }

    async fn post_json<B, R>(
        &self,
        url: String,
        body: &B,
        what: &'static str,
    ) -> Result<R, StorageError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| StorageError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(StorageError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| StorageError::Decode {
            what,
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode {
            what,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl StorageService for HttpStorageClient {
    async fn resolve_endpoint(
        &self,
        stream: &str,
        api: ApiName,
    ) -> Result<Endpoint, StorageError> {
        let url = Endpoint(self.config.control_endpoint.clone()).url("getDataEndpoint");
        let body = GetDataEndpointRequest {
            stream_name: stream,
            api_name: api,
        };
        let resp: GetDataEndpointResponse = self.post_json(url, &body, "GetDataEndpoint").await?;
        debug!(stream, api = %api, endpoint = %resp.data_endpoint, "resolved data endpoint");
        Ok(Endpoint(resp.data_endpoint))
    }

    async fn list_fragments(
        &self,
        stream: &str,
        endpoint: &Endpoint,
        range: TimestampRange,
    ) -> Result<Vec<Fragment>, StorageError> {
        let url = endpoint.url("listFragments");
        let mut fragments = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let body = ListFragmentsRequest {
                stream_name: stream,
                max_results: LIST_PAGE_SIZE,
                next_token: next_token.as_deref(),
                fragment_selector: FragmentSelector {
                    fragment_selector_type: "SERVER_TIMESTAMP",
                    timestamp_range: WireTimestampRange {
                        start_timestamp: range.start,
                        end_timestamp: range.end,
                    },
                },
            };
            let page: ListFragmentsResponse =
                self.post_json(url.clone(), &body, "ListFragments").await?;
            pages += 1;
            fragments.extend(page.fragments);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        fragments.sort_by(server_order);
        debug!(stream, pages, fragments = fragments.len(), "listed fragments");
        Ok(fragments)
    }

    async fn open_live_stream(
        &self,
        stream: &str,
        endpoint: &Endpoint,
    ) -> Result<LiveStream, StorageError> {
        let url = endpoint.url("getMedia");
        let body = GetMediaRequest {
            stream_name: stream,
            start_selector: StartSelector {
                start_selector_type: "NOW",
            },
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(StorageError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        Ok(resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| StorageError::Connect {
                    url: url.clone(),
                    detail: e.to_string(),
                })
            })
            .boxed())
    }
}

/// Builder for [`HttpStorageClient`].
pub struct HttpStorageClientBuilder {
    config: HttpStorageConfig,
}

impl HttpStorageClientBuilder {
    pub fn new(control_endpoint: impl Into<String>) -> Self {
        Self {
            config: HttpStorageConfig::new(control_endpoint),
        }
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the JSON request timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// # Errors
    /// Fails only if the TLS backend cannot be initialised.
    pub fn build(self) -> Result<HttpStorageClient, CanaryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| CanaryError::Client(e.to_string()))?;
        Ok(HttpStorageClient {
            config: self.config,
            client,
        })
    }
}
