//! # Storage service
//!
//! The three calls the canary makes against the video storage service,
//! behind the [`StorageService`] trait so detectors can be driven by the HTTP
//! client in production and by `ScriptedStorage` (`testing` feature) in tests.

pub mod fragment;
pub mod http;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::StorageError;

pub use fragment::Fragment;
pub use http::{HttpStorageClient, HttpStorageClientBuilder};

/// Data-plane operation an endpoint is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiName {
    ListFragments,
    GetMedia,
}

impl fmt::Display for ApiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiName::ListFragments => write!(f, "LIST_FRAGMENTS"),
            ApiName::GetMedia => write!(f, "GET_MEDIA"),
        }
    }
}

/// A resolved data-plane base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(pub String);

impl Endpoint {
    /// Join an operation path onto the base URL.
    pub fn url(&self, operation: &str) -> String {
        format!("{}/{}", self.0.trim_end_matches('/'), operation)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open server-timestamp window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Live media bytes, chunk by chunk, as the service produces them.
pub type LiveStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Storage-service collaborator.
///
/// Every method may fail with a transport or service error; callers treat all
/// failures the same way.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Resolve the data endpoint serving `api` for `stream`.
    async fn resolve_endpoint(&self, stream: &str, api: ApiName)
        -> Result<Endpoint, StorageError>;

    /// Every fragment whose server timestamp falls in `range`, ordered.
    async fn list_fragments(
        &self,
        stream: &str,
        endpoint: &Endpoint,
        range: TimestampRange,
    ) -> Result<Vec<Fragment>, StorageError>;

    /// Open the live media stream positioned at "now".
    async fn open_live_stream(
        &self,
        stream: &str,
        endpoint: &Endpoint,
    ) -> Result<LiveStream, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        let ep = Endpoint("https://b-1234.kinesisvideo.us-west-2.amazonaws.com/".to_string());
        assert_eq!(
            ep.url("listFragments"),
            "https://b-1234.kinesisvideo.us-west-2.amazonaws.com/listFragments"
        );
    }

    #[test]
    fn api_name_display_matches_wire_form() {
        assert_eq!(ApiName::ListFragments.to_string(), "LIST_FRAGMENTS");
        assert_eq!(
            serde_json::to_string(&ApiName::GetMedia).unwrap(),
            "\"GET_MEDIA\""
        );
    }
}
