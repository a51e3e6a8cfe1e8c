//! Error types for the canary.
//!
//! There are two tiers. [`ConfigError`] is fatal and aborts the process before
//! any polling starts. [`StorageError`] and [`MetricsError`] are per-poll: the
//! detectors and the emitter log them and carry on with the next tick.

use std::time::Duration;

use thiserror::Error;

/// Startup configuration failures. Every variant is fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided by any layer.
    #[error("missing required setting {key}")]
    Missing { key: &'static str },

    /// A setting was present but could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Neither the metric-type selector nor the run label named a mode.
    #[error(
        "no canary mode selected: set CANARY_METRIC_TYPE to \
         FragmentContinuity or TimeToFirstFragment"
    )]
    MissingMode,

    /// The selector named something that is not a known mode.
    #[error("unknown canary mode {0:?}: expected FragmentContinuity or TimeToFirstFragment")]
    UnknownMode(String),

    #[error("cannot read config file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures from the storage-service collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The request never got a response (DNS, TCP, TLS, reset).
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The service replied with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The response body did not have the expected shape.
    #[error("cannot decode {what}: {detail}")]
    Decode { what: &'static str, detail: String },

    /// The call did not complete within its bound.
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// The helper task running the call panicked or was cancelled.
    #[error("storage worker failed: {0}")]
    Worker(String),
}

/// Failures from the metrics-backend collaborator.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("metric publish timed out after {0:?}")]
    Timeout(Duration),

    /// The sink refused the batch (used by in-memory sinks).
    #[error("metric batch rejected: {0}")]
    Rejected(String),
}

/// Top-level error for process setup in `main`.
#[derive(Debug, Error)]
pub enum CanaryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build HTTP client: {0}")]
    Client(String),
}
