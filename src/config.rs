//! # Configuration
//!
//! Run parameters are read once at startup from three layers, later layers
//! winning: an optional TOML file, the process environment, and command-line
//! flags. Each layer is a [`ConfigLayer`] of optional values; [`ConfigLayer::resolve`]
//! fills defaults, validates, and produces the immutable [`CanaryConfig`].
//!
//! Any failure here is fatal: the process logs it and exits non-zero before a
//! single poll is scheduled.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

pub const ENV_STREAM_NAME: &str = "CANARY_STREAM_NAME";
pub const ENV_LABEL: &str = "CANARY_LABEL";
pub const ENV_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_DURATION: &str = "CANARY_DURATION_IN_SECONDS";
pub const ENV_METRIC_TYPE: &str = "CANARY_METRIC_TYPE";
pub const ENV_CP_URL: &str = "CANARY_CP_URL";
pub const ENV_METRICS_ENDPOINT: &str = "CANARY_METRICS_ENDPOINT";
pub const ENV_NAMESPACE: &str = "CANARY_METRIC_NAMESPACE";
pub const ENV_INITIAL_DELAY: &str = "CANARY_INITIAL_DELAY_MS";
pub const ENV_CONTINUITY_INTERVAL: &str = "CANARY_CONTINUITY_INTERVAL_MS";
pub const ENV_FIRST_FRAGMENT_INTERVAL: &str = "CANARY_FIRST_FRAGMENT_INTERVAL_MS";
pub const ENV_READ_TIMEOUT: &str = "CANARY_READ_TIMEOUT_MS";
pub const ENV_CALL_TIMEOUT: &str = "CANARY_CALL_TIMEOUT_MS";
pub const ENV_USE_IOT: &str = "USE_IOT_PROVIDER";
pub const ENV_IOT_THING_NAME: &str = "IOT_THING_NAME";

pub const DEFAULT_STREAM_NAME: &str = "DefaultStreamName";
pub const DEFAULT_LABEL: &str = "DEFAULT_CANARY_LABEL";
pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_NAMESPACE: &str = "KinesisVideoSDKCanary";

/// Upper bound for the run budget and every timer setting. Anything longer is
/// a typo, and it keeps every deadline representable as an `Instant`.
pub const MAX_SPAN: Duration = Duration::from_secs(366 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// CanaryMode
// ---------------------------------------------------------------------------

/// Which health signal this run measures. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanaryMode {
    /// Poll the cumulative fragment list and report whether it grew.
    FragmentContinuity,
    /// Busy-poll a live stream until the first byte shows up.
    TimeToFirstFragment,
}

impl CanaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanaryMode::FragmentContinuity => "FragmentContinuity",
            CanaryMode::TimeToFirstFragment => "TimeToFirstFragment",
        }
    }
}

impl fmt::Display for CanaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanaryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("FragmentContinuity") {
            Ok(CanaryMode::FragmentContinuity)
        } else if trimmed.eq_ignore_ascii_case("TimeToFirstFragment") {
            Ok(CanaryMode::TimeToFirstFragment)
        } else {
            Err(ConfigError::UnknownMode(s.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

/// Timer settings for both polling modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Grace period before the first continuity poll.
    pub initial_delay: Duration,
    /// Period between continuity polls.
    pub continuity_interval: Duration,
    /// Period between time-to-first-fragment attempts.
    pub first_fragment_interval: Duration,
    /// How long one attempt waits for the first byte before giving up.
    /// This is the real resolution floor of the latency measurement.
    pub read_timeout: Duration,
    /// Bound on each individual storage or metrics call.
    pub call_timeout: Duration,
}

impl ScheduleConfig {
    /// Every setting clamped into `[1ms, MAX_SPAN]` (the grace period may
    /// stay zero), so timers built from it cannot panic.
    pub fn clamped(&self) -> Self {
        let floor = Duration::from_millis(1);
        Self {
            initial_delay: self.initial_delay.min(MAX_SPAN),
            continuity_interval: self.continuity_interval.clamp(floor, MAX_SPAN),
            first_fragment_interval: self.first_fragment_interval.clamp(floor, MAX_SPAN),
            read_timeout: self.read_timeout.clamp(floor, MAX_SPAN),
            call_timeout: self.call_timeout.clamp(floor, MAX_SPAN),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            continuity_interval: Duration::from_secs(16),
            first_fragment_interval: Duration::from_millis(250),
            read_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigLayer
// ---------------------------------------------------------------------------

/// One source of settings. Absent values defer to lower layers or defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub stream_name: Option<String>,
    pub canary_label: Option<String>,
    pub region: Option<String>,
    pub duration_in_seconds: Option<u64>,
    pub metric_type: Option<String>,
    pub storage_endpoint: Option<String>,
    pub metrics_endpoint: Option<String>,
    pub namespace: Option<String>,
    pub initial_delay_ms: Option<u64>,
    pub continuity_interval_ms: Option<u64>,
    pub first_fragment_interval_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
}

impl ConfigLayer {
    /// Read a TOML file whose keys match the field names of this struct.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: display,
            source,
        })
    }

    /// Build a layer from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a layer from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            get(key).map(|raw| parse_u64(key, &raw)).transpose()
        };

        let mut stream_name = get(ENV_STREAM_NAME);
        if get(ENV_USE_IOT).as_deref() == Some("TRUE") {
            let thing = get(ENV_IOT_THING_NAME).ok_or(ConfigError::Missing {
                key: ENV_IOT_THING_NAME,
            })?;
            stream_name = Some(thing);
        }

        Ok(Self {
            stream_name,
            canary_label: get(ENV_LABEL),
            region: get(ENV_REGION),
            duration_in_seconds: number(ENV_DURATION)?,
            metric_type: get(ENV_METRIC_TYPE),
            storage_endpoint: get(ENV_CP_URL),
            metrics_endpoint: get(ENV_METRICS_ENDPOINT),
            namespace: get(ENV_NAMESPACE),
            initial_delay_ms: number(ENV_INITIAL_DELAY)?,
            continuity_interval_ms: number(ENV_CONTINUITY_INTERVAL)?,
            first_fragment_interval_ms: number(ENV_FIRST_FRAGMENT_INTERVAL)?,
            read_timeout_ms: number(ENV_READ_TIMEOUT)?,
            call_timeout_ms: number(ENV_CALL_TIMEOUT)?,
        })
    }

    /// Overlay `over` on top of `self`; values present in `over` win.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            stream_name: over.stream_name.or(self.stream_name),
            canary_label: over.canary_label.or(self.canary_label),
            region: over.region.or(self.region),
            duration_in_seconds: over.duration_in_seconds.or(self.duration_in_seconds),
            metric_type: over.metric_type.or(self.metric_type),
            storage_endpoint: over.storage_endpoint.or(self.storage_endpoint),
            metrics_endpoint: over.metrics_endpoint.or(self.metrics_endpoint),
            namespace: over.namespace.or(self.namespace),
            initial_delay_ms: over.initial_delay_ms.or(self.initial_delay_ms),
            continuity_interval_ms: over.continuity_interval_ms.or(self.continuity_interval_ms),
            first_fragment_interval_ms: over
                .first_fragment_interval_ms
                .or(self.first_fragment_interval_ms),
            read_timeout_ms: over.read_timeout_ms.or(self.read_timeout_ms),
            call_timeout_ms: over.call_timeout_ms.or(self.call_timeout_ms),
        }
    }

    /// Apply defaults and validate into a [`CanaryConfig`].
    ///
    /// The mode comes from `metric_type` when set; otherwise the run label is
    /// tried as a mode name.
    pub fn resolve(self) -> Result<CanaryConfig, ConfigError> {
        let stream_name = self
            .stream_name
            .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string());
        if stream_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: ENV_STREAM_NAME,
                value: stream_name,
                reason: "stream name must not be empty".to_string(),
            });
        }
        let canary_label = self.canary_label.unwrap_or_else(|| DEFAULT_LABEL.to_string());

        let mode = match self.metric_type.as_deref() {
            Some(selector) => selector.parse::<CanaryMode>()?,
            None => canary_label
                .parse::<CanaryMode>()
                .map_err(|_| ConfigError::MissingMode)?,
        };

        let run_duration = self
            .duration_in_seconds
            .map(Duration::from_secs)
            .ok_or(ConfigError::Missing { key: ENV_DURATION })?;
        within_span(ENV_DURATION, run_duration)?;

        let region = self.region.unwrap_or_else(|| DEFAULT_REGION.to_string());

        let defaults = ScheduleConfig::default();
        let initial_delay = self
            .initial_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_delay);
        within_span(ENV_INITIAL_DELAY, initial_delay)?;
        let schedule = ScheduleConfig {
            // A zero grace period is fine; the periods and bounds are not.
            initial_delay,
            continuity_interval: nonzero_ms(
                ENV_CONTINUITY_INTERVAL,
                self.continuity_interval_ms,
                defaults.continuity_interval,
            )?,
            first_fragment_interval: nonzero_ms(
                ENV_FIRST_FRAGMENT_INTERVAL,
                self.first_fragment_interval_ms,
                defaults.first_fragment_interval,
            )?,
            read_timeout: nonzero_ms(
                ENV_READ_TIMEOUT,
                self.read_timeout_ms,
                defaults.read_timeout,
            )?,
            call_timeout: nonzero_ms(
                ENV_CALL_TIMEOUT,
                self.call_timeout_ms,
                defaults.call_timeout,
            )?,
        };

        // Requests go out unsigned, so there is no usable public default:
        // the URL must name a signing proxy or a compatible service.
        let storage_endpoint = self
            .storage_endpoint
            .ok_or(ConfigError::Missing { key: ENV_CP_URL })?;
        let is_http = storage_endpoint.starts_with("http://")
            || storage_endpoint.starts_with("https://");
        if !is_http {
            return Err(ConfigError::Invalid {
                key: ENV_CP_URL,
                value: storage_endpoint,
                reason: "expected an http:// or https:// URL".to_string(),
            });
        }

        Ok(CanaryConfig {
            stream_name,
            canary_label,
            region,
            run_duration,
            mode,
            storage_endpoint,
            metrics_endpoint: self.metrics_endpoint,
            namespace: self.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            schedule,
        })
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn nonzero_ms(
    key: &'static str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Some(ms) => {
            let d = Duration::from_millis(ms);
            within_span(key, d)?;
            Ok(d)
        }
    }
}

fn within_span(key: &'static str, d: Duration) -> Result<(), ConfigError> {
    if d > MAX_SPAN {
        return Err(ConfigError::Invalid {
            key,
            value: format!("{}ms", d.as_millis()),
            reason: format!("must not exceed {} seconds", MAX_SPAN.as_secs()),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CanaryConfig
// ---------------------------------------------------------------------------

/// Fully resolved run parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryConfig {
    pub stream_name: String,
    pub canary_label: String,
    pub region: String,
    pub run_duration: Duration,
    pub mode: CanaryMode,
    /// Control-plane base URL used to resolve data endpoints. Always set by
    /// [`ConfigLayer::resolve`]; empty in configs built with [`CanaryConfig::new`].
    pub storage_endpoint: String,
    /// Metrics ingest URL. `None` sends samples to the log instead.
    pub metrics_endpoint: Option<String>,
    pub namespace: String,
    pub schedule: ScheduleConfig,
}

impl CanaryConfig {
    /// A config with every optional setting at its default and no
    /// control-plane URL. Suited to in-memory collaborators.
    pub fn new(
        stream_name: impl Into<String>,
        canary_label: impl Into<String>,
        mode: CanaryMode,
        run_duration: Duration,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            canary_label: canary_label.into(),
            storage_endpoint: String::new(),
            region: DEFAULT_REGION.to_string(),
            run_duration,
            mode,
            metrics_endpoint: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            schedule: ScheduleConfig::default(),
        }
    }

    /// Resolve file, environment and command-line layers in that order.
    pub fn load(file: Option<&Path>, cli: ConfigLayer) -> Result<Self, ConfigError> {
        let base = match file {
            Some(path) => ConfigLayer::from_file(path)?,
            None => ConfigLayer::default(),
        };
        let config = base.merge(ConfigLayer::from_env()?).merge(cli).resolve()?;
        debug!(
            stream = %config.stream_name,
            label = %config.canary_label,
            region = %config.region,
            mode = %config.mode,
            run_duration_secs = config.run_duration.as_secs(),
            storage_endpoint = %config.storage_endpoint,
            metrics_endpoint = ?config.metrics_endpoint,
            schedule = ?config.schedule,
            "resolved canary config"
        );
        Ok(config)
    }
}
