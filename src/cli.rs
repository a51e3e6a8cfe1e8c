use std::path::PathBuf;

use clap::Parser;

use crate::config::ConfigLayer;

#[derive(Parser, Debug)]
#[command(name = "fragment-canary")]
#[command(version)]
#[command(about = "Synthetic canary for a media-storage ingestion pipeline")]
pub struct Args {
    /// TOML file with canary settings (lowest precedence)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Stream to watch (overrides CANARY_STREAM_NAME)
    #[arg(long)]
    pub stream_name: Option<String>,

    /// Aggregate label for the second metric dimension (overrides CANARY_LABEL)
    #[arg(long)]
    pub label: Option<String>,

    /// Service region (overrides AWS_DEFAULT_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Run budget in seconds (overrides CANARY_DURATION_IN_SECONDS)
    #[arg(long, short)]
    pub duration: Option<u64>,

    /// FragmentContinuity or TimeToFirstFragment (overrides CANARY_METRIC_TYPE)
    #[arg(long)]
    pub metric_type: Option<String>,

    /// Storage control-plane base URL, required (overrides CANARY_CP_URL)
    #[arg(long)]
    pub storage_endpoint: Option<String>,

    /// Metrics ingest URL; samples go to the log when unset
    #[arg(long)]
    pub metrics_endpoint: Option<String>,

    /// Metric namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Log samples instead of publishing them, even if a metrics endpoint is set
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// The command-line layer of the configuration (highest precedence).
    pub fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            stream_name: self.stream_name.clone(),
            canary_label: self.label.clone(),
            region: self.region.clone(),
            duration_in_seconds: self.duration,
            metric_type: self.metric_type.clone(),
            storage_endpoint: self.storage_endpoint.clone(),
            metrics_endpoint: self.metrics_endpoint.clone(),
            namespace: self.namespace.clone(),
            ..ConfigLayer::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanaryMode;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["fragment-canary"]);
        assert!(args.config.is_none());
        assert!(args.stream_name.is_none());
        assert!(args.duration.is_none());
        assert!(!args.dry_run);
        assert_eq!(args.to_layer(), ConfigLayer::default());
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "fragment-canary",
            "--config",
            "canary.toml",
            "--stream-name",
            "cam-1",
            "--label",
            "fleet",
            "--region",
            "eu-west-1",
            "--duration",
            "120",
            "--metric-type",
            "TimeToFirstFragment",
            "--storage-endpoint",
            "http://localhost:4566",
            "--metrics-endpoint",
            "http://localhost:9000/metrics",
            "--namespace",
            "Test",
            "--dry-run",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("canary.toml")));
        assert!(args.dry_run);

        let layer = args.to_layer();
        assert_eq!(layer.stream_name.as_deref(), Some("cam-1"));
        assert_eq!(layer.canary_label.as_deref(), Some("fleet"));
        assert_eq!(layer.region.as_deref(), Some("eu-west-1"));
        assert_eq!(layer.duration_in_seconds, Some(120));
        assert_eq!(layer.metric_type.as_deref(), Some("TimeToFirstFragment"));
        assert_eq!(layer.namespace.as_deref(), Some("Test"));
        assert!(layer.initial_delay_ms.is_none());
    }

    #[test]
    fn test_args_short_flags() {
        let args = Args::parse_from(["fragment-canary", "-c", "x.toml", "-d", "30"]);
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert_eq!(args.duration, Some(30));
    }

    #[test]
    fn test_cli_layer_wins_over_lower_layers() {
        let lower = ConfigLayer {
            stream_name: Some("from-env".to_string()),
            duration_in_seconds: Some(10),
            metric_type: Some("FragmentContinuity".to_string()),
            storage_endpoint: Some("http://127.0.0.1:8443".to_string()),
            ..ConfigLayer::default()
        };
        let args = Args::parse_from([
            "fragment-canary",
            "--stream-name",
            "from-cli",
            "--metric-type",
            "TimeToFirstFragment",
        ]);
        let config = lower.merge(args.to_layer()).resolve().unwrap();
        assert_eq!(config.stream_name, "from-cli");
        assert_eq!(config.mode, CanaryMode::TimeToFirstFragment);
        assert_eq!(config.run_duration.as_secs(), 10);
    }

    #[test]
    fn test_args_reject_non_numeric_duration() {
        assert!(Args::try_parse_from(["fragment-canary", "--duration", "soon"]).is_err());
    }
}
