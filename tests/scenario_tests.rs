//! End-to-end runs of the canary against in-memory and local-HTTP collaborators.

use std::sync::Arc;
use std::time::Duration;

use fragment_canary::config::{CanaryConfig, CanaryMode, ConfigLayer};
use fragment_canary::error::{ConfigError, StorageError};
use fragment_canary::metrics::sinks::HttpMetricsSink;
use fragment_canary::metrics::{
    MetricUnit, MetricsSink, FRAGMENT_RECEIVED, LABEL_DIMENSION, STREAM_DIMENSION,
    TIME_TO_FIRST_FRAGMENT,
};
use fragment_canary::storage::{HttpStorageClient, StorageService};
use fragment_canary::testing::http::{serve, CannedResponse};
use fragment_canary::testing::{
    fragments, RecordingSink, ScriptedStorage, ScriptedStream, StorageCall,
};
use fragment_canary::Canary;
use rstest::rstest;

fn config(mode: CanaryMode, secs: u64) -> CanaryConfig {
    CanaryConfig::new("cam-7", "fleet-a", mode, Duration::from_secs(secs))
}

fn canary(
    cfg: &CanaryConfig,
    storage: &Arc<ScriptedStorage>,
    sink: &Arc<RecordingSink>,
) -> Canary {
    Canary::new(
        cfg,
        Arc::clone(storage) as Arc<dyn StorageService>,
        Arc::clone(sink) as Arc<dyn MetricsSink>,
    )
}

// ---------------------------------------------------------------------------
// Fragment continuity
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_continuity_reports_growth_flat_growth() {
    let storage = Arc::new(ScriptedStorage::new());
    storage
        .push_list(Ok(fragments(3)))
        .push_list(Ok(fragments(3)))
        .push_list(Ok(fragments(5)));
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::FragmentContinuity, 100), &storage, &sink);
    let started = c.context().started_at;

    let report = c.run().await;

    // Polls at 60s, 76s and 92s; the 108s tick is past the budget.
    let list_times: Vec<Duration> = storage
        .call_log()
        .into_iter()
        .filter(|(_, call)| matches!(call, StorageCall::ListFragments(_)))
        .map(|(at, _)| at - started)
        .collect();
    assert_eq!(
        list_times,
        vec![
            Duration::from_secs(60),
            Duration::from_secs(76),
            Duration::from_secs(92)
        ]
    );

    assert_eq!(sink.values(FRAGMENT_RECEIVED), vec![1.0, 0.0, 1.0]);
    assert_eq!(report.polls, 3);
    assert_eq!(report.emitted, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.fired);
    assert!(!report.interrupted);
    assert_eq!(report.elapsed, Duration::from_secs(100));
}

#[tokio::test(start_paused = true)]
async fn test_every_emission_carries_both_dimensions() {
    let storage = Arc::new(ScriptedStorage::new());
    storage.push_list(Ok(fragments(1)));
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::FragmentContinuity, 80), &storage, &sink);

    c.run().await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    for batch in batches {
        assert_eq!(batch.namespace, "KinesisVideoSDKCanary");
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.samples[0].dimension.name, STREAM_DIMENSION);
        assert_eq!(batch.samples[0].dimension.value, "cam-7");
        assert_eq!(batch.samples[1].dimension.name, LABEL_DIMENSION);
        assert_eq!(batch.samples[1].dimension.value, "fleet-a");
        assert_eq!(batch.samples[0].value, batch.samples[1].value);
        assert!(batch.samples.iter().all(|s| s.unit == MetricUnit::None));
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_shorter_than_grace_period_emits_nothing() {
    let storage = Arc::new(ScriptedStorage::new());
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::FragmentContinuity, 30), &storage, &sink);

    let report = c.run().await;

    assert_eq!(report.polls, 0);
    assert_eq!(storage.call_count(), 0);
    assert!(sink.batches().is_empty());
    assert_eq!(report.elapsed, Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_continuity_absorbs_storage_failures() {
    let storage = Arc::new(ScriptedStorage::new());
    storage
        .push_list(Ok(fragments(2)))
        .push_list(Err(StorageError::Http {
            status: 503,
            url: "memory://data/listFragments".to_string(),
        }))
        .push_list(Ok(fragments(2)))
        .push_list(Ok(fragments(4)));
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::FragmentContinuity, 110), &storage, &sink);

    let report = c.run().await;

    // 60s, 76s (fails), 92s, 108s
    assert_eq!(report.polls, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(sink.values(FRAGMENT_RECEIVED), vec![1.0, 0.0, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_outage_does_not_stop_polling() {
    let storage = Arc::new(ScriptedStorage::new());
    storage
        .push_list(Ok(fragments(1)))
        .push_list(Ok(fragments(2)));
    let sink = Arc::new(RecordingSink::failing());
    let c = canary(&config(CanaryMode::FragmentContinuity, 80), &storage, &sink);

    let report = c.run().await;

    assert_eq!(report.polls, 2);
    assert_eq!(sink.rejected(), 2);
    assert!(sink.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_polls_never_overlap() {
    // Each call takes 20s, so one poll (endpoint + list) spans 40s and
    // overruns two 16s periods.
    let storage = Arc::new(ScriptedStorage::new().with_delay(Duration::from_secs(20)));
    let sink = Arc::new(RecordingSink::new());
    let mut cfg = config(CanaryMode::FragmentContinuity, 200);
    cfg.schedule.call_timeout = Duration::from_secs(60);
    let c = canary(&cfg, &storage, &sink);
    let started = c.context().started_at;

    c.run().await;

    let resolves: Vec<Duration> = storage
        .call_log()
        .into_iter()
        .filter(|(_, call)| matches!(call, StorageCall::ResolveEndpoint(_)))
        .map(|(at, _)| at - started)
        .collect();
    // Polls never overlap: each starts only after the previous one returned.
    for pair in resolves.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(40), "{resolves:?}");
    }
    assert!(resolves.len() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_signal_interrupts_run() {
    let storage = Arc::new(ScriptedStorage::new());
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::FragmentContinuity, 3600), &storage, &sink);

    let report = c
        .run_until(tokio::time::sleep(Duration::from_secs(70)))
        .await;

    assert!(report.interrupted);
    assert_eq!(report.polls, 1);
    assert_eq!(report.elapsed, Duration::from_secs(70));
}

// ---------------------------------------------------------------------------
// Time to first fragment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_latency_fires_once_at_first_byte() {
    let storage = Arc::new(ScriptedStorage::new());
    storage
        .push_stream(ScriptedStream::empty())
        .push_stream(ScriptedStream::empty())
        .push_stream(ScriptedStream::empty())
        .push_stream(ScriptedStream::bytes(b"\x1a\x45\xdf\xa3"));
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::TimeToFirstFragment, 30), &storage, &sink);
    let started = c.context().started_at;

    let report = c.run().await;

    let opens: Vec<Duration> = storage
        .call_log()
        .into_iter()
        .filter(|(_, call)| *call == StorageCall::OpenLiveStream)
        .map(|(at, _)| at - started)
        .collect();
    assert_eq!(
        opens,
        vec![
            Duration::ZERO,
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(750)
        ]
    );

    assert_eq!(sink.values(TIME_TO_FIRST_FRAGMENT), vec![750.0]);
    assert!(sink
        .samples()
        .iter()
        .all(|s| s.unit == MetricUnit::Milliseconds));
    assert!(report.fired);
    assert_eq!(report.emitted, 1);
    assert_eq!(report.polls, 4);
    assert_eq!(report.elapsed, Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_latency_never_fires_without_data() {
    let storage = Arc::new(ScriptedStorage::new());
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::TimeToFirstFragment, 2), &storage, &sink);

    let report = c.run().await;

    assert!(!report.fired);
    assert_eq!(report.polls, 8);
    assert!(sink.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_latency_retries_after_open_failure() {
    let storage = Arc::new(ScriptedStorage::new());
    storage
        .push_stream(ScriptedStream::Fail(StorageError::Connect {
            url: "memory://data/getMedia".to_string(),
            detail: "reset".to_string(),
        }))
        .push_stream(ScriptedStream::bytes(b"x"));
    let sink = Arc::new(RecordingSink::new());
    let c = canary(&config(CanaryMode::TimeToFirstFragment, 5), &storage, &sink);

    let report = c.run().await;

    assert_eq!(report.failed, 1);
    assert!(report.fired);
    assert_eq!(sink.values(TIME_TO_FIRST_FRAGMENT), vec![250.0]);
}

// ---------------------------------------------------------------------------
// Startup configuration
// ---------------------------------------------------------------------------

#[test]
fn test_unknown_mode_is_rejected_before_any_poll() {
    let layer = ConfigLayer {
        duration_in_seconds: Some(60),
        metric_type: Some("FrameRate".to_string()),
        ..ConfigLayer::default()
    };
    let err = layer.resolve().unwrap_err();
    assert!(matches!(err, ConfigError::UnknownMode(ref m) if m == "FrameRate"));
}

#[test]
fn test_missing_duration_is_fatal() {
    let layer = ConfigLayer {
        metric_type: Some("FragmentContinuity".to_string()),
        ..ConfigLayer::default()
    };
    assert!(matches!(
        layer.resolve(),
        Err(ConfigError::Missing { .. })
    ));
}

#[rstest]
#[case::duration(ConfigLayer { duration_in_seconds: Some(u64::MAX), ..ConfigLayer::default() })]
#[case::initial_delay(ConfigLayer { initial_delay_ms: Some(u64::MAX), ..ConfigLayer::default() })]
fn test_overflowing_span_is_rejected_at_startup(#[case] over: ConfigLayer) {
    let layer = ConfigLayer {
        duration_in_seconds: Some(60),
        metric_type: Some("FragmentContinuity".to_string()),
        storage_endpoint: Some("http://127.0.0.1:8443".to_string()),
        ..ConfigLayer::default()
    }
    .merge(over);
    assert!(matches!(layer.resolve(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_missing_control_plane_url_is_fatal() {
    let layer = ConfigLayer {
        duration_in_seconds: Some(60),
        metric_type: Some("FragmentContinuity".to_string()),
        ..ConfigLayer::default()
    };
    assert!(matches!(
        layer.resolve(),
        Err(ConfigError::Missing { key: "CANARY_CP_URL" })
    ));
}

// ---------------------------------------------------------------------------
// Over real HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_continuity_over_http_collaborators() {
    let (data, data_requests) = serve(vec![CannedResponse::json(
        200,
        r#"{"Fragments":[
            {"FragmentNumber":"1","ProducerTimestamp":1.0,"ServerTimestamp":1.0},
            {"FragmentNumber":"2","ProducerTimestamp":2.0,"ServerTimestamp":2.0}
        ]}"#,
    )])
    .await
    .unwrap();
    let control_body = format!(r#"{{"DataEndpoint":"{data}"}}"#);
    let (control, control_requests) = serve(vec![CannedResponse::json(200, &control_body)])
        .await
        .unwrap();
    let (metrics, metrics_requests) = serve(vec![CannedResponse::json(200, "{}")])
        .await
        .unwrap();

    let mut cfg = config(CanaryMode::FragmentContinuity, 1);
    cfg.schedule.initial_delay = Duration::ZERO;
    cfg.schedule.continuity_interval = Duration::from_secs(60);
    let storage = HttpStorageClient::builder(control).build().unwrap();
    let sink = HttpMetricsSink::builder(metrics).build().unwrap();

    let report = Canary::new(&cfg, Arc::new(storage), Arc::new(sink)).run().await;
    assert_eq!(report.polls, 1);
    assert_eq!(report.emitted, 1);

    let control_seen = control_requests.await.unwrap();
    assert!(control_seen[0].body.contains(r#""StreamName":"cam-7""#));
    let data_seen = data_requests.await.unwrap();
    assert!(data_seen[0].head.starts_with("POST /listFragments"));

    let metrics_seen = metrics_requests.await.unwrap();
    assert_eq!(metrics_seen.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&metrics_seen[0].body).unwrap();
    assert_eq!(body["Namespace"], "KinesisVideoSDKCanary");
    let data = body["MetricData"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["MetricName"], "FragmentReceived");
    assert_eq!(data[0]["Value"], 1.0);
}
