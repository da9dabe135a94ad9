//! Offline retry: failed batches are stored on disk and resent by the sweep.

mod recording_client;

use appinsights_agent::{Config, EventTelemetry, TelemetryClient};
use recording_client::{
    envelope_names, stored_batches, wait_until, RecordingClient, INSTRUMENTATION_KEY,
};
use std::time::Duration;

fn config(dir: &tempfile::TempDir, resend_interval: Duration) -> Config {
    Config::from_instrumentation_key(INSTRUMENTATION_KEY)
        .with_storage_directory(dir.path())
        .with_resend_interval(resend_interval)
}

#[tokio::test]
async fn failed_batch_is_resent_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let http = RecordingClient::new().with_track_statuses([503]);
    let client =
        TelemetryClient::new(config(&dir, Duration::from_millis(100)), http.clone()).unwrap();

    client.track(EventTelemetry::new("retried"));
    client.flush_and_wait().await;
    assert_eq!(1, stored_batches(dir.path()).len());

    wait_until(|| http.track_requests().len() == 2 && stored_batches(dir.path()).is_empty())
        .await;
    assert_eq!(vec!["retried"], envelope_names(&http.track_requests()[1]));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(2, http.track_requests().len());
}

#[tokio::test]
async fn non_retryable_failure_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let http = RecordingClient::new().with_track_statuses([400]);
    let client =
        TelemetryClient::new(config(&dir, Duration::from_millis(100)), http.clone()).unwrap();

    client.track(EventTelemetry::new("rejected"));
    client.flush_and_wait().await;

    assert!(stored_batches(dir.path()).is_empty());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(1, http.track_requests().len());
}

#[tokio::test]
async fn disabled_disk_retry_drops_failed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let http = RecordingClient::new().with_track_statuses([503]);
    let client =
        TelemetryClient::new(config(&dir, Duration::from_secs(3600)), http.clone()).unwrap();
    client.set_use_disk_retry_caching(false, None, None);

    client.track(EventTelemetry::new("lost"));
    client.flush_and_wait().await;

    assert_eq!(1, http.track_requests().len());
    assert!(stored_batches(dir.path()).is_empty());
}

#[tokio::test]
async fn oldest_batch_is_evicted_over_quota() {
    let dir = tempfile::tempdir().unwrap();
    let http = RecordingClient::new().with_track_statuses([503; 4]);
    let client =
        TelemetryClient::new(config(&dir, Duration::from_secs(3600)), http.clone()).unwrap();

    client.track(EventTelemetry::new("event-1"));
    client.flush_and_wait().await;
    let stored = stored_batches(dir.path());
    assert_eq!(1, stored.len());
    let size = std::fs::metadata(&stored[0]).unwrap().len();

    client.set_use_disk_retry_caching(true, None, Some(size + size / 2));
    client.track(EventTelemetry::new("event-2"));
    client.flush_and_wait().await;

    let stored = stored_batches(dir.path());
    assert_eq!(1, stored.len());
    let content = std::fs::read_to_string(&stored[0]).unwrap();
    assert!(content.contains("event-2"));
    assert!(!content.contains("event-1"));
}
