//! HTTP client recording every request and answering like the Application Insights services.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http::{Request, Response};
use opentelemetry_http::{HttpClient, HttpError};
use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

// Fake instrumentation key (this is a random uuid)
pub const INSTRUMENTATION_KEY: &str = "0fdcec70-0ce5-4085-89d9-9ae8ead9af66";

#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    requests: Arc<Mutex<Vec<Request<Bytes>>>>,
    track_statuses: Arc<Mutex<VecDeque<u16>>>,
    live_metrics_subscriptions: Arc<Mutex<VecDeque<bool>>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status codes returned for track requests, in order. Once used up every request succeeds.
    pub fn with_track_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.track_statuses
            .lock()
            .expect("statuses mutex is healthy")
            .extend(statuses);
        self
    }

    /// Values of `x-ms-qps-subscribed` for live metrics requests, in order. The last value sticks
    /// once the others are used up. Without any, every request is subscribed.
    pub fn with_live_metrics_subscriptions(
        self,
        subscribed: impl IntoIterator<Item = bool>,
    ) -> Self {
        self.live_metrics_subscriptions
            .lock()
            .expect("subscriptions mutex is healthy")
            .extend(subscribed);
        self
    }

    pub fn requests(&self) -> Vec<Request<Bytes>> {
        self.requests
            .lock()
            .expect("requests mutex is healthy")
            .clone()
    }

    pub fn track_requests(&self) -> Vec<Request<Bytes>> {
        self.requests_to("/v2/track")
    }

    pub fn profile_requests(&self) -> Vec<Request<Bytes>> {
        self.requests_to("/api/profiles/")
    }

    pub fn live_metrics_requests(&self) -> Vec<Request<Bytes>> {
        self.requests_to("/QuickPulseService.svc/")
    }

    fn requests_to(&self, path: &str) -> Vec<Request<Bytes>> {
        self.requests()
            .into_iter()
            .filter(|req| req.uri().path().starts_with(path))
            .collect()
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send_bytes(&self, req: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let path = req.uri().path().to_string();
        self.requests
            .lock()
            .expect("requests mutex is healthy")
            .push(req);

        let res = if path.starts_with("/QuickPulseService.svc/") {
            let subscribed = {
                let mut subscriptions = self
                    .live_metrics_subscriptions
                    .lock()
                    .expect("subscriptions mutex is healthy");
                if subscriptions.len() > 1 {
                    subscriptions.pop_front()
                } else {
                    subscriptions.front().copied()
                }
            };
            Response::builder()
                .status(200)
                .header("x-ms-qps-subscribed", subscribed.unwrap_or(true).to_string())
                .body(Bytes::new())?
        } else if path.starts_with("/api/profiles/") {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Response::builder()
                .status(200)
                .body(Bytes::from_static(b"app-id"))?
        } else {
            let status = self
                .track_statuses
                .lock()
                .expect("statuses mutex is healthy")
                .pop_front()
                .unwrap_or(200);
            Response::builder().status(status).body(Bytes::new())?
        };
        Ok(res)
    }
}

/// Envelopes of a track request.
pub fn envelopes(req: &Request<Bytes>) -> Vec<serde_json::Value> {
    serde_json::from_reader(GzDecoder::new(req.body().as_ref())).expect("body is gzipped json")
}

pub fn envelope_names(req: &Request<Bytes>) -> Vec<String> {
    envelopes(req)
        .iter()
        .map(|envelope| {
            envelope["data"]["baseData"]["name"]
                .as_str()
                .expect("item has a name")
                .to_string()
        })
        .collect()
}

/// Request line and headers, without the body.
pub fn request_head(req: &Request<Bytes>) -> String {
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            format!(
                "{}: {}",
                name,
                value.to_str().expect("header value is valid string")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{} {} {:?}\nhost: {}\n{}",
        req.method(),
        req.uri().path_and_query().expect("path exists"),
        req.version(),
        req.uri().authority().expect("authority exists"),
        headers
    )
}

/// Batches waiting for a retry in `dir`.
pub fn stored_batches(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.to_string_lossy().ends_with(".ai.json"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Polls `condition` until it holds. Panics after 5 seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
