use crate::{
    convert::{duration_from_string, new_stream_id},
    models::{
        context_tag_keys, Data, Envelope, QuickPulseDocument, QuickPulseDocumentProperty,
        QuickPulseDocumentType, QuickPulseEnvelope, QuickPulseMetric,
    },
    sender::lock,
    uploader_quick_pulse::{self, PostOrPing},
};
use backon::{BackoffBuilder as _, ExponentialBackoff, ExponentialBuilder};
use futures_util::{pin_mut, select_biased, FutureExt as _};
use http::Uri;
use opentelemetry_http::HttpClient;
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

const CHANNEL_CAPACITY: usize = 100;
const MAX_POST_WAIT_TIME: Duration = Duration::from_secs(20);
const MAX_PING_WAIT_TIME: Duration = Duration::from_secs(60);
const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DOCUMENTS_PER_POST: usize = 20;
const INVARIANT_VERSION: u32 = 1;

const METRIC_REQUEST_RATE: &str = "\\ApplicationInsights\\Requests/Sec";
const METRIC_REQUEST_DURATION: &str = "\\ApplicationInsights\\Request Duration";
const METRIC_REQUEST_FAILURE_RATE: &str = "\\ApplicationInsights\\Requests Failed/Sec";
const METRIC_REQUEST_SUCCESS_RATE: &str = "\\ApplicationInsights\\Requests Succeeded/Sec";
const METRIC_DEPENDENCY_RATE: &str = "\\ApplicationInsights\\Dependency Calls/Sec";
const METRIC_DEPENDENCY_DURATION: &str = "\\ApplicationInsights\\Dependency Call Duration";
const METRIC_DEPENDENCY_FAILURE_RATE: &str = "\\ApplicationInsights\\Dependency Calls Failed/Sec";
const METRIC_DEPENDENCY_SUCCESS_RATE: &str =
    "\\ApplicationInsights\\Dependency Calls Succeeded/Sec";
const METRIC_EXCEPTION_RATE: &str = "\\ApplicationInsights\\Exceptions/Sec";
const METRIC_COMMITTED_BYTES: &str = "\\Memory\\Committed Bytes";
const METRIC_PROCESSOR_TIME: &str = "\\Processor(_Total)\\% Processor Time";

/// State of the live metrics stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMetricsState {
    /// Live metrics are not enabled.
    Disabled,
    /// Nobody is watching. The service is pinged at a low rate.
    Idle,
    /// A viewer is subscribed. Metrics and documents are posted every interval.
    Streaming,
}

/// Everything a live metrics session needs to talk to the service.
#[derive(Debug, Clone)]
pub(crate) struct QuickPulseSettings {
    pub(crate) endpoint: Uri,
    pub(crate) instrumentation_key: String,
    pub(crate) ping_interval: Duration,
    pub(crate) post_interval: Duration,
    pub(crate) machine_name: String,
    pub(crate) instance: String,
    pub(crate) role_name: String,
    pub(crate) version: String,
    pub(crate) stream_id: Option<String>,
}

struct Session {
    sender: mpsc::Sender<Envelope>,
    task: JoinHandle<()>,
}

/// Owns the live metrics task. Enabling starts a fresh session in [`LiveMetricsState::Idle`],
/// disabling aborts it.
pub(crate) struct QuickPulseManager {
    client: Arc<dyn HttpClient>,
    settings: QuickPulseSettings,
    runtime: Handle,
    state: Arc<Mutex<LiveMetricsState>>,
    session: Mutex<Option<Session>>,
}

impl QuickPulseManager {
    pub(crate) fn new(
        client: Arc<dyn HttpClient>,
        settings: QuickPulseSettings,
        runtime: Handle,
    ) -> Self {
        QuickPulseManager {
            client,
            settings,
            runtime,
            state: Arc::new(Mutex::new(LiveMetricsState::Disabled)),
            session: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> LiveMetricsState {
        *lock(&self.state)
    }

    pub(crate) fn enable(&self, enabled: bool) {
        let mut session = lock(&self.session);
        if enabled {
            if session.is_some() {
                return;
            }
            let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
            *lock(&self.state) = LiveMetricsState::Idle;
            let task = self.runtime.spawn(run(
                receiver,
                self.client.clone(),
                self.settings.clone(),
                self.state.clone(),
            ));
            *session = Some(Session { sender, task });
        } else if let Some(old) = session.take() {
            old.task.abort();
            *lock(&self.state) = LiveMetricsState::Disabled;
        }
    }

    /// Hands a copy of the envelope to the running session. Drops it when the session is busy.
    pub(crate) fn forward(&self, envelope: &Envelope) {
        if let Some(session) = lock(&self.session).as_ref() {
            if session.sender.try_send(envelope.clone()).is_err() {
                tracing::debug!("Live metrics queue is full; envelope not counted");
            }
        }
    }
}

impl fmt::Debug for QuickPulseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickPulseManager")
            .field("endpoint", &self.settings.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for QuickPulseManager {
    fn drop(&mut self) {
        self.enable(false);
    }
}

enum Tick {
    Envelope(Envelope),
    Send,
    Stop,
}

async fn run(
    mut receiver: mpsc::Receiver<Envelope>,
    client: Arc<dyn HttpClient>,
    settings: QuickPulseSettings,
    state: Arc<Mutex<LiveMetricsState>>,
) {
    let stream_id = settings.stream_id.clone().unwrap_or_else(new_stream_id);
    let mut is_collecting = false;
    let mut last_success_time = tokio::time::Instant::now();
    let mut redirected_host: Option<Uri> = None;
    let mut polling_interval_hint: Option<Duration> = None;
    let mut backoff: Option<ExponentialBackoff> = None;
    let mut collector = Collector::new();

    // Ping right away so a waiting viewer sees the stream quickly.
    let mut delay = Box::pin(tokio::time::sleep(Duration::ZERO)).fuse();

    loop {
        let tick = {
            let next_envelope = receiver.recv().fuse();
            pin_mut!(next_envelope);
            select_biased! {
                envelope = next_envelope => envelope.map_or(Tick::Stop, Tick::Envelope),
                _ = delay => Tick::Send,
            }
        };
        match tick {
            Tick::Envelope(envelope) => {
                collector.add(&envelope);
                continue;
            }
            Tick::Stop => break,
            Tick::Send => {}
        }

        let post_or_ping = if is_collecting {
            PostOrPing::Post
        } else {
            PostOrPing::Ping
        };
        let (metrics, documents) = collector.collect();
        let now_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let envelope = QuickPulseEnvelope {
            documents: is_collecting.then_some(documents),
            instance: settings.instance.clone(),
            role_name: settings.role_name.clone(),
            instrumentation_key: settings.instrumentation_key.clone(),
            invariant_version: INVARIANT_VERSION,
            machine_name: settings.machine_name.clone(),
            metrics: is_collecting.then_some(metrics),
            stream_id: stream_id.clone(),
            timestamp: format!("/Date({})/", now_ms),
            version: settings.version.clone(),
        };

        let result = uploader_quick_pulse::send(
            client.as_ref(),
            redirected_host.as_ref().unwrap_or(&settings.endpoint),
            post_or_ping,
            envelope,
            REQUEST_TIMEOUT,
        )
        .await;
        let last_send_succeeded = match result {
            Ok(res) => {
                tracing::debug!(
                    %post_or_ping,
                    should_post = res.should_post,
                    redirected_host = ?res.redirected_host,
                    polling_interval_hint = ?res.polling_interval_hint,
                    "Live metrics request succeeded"
                );
                last_success_time = tokio::time::Instant::now();
                is_collecting = res.should_post;
                if res.redirected_host.is_some() {
                    redirected_host = res.redirected_host;
                }
                if res.polling_interval_hint.is_some() {
                    polling_interval_hint = res.polling_interval_hint;
                }
                backoff = None;
                true
            }
            Err(err) => {
                tracing::debug!(%post_or_ping, error = %err, "Live metrics request failed");
                false
            }
        };

        let mut current_timeout = if is_collecting {
            settings.post_interval
        } else {
            polling_interval_hint.unwrap_or(settings.ping_interval)
        };
        if !last_send_succeeded {
            let time_since_last_success = last_success_time.elapsed();
            if is_collecting && time_since_last_success >= MAX_POST_WAIT_TIME {
                // Haven't posted successfully in 20 seconds, so wait 60 seconds and ping
                is_collecting = false;
                backoff = None;
                current_timeout = FALLBACK_INTERVAL;
            } else if !is_collecting && time_since_last_success >= MAX_PING_WAIT_TIME {
                // Haven't pinged successfully in 60 seconds, so wait another 60 seconds
                current_timeout = FALLBACK_INTERVAL;
            } else {
                let interval = current_timeout;
                current_timeout = backoff
                    .get_or_insert_with(|| failure_backoff(interval))
                    .next()
                    .unwrap_or(FALLBACK_INTERVAL);
            }
        }

        *lock(&state) = if is_collecting {
            LiveMetricsState::Streaming
        } else {
            LiveMetricsState::Idle
        };
        delay = Box::pin(tokio::time::sleep(current_timeout)).fuse();
    }
}

/// Delays after consecutive failures: the regular interval, doubling up to the fallback interval.
fn failure_backoff(interval: Duration) -> ExponentialBackoff {
    ExponentialBuilder::default()
        .with_min_delay(interval.min(FALLBACK_INTERVAL))
        .with_max_delay(FALLBACK_INTERVAL)
        .with_factor(2.0)
        .with_max_times(usize::MAX)
        .build()
}

#[derive(Debug, Default)]
struct Counter {
    count: u32,
    failed: u32,
    total_duration_ms: f64,
}

impl Counter {
    fn add(&mut self, success: Option<bool>, duration: &str) {
        self.count += 1;
        if success == Some(false) {
            self.failed += 1;
        }
        if let Some(duration) = duration_from_string(duration) {
            self.total_duration_ms += duration.as_secs_f64() * 1000.0;
        }
    }

    fn average_duration_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_duration_ms / self.count as f64
        }
    }
}

/// Aggregates forwarded envelopes between two live metrics requests.
struct Collector {
    since: Instant,
    requests: Counter,
    dependencies: Counter,
    exceptions: u32,
    documents: Vec<QuickPulseDocument>,
    system: System,
    pid: Option<Pid>,
}

impl Collector {
    fn new() -> Self {
        Collector {
            since: Instant::now(),
            requests: Counter::default(),
            dependencies: Counter::default(),
            exceptions: 0,
            documents: Vec::new(),
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn add(&mut self, envelope: &Envelope) {
        match &envelope.data {
            Data::Request(data) => self.requests.add(Some(data.success), &data.duration),
            Data::RemoteDependency(data) => self.dependencies.add(data.success, &data.duration),
            Data::Exception(_) => self.exceptions += 1,
            _ => {}
        }
        if self.documents.len() < MAX_DOCUMENTS_PER_POST {
            if let Some(document) = document(envelope) {
                self.documents.push(document);
            }
        }
    }

    /// Metrics and documents since the last call. Resets all counters.
    fn collect(&mut self) -> (Vec<QuickPulseMetric>, Vec<QuickPulseDocument>) {
        let seconds = self.since.elapsed().as_secs_f64().max(0.001);
        let rate = |count: u32| count as f64 / seconds;
        let metric = |name: &'static str, value: f64| QuickPulseMetric {
            name,
            value,
            weight: 1,
        };

        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let committed_bytes = match self.pid {
            Some(pid) => {
                self.system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                self.system
                    .process(pid)
                    .map(|process| process.memory())
                    .unwrap_or_else(|| self.system.used_memory())
            }
            None => self.system.used_memory(),
        };

        let requests = std::mem::take(&mut self.requests);
        let dependencies = std::mem::take(&mut self.dependencies);
        let metrics = vec![
            metric(METRIC_REQUEST_RATE, rate(requests.count)),
            metric(METRIC_REQUEST_DURATION, requests.average_duration_ms()),
            metric(METRIC_REQUEST_FAILURE_RATE, rate(requests.failed)),
            metric(
                METRIC_REQUEST_SUCCESS_RATE,
                rate(requests.count - requests.failed),
            ),
            metric(METRIC_DEPENDENCY_RATE, rate(dependencies.count)),
            metric(METRIC_DEPENDENCY_DURATION, dependencies.average_duration_ms()),
            metric(METRIC_DEPENDENCY_FAILURE_RATE, rate(dependencies.failed)),
            metric(
                METRIC_DEPENDENCY_SUCCESS_RATE,
                rate(dependencies.count - dependencies.failed),
            ),
            metric(METRIC_EXCEPTION_RATE, rate(std::mem::take(&mut self.exceptions))),
            metric(METRIC_COMMITTED_BYTES, committed_bytes as f64),
            metric(
                METRIC_PROCESSOR_TIME,
                f64::from(self.system.global_cpu_usage()),
            ),
        ];
        self.since = Instant::now();
        (metrics, std::mem::take(&mut self.documents))
    }
}

fn document(envelope: &Envelope) -> Option<QuickPulseDocument> {
    let operation_name = envelope
        .tags
        .get(context_tag_keys::OPERATION_NAME)
        .cloned()
        .unwrap_or_default();
    let (type_, document_type, properties) = match &envelope.data {
        Data::Request(data) => (
            "RequestTelemetryDocument",
            QuickPulseDocumentType::Request {
                name: data.name.clone().unwrap_or_default(),
                success: Some(data.success),
                duration: data.duration.clone(),
                response_code: data.response_code.clone(),
                operation_name,
            },
            data.properties.as_ref(),
        ),
        Data::RemoteDependency(data) => (
            "DependencyTelemetryDocument",
            QuickPulseDocumentType::RemoteDependency {
                name: data.name.clone(),
                target: data.target.clone().unwrap_or_default(),
                success: data.success,
                duration: data.duration.clone(),
                result_code: data.result_code.clone().unwrap_or_default(),
                command_name: data.data.clone().unwrap_or_default(),
                dependency_type_name: data.type_.clone().unwrap_or_default(),
                operation_name,
            },
            data.properties.as_ref(),
        ),
        Data::Exception(data) => {
            let outer = data.exceptions.first()?;
            (
                "ExceptionTelemetryDocument",
                QuickPulseDocumentType::Exception {
                    exception: outer.stack.clone().unwrap_or_else(|| outer.message.clone()),
                    exception_message: outer.message.clone(),
                    exception_type: outer.type_name.clone(),
                },
                data.properties.as_ref(),
            )
        }
        Data::Message(data) => (
            "TraceTelemetryDocument",
            QuickPulseDocumentType::Trace {
                message: data.message.clone(),
                severity_level: data
                    .severity_level
                    .map(|level| level.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            data.properties.as_ref(),
        ),
        Data::Event(data) => (
            "EventTelemetryDocument",
            QuickPulseDocumentType::Event {
                name: data.name.clone(),
            },
            data.properties.as_ref(),
        ),
        _ => return None,
    };

    Some(QuickPulseDocument {
        type_,
        document_type,
        version: "1.0",
        operation_id: envelope
            .tags
            .get(context_tag_keys::OPERATION_ID)
            .cloned()
            .unwrap_or_default(),
        properties: properties
            .map(|properties| {
                properties
                    .iter()
                    .map(|(key, value)| QuickPulseDocumentProperty {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RemoteDependencyData, RequestData};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Request, Response};
    use opentelemetry_http::HttpError;
    use std::collections::{BTreeMap, VecDeque};

    /// Live metrics service answering from a script. `Some(subscribed)` answers 200, `None`
    /// answers 500. Records each request with the time and the state the loop was in.
    #[derive(Debug)]
    struct ScriptedService {
        responses: Mutex<VecDeque<Option<bool>>>,
        state: Arc<Mutex<LiveMetricsState>>,
        log: Mutex<Vec<(String, tokio::time::Instant, LiveMetricsState)>>,
    }

    #[async_trait]
    impl HttpClient for ScriptedService {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            let kind = request.uri().path().rsplit('/').next().unwrap().to_string();
            let state = *lock(&self.state);
            lock(&self.log).push((kind, tokio::time::Instant::now(), state));
            let next = lock(&self.responses).pop_front().unwrap_or(Some(true));
            let response = match next {
                Some(subscribed) => Response::builder()
                    .status(200)
                    .header("x-ms-qps-subscribed", subscribed.to_string())
                    .body(Bytes::new())?,
                None => Response::builder().status(500).body(Bytes::new())?,
            };
            Ok(response)
        }
    }

    fn settings(post_interval: Duration) -> QuickPulseSettings {
        QuickPulseSettings {
            endpoint: "https://rt.services.visualstudio.com".parse().unwrap(),
            instrumentation_key: "ikey".into(),
            ping_interval: Duration::from_secs(5),
            post_interval,
            machine_name: "machine".into(),
            instance: "instance".into(),
            role_name: String::new(),
            version: "test".into(),
            stream_id: Some("stream".into()),
        }
    }

    fn envelope(data: Data) -> Envelope {
        let mut tags = BTreeMap::new();
        tags.insert(context_tag_keys::OPERATION_ID.to_string(), "op".to_string());
        Envelope {
            name: "test".into(),
            time: "2020-06-21T10:40:00.000Z".into(),
            sample_rate: None,
            i_key: None,
            tags,
            data,
        }
    }

    fn request(success: bool, duration: &str) -> Envelope {
        envelope(Data::Request(RequestData {
            ver: 2,
            id: "id".into(),
            source: None,
            name: Some("GET /".into()),
            duration: duration.into(),
            response_code: if success { "200" } else { "500" }.into(),
            success,
            url: None,
            properties: None,
            measurements: None,
        }))
    }

    fn value(metrics: &[QuickPulseMetric], name: &str) -> f64 {
        metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| metric.value)
            .unwrap()
    }

    #[test]
    fn aggregates_requests_and_dependencies() {
        let mut collector = Collector::new();
        collector.add(&request(true, "0.00:00:00.100000"));
        collector.add(&request(false, "0.00:00:00.300000"));
        collector.add(&envelope(Data::RemoteDependency(RemoteDependencyData {
            ver: 2,
            name: "SELECT".into(),
            id: None,
            result_code: None,
            duration: "0.00:00:00.050000".into(),
            success: Some(false),
            data: None,
            target: None,
            type_: Some("SQL".into()),
            properties: None,
            measurements: None,
        })));

        let (metrics, documents) = collector.collect();
        assert_eq!(200.0, value(&metrics, METRIC_REQUEST_DURATION));
        assert_eq!(50.0, value(&metrics, METRIC_DEPENDENCY_DURATION));
        assert!(value(&metrics, METRIC_REQUEST_RATE) > 0.0);
        assert!(value(&metrics, METRIC_DEPENDENCY_FAILURE_RATE) > 0.0);
        assert_eq!(3, documents.len());
        assert_eq!("op", documents[0].operation_id);

        let (metrics, documents) = collector.collect();
        assert_eq!(0.0, value(&metrics, METRIC_REQUEST_RATE));
        assert!(documents.is_empty());
    }

    #[test]
    fn documents_are_capped() {
        let mut collector = Collector::new();
        for _ in 0..(MAX_DOCUMENTS_PER_POST + 5) {
            collector.add(&request(true, "0.00:00:00.001000"));
        }
        let (_, documents) = collector.collect();
        assert_eq!(MAX_DOCUMENTS_PER_POST, documents.len());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_posts_fall_back_to_pinging() {
        let state = Arc::new(Mutex::new(LiveMetricsState::Idle));
        let mut responses = VecDeque::new();
        responses.push_back(Some(true));
        responses.extend([None; 6]);
        let service = Arc::new(ScriptedService {
            responses: Mutex::new(responses),
            state: state.clone(),
            log: Mutex::new(Vec::new()),
        });
        let (sender, receiver) = mpsc::channel(1);
        let task = tokio::spawn(run(
            receiver,
            service.clone(),
            settings(Duration::from_secs(1)),
            state.clone(),
        ));

        while lock(&service.log).len() < 9 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        task.abort();
        drop(sender);

        let log = lock(&service.log).clone();
        let kinds: Vec<_> = log[..9].iter().map(|(kind, _, _)| kind.as_str()).collect();
        assert_eq!(
            vec!["ping", "post", "post", "post", "post", "post", "post", "ping", "post"],
            kinds
        );
        // Timer resolution is one millisecond.
        let assert_gap = |i: usize, expected: Duration| {
            let gap = log[i].1 - log[i - 1].1;
            assert!(
                gap >= expected && gap <= expected + Duration::from_millis(5),
                "gap before request {} was {:?}, expected {:?}",
                i,
                gap,
                expected
            );
        };
        // Failed posts back off from the post interval.
        assert_gap(2, Duration::from_secs(1));
        assert_gap(3, Duration::from_secs(2));
        assert_gap(4, Duration::from_secs(4));
        // 20 seconds without a successful post: wait for the fallback interval, then ping.
        assert!(log[6].1 - log[0].1 >= MAX_POST_WAIT_TIME);
        assert_gap(7, FALLBACK_INTERVAL);
        assert_eq!(LiveMetricsState::Streaming, log[6].2);
        assert_eq!(LiveMetricsState::Idle, log[7].2);
        // A successful ping puts the configured post interval back in place.
        assert_gap(8, Duration::from_secs(1));
        assert_eq!(LiveMetricsState::Streaming, log[8].2);
    }

    #[test]
    fn backoff_doubles_up_to_fallback() {
        let delays: Vec<_> = failure_backoff(Duration::from_secs(5)).take(6).collect();
        assert_eq!(Duration::from_secs(5), delays[0]);
        assert_eq!(Duration::from_secs(10), delays[1]);
        assert_eq!(FALLBACK_INTERVAL, delays[5]);
    }
}
