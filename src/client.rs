use crate::{
    channel::{Channel, FlushCallback},
    config::Config,
    connection_string::ParseError,
    context,
    correlation::CorrelationResolver,
    envelope_factory::{create_envelope, EnvelopeContext},
    models::{Properties, Sanitize as _},
    processor::{ProcessorPipeline, TelemetryProcessor},
    retry_store::RetryStore,
    sender::{DiskRetrySettings, Sender},
    telemetry::{
        AvailabilityTelemetry, DependencyTelemetry, EventTelemetry, ExceptionTelemetry,
        MetricTelemetry, PageViewTelemetry, RequestTelemetry, Telemetry, TraceTelemetry,
    },
    uploader::append_path,
    Error,
};
#[cfg(feature = "live-metrics")]
use crate::quick_pulse::{LiveMetricsState, QuickPulseManager, QuickPulseSettings};
use http::Uri;
use opentelemetry_http::HttpClient;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::runtime::Handle;

/// Options for [`TelemetryClient::flush`].
#[derive(Default)]
pub struct FlushOptions {
    callback: Option<FlushCallback>,
    is_app_crashing: bool,
}

impl FlushOptions {
    /// Flush buffered telemetry by uploading it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the flush has been handled: the batch was delivered, stored for a later retry
    /// or dropped.
    pub fn with_callback(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The process is about to exit. Buffered telemetry is written to the retry directory
    /// synchronously instead of being uploaded.
    pub fn with_app_crashing(mut self, is_app_crashing: bool) -> Self {
        self.is_app_crashing = is_app_crashing;
        self
    }
}

impl fmt::Debug for FlushOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushOptions")
            .field("callback", &self.callback.is_some())
            .field("is_app_crashing", &self.is_app_crashing)
            .finish()
    }
}

/// Tracks telemetry and delivers it to Application Insights.
///
/// Background work (batch timer, retry sweep, live metrics, correlation lookups) runs on the
/// Tokio runtime the client was created in. Tracking methods are synchronous, never block and
/// never fail; problems are reported through [`tracing`].
///
/// ```no_run
/// # async fn f(http_client: impl appinsights_agent::HttpClient + 'static) -> Result<(), appinsights_agent::Error> {
/// use appinsights_agent::{Config, EventTelemetry, TelemetryClient};
///
/// let config = Config::from_env()?;
/// let client = TelemetryClient::new(config, http_client)?;
/// client.track(EventTelemetry::new("checkout").with_property("cart", "42"));
/// client.flush_and_wait().await;
/// # Ok(()) }
/// ```
pub struct TelemetryClient {
    instrumentation_key: String,
    sample_rate: f64,
    tags: BTreeMap<String, String>,
    common_properties: RwLock<Properties>,
    processors: ProcessorPipeline,
    channel: Arc<Channel>,
    correlation: Arc<CorrelationResolver>,
    correlation_endpoint: Uri,
    #[cfg(feature = "live-metrics")]
    quick_pulse: QuickPulseManager,
}

impl TelemetryClient {
    /// Create a client. Must be called from within a Tokio runtime.
    pub fn new<C: HttpClient + 'static>(config: Config, http_client: C) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(Error::NoRuntime)?;
        let http_client: Arc<dyn HttpClient> = Arc::new(http_client);

        let track_endpoint = append_path(config.ingestion_endpoint(), "v2/track")
            .map_err(ParseError::InvalidEndpoint)?;
        let sender = Sender::new(
            http_client.clone(),
            track_endpoint,
            config.transmit_timeout,
            RetryStore::new(config.storage_directory()),
            DiskRetrySettings {
                enabled: config.disk_retry.enabled,
                resend_interval: config.disk_retry.resend_interval,
                max_bytes_on_disk: config.disk_retry.max_bytes_on_disk,
            },
            runtime.clone(),
        );
        let channel = Channel::new(
            sender,
            config.max_batch_size,
            config.max_batch_interval,
            runtime.clone(),
        );

        let correlation = Arc::new(CorrelationResolver::new(
            http_client.clone(),
            config.correlation.timeout,
            config.correlation.cooldown,
            config.correlation.cache_unresolvable,
        ));
        let correlation_endpoint = config.correlation_endpoint().clone();
        let instrumentation_key = config.instrumentation_key().to_string();
        {
            let correlation = correlation.clone();
            let endpoint = correlation_endpoint.clone();
            let instrumentation_key = instrumentation_key.clone();
            runtime.spawn(async move {
                correlation.resolve(&endpoint, &instrumentation_key).await;
            });
        }

        let role_instance = config
            .role_instance
            .clone()
            .unwrap_or_else(context::machine_name);
        let tags = context::default_tags(config.role_name.as_deref(), &role_instance, &config.tags);

        #[cfg(feature = "live-metrics")]
        let quick_pulse = {
            let quick_pulse = QuickPulseManager::new(
                http_client,
                QuickPulseSettings {
                    endpoint: config.live_endpoint().clone(),
                    instrumentation_key: instrumentation_key.clone(),
                    ping_interval: config.live_metrics.ping_interval,
                    post_interval: config.live_metrics.post_interval,
                    machine_name: context::machine_name(),
                    instance: role_instance,
                    role_name: config.role_name.clone().unwrap_or_default(),
                    version: context::SDK_VERSION.to_string(),
                    stream_id: config.live_metrics.stream_id.clone(),
                },
                runtime,
            );
            quick_pulse.enable(config.live_metrics.enabled);
            quick_pulse
        };
        #[cfg(not(feature = "live-metrics"))]
        if config.live_metrics.enabled {
            tracing::warn!("Live metrics requested but the live-metrics feature is disabled");
        }

        Ok(TelemetryClient {
            instrumentation_key,
            sample_rate: config.sample_rate,
            tags,
            common_properties: RwLock::new(config.common_properties),
            processors: ProcessorPipeline::default(),
            channel,
            correlation,
            correlation_endpoint,
            #[cfg(feature = "live-metrics")]
            quick_pulse,
        })
    }

    /// Instrumentation key telemetry is sent with.
    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    /// Track a telemetry item.
    ///
    /// The item is turned into an envelope, passed through the telemetry processors and buffered.
    /// Items that cannot be represented (like metrics with a non-finite value) are dropped.
    pub fn track(&self, item: impl Into<Telemetry>) {
        let item = item.into();
        let correlation_id = self
            .correlation
            .peek(&self.correlation_endpoint, &self.instrumentation_key);
        let envelope = {
            let common_properties = match self.common_properties.read() {
                Ok(properties) => properties,
                Err(poisoned) => poisoned.into_inner(),
            };
            create_envelope(
                &item,
                &EnvelopeContext {
                    instrumentation_key: &self.instrumentation_key,
                    sample_rate: self.sample_rate,
                    tags: &self.tags,
                    common_properties: &common_properties,
                    correlation_id: correlation_id.as_deref(),
                },
            )
        };
        let mut envelope = match envelope {
            Some(envelope) => envelope,
            None => return,
        };

        if !self
            .processors
            .run(&mut envelope, &item.common().context_objects)
        {
            return;
        }
        envelope.sanitize();

        #[cfg(feature = "live-metrics")]
        self.quick_pulse.forward(&envelope);
        self.channel.send(envelope);
    }

    /// Track a custom event.
    pub fn track_event(&self, event: EventTelemetry) {
        self.track(event)
    }

    /// Track a trace message.
    pub fn track_trace(&self, trace: TraceTelemetry) {
        self.track(trace)
    }

    /// Track a metric.
    pub fn track_metric(&self, metric: MetricTelemetry) {
        self.track(metric)
    }

    /// Track an exception.
    pub fn track_exception(&self, exception: ExceptionTelemetry) {
        self.track(exception)
    }

    /// Track an outgoing call.
    pub fn track_dependency(&self, dependency: DependencyTelemetry) {
        self.track(dependency)
    }

    /// Track an incoming request.
    pub fn track_request(&self, request: RequestTelemetry) {
        self.track(request)
    }

    /// Track a page view.
    pub fn track_page_view(&self, page_view: PageViewTelemetry) {
        self.track(page_view)
    }

    /// Track the result of an availability test.
    pub fn track_availability(&self, availability: AvailabilityTelemetry) {
        self.track(availability)
    }

    /// Append a telemetry processor. Processors run in the order they were added.
    pub fn add_telemetry_processor(&self, processor: impl TelemetryProcessor) {
        self.processors.add(Arc::new(processor));
    }

    /// Remove all telemetry processors.
    pub fn clear_telemetry_processors(&self) {
        self.processors.clear();
    }

    /// Send buffered telemetry now, regardless of batch size and interval.
    pub fn flush(&self, options: FlushOptions) {
        self.channel
            .trigger_send(options.is_app_crashing, options.callback);
    }

    /// Send buffered telemetry now and wait until it was delivered, stored for retry or dropped.
    pub async fn flush_and_wait(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.flush(FlushOptions::new().with_callback(move || {
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }

    /// Set a property added to every telemetry item tracked afterwards.
    pub fn set_common_property(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut properties = match self.common_properties.write() {
            Ok(properties) => properties,
            Err(poisoned) => poisoned.into_inner(),
        };
        properties.insert(key.into(), value.into());
    }

    /// Turn disk retry on or off and optionally change its settings. Only affects future
    /// failures; batches already stored stay on disk.
    pub fn set_use_disk_retry_caching(
        &self,
        enabled: bool,
        resend_interval: Option<Duration>,
        max_bytes_on_disk: Option<u64>,
    ) {
        self.channel
            .sender()
            .set_disk_retry(enabled, resend_interval, max_bytes_on_disk);
    }

    /// Start or stop live metrics. Starting again begins a new session.
    #[cfg(feature = "live-metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "live-metrics")))]
    pub fn enable_live_metrics(&self, enabled: bool) {
        self.quick_pulse.enable(enabled);
    }

    /// Current state of live metrics.
    #[cfg(feature = "live-metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "live-metrics")))]
    pub fn live_metrics_state(&self) -> LiveMetricsState {
        self.quick_pulse.state()
    }

    /// Correlation id of this client's instrumentation key, like `cid-v1:<application id>`.
    ///
    /// Looked up once and cached. `None` while the lookup fails.
    pub async fn correlation_id(&self) -> Option<String> {
        self.correlation
            .resolve(&self.correlation_endpoint, &self.instrumentation_key)
            .await
    }

    /// Correlation id of any instrumentation key. Concurrent calls for the same key share one
    /// lookup.
    pub async fn resolve_correlation_id(
        &self,
        endpoint: &Uri,
        instrumentation_key: &str,
    ) -> Option<String> {
        self.correlation.resolve(endpoint, instrumentation_key).await
    }

    /// Send buffered telemetry and stop all timers and background tasks of this client.
    pub fn shutdown(&self) {
        self.channel.trigger_send(false, None);
        self.channel.shutdown();
        #[cfg(feature = "live-metrics")]
        self.quick_pulse.enable(false);
    }
}

impl fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("instrumentation_key", &self.instrumentation_key)
            .field("sample_rate", &self.sample_rate)
            .field("channel", &self.channel)
            .field("processors", &self.processors)
            .finish()
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
