use crate::{connection_string::ConnectionString, models::Properties, Error};
use once_cell::sync::Lazy;
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

const ENV_CONNECTION_STRING: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";
const ENV_INSTRUMENTATION_KEY: &str = "APPINSIGHTS_INSTRUMENTATIONKEY";

static STORAGE_BASE: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("appinsights-agent"));

/// Configuration of a [`TelemetryClient`](crate::TelemetryClient).
///
/// ```
/// use std::time::Duration;
///
/// let config = appinsights_agent::Config::from_connection_string(
///     "InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://westus2-0.in.applicationinsights.azure.com/",
/// )?
/// .with_max_batch_size(100)
/// .with_max_batch_interval(Duration::from_secs(5))
/// .with_role_name("checkout");
/// # Ok::<(), appinsights_agent::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) connection_string: ConnectionString,
    pub(crate) sample_rate: f64,
    pub(crate) max_batch_size: usize,
    pub(crate) max_batch_interval: Duration,
    pub(crate) transmit_timeout: Duration,
    pub(crate) disk_retry: DiskRetryConfig,
    pub(crate) live_metrics: LiveMetricsConfig,
    pub(crate) correlation: CorrelationConfig,
    pub(crate) role_name: Option<String>,
    pub(crate) role_instance: Option<String>,
    pub(crate) common_properties: Properties,
    pub(crate) tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DiskRetryConfig {
    pub(crate) enabled: bool,
    pub(crate) resend_interval: Duration,
    pub(crate) max_bytes_on_disk: u64,
    pub(crate) directory: Option<PathBuf>,
}

#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "live-metrics"), allow(dead_code))]
pub(crate) struct LiveMetricsConfig {
    pub(crate) enabled: bool,
    pub(crate) ping_interval: Duration,
    pub(crate) post_interval: Duration,
    pub(crate) stream_id: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CorrelationConfig {
    pub(crate) endpoint: Option<http::Uri>,
    pub(crate) timeout: Duration,
    pub(crate) cooldown: Duration,
    pub(crate) cache_unresolvable: bool,
}

impl Config {
    /// Configuration for a connection string like
    /// `InstrumentationKey=...;IngestionEndpoint=https://...`.
    ///
    /// A bare instrumentation key is accepted too and uses the global endpoints.
    pub fn from_connection_string(connection_string: impl AsRef<str>) -> Result<Self, Error> {
        let connection_string = ConnectionString::parse_setup_string(connection_string.as_ref())?;
        Ok(Self::new(connection_string))
    }

    /// Configuration for an instrumentation key using the global endpoints.
    pub fn from_instrumentation_key(instrumentation_key: impl Into<String>) -> Self {
        Self::new(ConnectionString::from_instrumentation_key(
            instrumentation_key,
        ))
    }

    /// Configuration from the environment.
    ///
    /// Reads the connection string from `APPLICATIONINSIGHTS_CONNECTION_STRING` and falls back to
    /// the instrumentation key in `APPINSIGHTS_INSTRUMENTATIONKEY`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let setup = [ENV_CONNECTION_STRING, ENV_INSTRUMENTATION_KEY]
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|value| !value.trim().is_empty())
            .ok_or(Error::MissingConnectionString)?;
        Self::from_connection_string(setup)
    }

    fn new(connection_string: ConnectionString) -> Self {
        Config {
            connection_string,
            sample_rate: 100.0,
            max_batch_size: 250,
            max_batch_interval: Duration::from_secs(15),
            transmit_timeout: Duration::from_secs(30),
            disk_retry: DiskRetryConfig {
                enabled: true,
                resend_interval: Duration::from_secs(60),
                max_bytes_on_disk: 50 * 1024 * 1024,
                directory: None,
            },
            live_metrics: LiveMetricsConfig {
                enabled: false,
                ping_interval: Duration::from_secs(5),
                post_interval: Duration::from_secs(1),
                stream_id: None,
            },
            correlation: CorrelationConfig {
                endpoint: None,
                timeout: Duration::from_millis(2500),
                cooldown: Duration::from_secs(30),
                cache_unresolvable: false,
            },
            role_name: None,
            role_instance: None,
            common_properties: Properties::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Instrumentation key telemetry is sent with.
    pub fn instrumentation_key(&self) -> &str {
        &self.connection_string.instrumentation_key
    }

    /// Base URL of the ingestion service.
    pub fn ingestion_endpoint(&self) -> &http::Uri {
        &self.connection_string.ingestion_endpoint
    }

    /// Base URL of the live metrics service.
    pub fn live_endpoint(&self) -> &http::Uri {
        &self.connection_string.live_endpoint
    }

    /// Set sample rate, which is passed through to Application Insights. It should be a value
    /// between 0 and 1.
    ///
    /// Default: 1.0
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        // Application Insights expects the sample rate as a percentage.
        self.sample_rate = sample_rate * 100.0;
        self
    }

    /// Number of buffered envelopes that triggers an immediate send.
    ///
    /// Default: 250
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Longest time an envelope waits in the buffer.
    ///
    /// Default: 15 seconds
    pub fn with_max_batch_interval(mut self, max_batch_interval: Duration) -> Self {
        self.max_batch_interval = max_batch_interval;
        self
    }

    /// Upper bound for a single upload request. Timed out uploads are retried.
    ///
    /// Default: 30 seconds
    pub fn with_transmit_timeout(mut self, transmit_timeout: Duration) -> Self {
        self.transmit_timeout = transmit_timeout;
        self
    }

    /// Whether batches that failed with a retryable error are stored on disk and sent again
    /// later.
    ///
    /// Default: true
    pub fn with_disk_retry(mut self, enabled: bool) -> Self {
        self.disk_retry.enabled = enabled;
        self
    }

    /// How often stored batches are sent again.
    ///
    /// Default: 60 seconds
    pub fn with_resend_interval(mut self, resend_interval: Duration) -> Self {
        self.disk_retry.resend_interval = resend_interval;
        self
    }

    /// Disk quota for stored batches. The oldest batches are evicted when it is exceeded.
    ///
    /// Default: 50 MiB
    pub fn with_max_bytes_on_disk(mut self, max_bytes_on_disk: u64) -> Self {
        self.disk_retry.max_bytes_on_disk = max_bytes_on_disk;
        self
    }

    /// Directory for stored batches.
    ///
    /// Default: `<temp dir>/appinsights-agent/<instrumentation key>`
    pub fn with_storage_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.disk_retry.directory = Some(directory.into());
        self
    }

    /// Enable live metrics.
    ///
    /// Default: false
    pub fn with_live_metrics(mut self, enabled: bool) -> Self {
        self.live_metrics.enabled = enabled;
        self
    }

    /// Live metrics intervals while nobody is watching (`ping`) and while a viewer is subscribed
    /// (`post`).
    ///
    /// Default: 5 seconds and 1 second
    pub fn with_live_metrics_intervals(mut self, ping: Duration, post: Duration) -> Self {
        self.live_metrics.ping_interval = ping;
        self.live_metrics.post_interval = post;
        self
    }

    /// Identifier of the live metrics stream. A random one is generated for every session by
    /// default.
    pub fn with_live_metrics_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.live_metrics.stream_id = Some(stream_id.into());
        self
    }

    /// Endpoint queried for the application id. Defaults to the ingestion endpoint.
    pub fn with_correlation_endpoint(mut self, endpoint: http::Uri) -> Self {
        self.correlation.endpoint = Some(endpoint);
        self
    }

    /// Upper bound for a single application id lookup.
    ///
    /// Default: 2.5 seconds
    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation.timeout = timeout;
        self
    }

    /// Minimum time between two failed application id lookups for the same key.
    ///
    /// Default: 30 seconds
    pub fn with_correlation_cooldown(mut self, cooldown: Duration) -> Self {
        self.correlation.cooldown = cooldown;
        self
    }

    /// Whether an application id lookup that failed is never tried again.
    ///
    /// Default: false
    pub fn with_cache_unresolvable_correlation(mut self, cache_unresolvable: bool) -> Self {
        self.correlation.cache_unresolvable = cache_unresolvable;
        self
    }

    /// Cloud role name, sent as `ai.cloud.role` and shown on the application map.
    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    /// Cloud role instance, sent as `ai.cloud.roleInstance`. Defaults to the machine name.
    pub fn with_role_instance(mut self, role_instance: impl Into<String>) -> Self {
        self.role_instance = Some(role_instance.into());
        self
    }

    /// Property added to every telemetry item. Item properties with the same key win.
    pub fn with_common_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.common_properties.insert(key.into(), value.into());
        self
    }

    /// Context tag added to every telemetry item. Item tags with the same key win.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub(crate) fn storage_directory(&self) -> PathBuf {
        self.disk_retry.directory.clone().unwrap_or_else(|| {
            let key: String = self
                .instrumentation_key()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect();
            STORAGE_BASE.join(key)
        })
    }

    pub(crate) fn correlation_endpoint(&self) -> &http::Uri {
        self.correlation
            .endpoint
            .as_ref()
            .unwrap_or(&self.connection_string.ingestion_endpoint)
    }
}
