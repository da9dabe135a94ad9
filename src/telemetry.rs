//! Telemetry items accepted by [`TelemetryClient::track`](crate::TelemetryClient::track).
//!
//! Every item kind carries the same optional extras (custom properties, measurements, an explicit
//! time, context tags and context objects), settable through the `with_*` builder methods.

use crate::{
    convert::to_date_time,
    models::{ExceptionDetails, Measurements, Properties, SeverityLevel},
};
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    error::Error as StdError,
    fmt,
    time::{Duration, SystemTime},
};

/// Ephemeral objects made available to telemetry processors.
///
/// Context objects are never serialized or sent. They only exist to give processors access to
/// values (like the original HTTP request) that are not part of the envelope.
#[derive(Default)]
pub struct ContextObjects(HashMap<String, Box<dyn Any + Send + Sync>>);

impl ContextObjects {
    /// Create an empty set of context objects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object under `key`, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Box::new(value));
    }

    /// Get the object under `key` if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|value| value.downcast_ref())
    }

    /// Whether an object exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no objects.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ContextObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Fields shared by all telemetry kinds.
#[derive(Debug, Default)]
pub struct TelemetryCommon {
    /// Custom properties. Merged over the client's common properties.
    pub properties: Properties,
    /// Custom measurements.
    pub measurements: Measurements,
    /// Time the item was captured. Defaults to the time it is tracked.
    pub time: Option<SystemTime>,
    /// Context tags. Merged over the client's context tags.
    pub tags: BTreeMap<String, String>,
    /// Objects passed to telemetry processors only.
    pub context_objects: ContextObjects,
}

macro_rules! impl_common_builders {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Add a custom property.
                pub fn with_property(
                    mut self,
                    key: impl Into<String>,
                    value: impl Into<String>,
                ) -> Self {
                    self.common.properties.insert(key.into(), value.into());
                    self
                }

                /// Add custom properties.
                pub fn with_properties<K, V>(
                    mut self,
                    properties: impl IntoIterator<Item = (K, V)>,
                ) -> Self
                where
                    K: Into<String>,
                    V: Into<String>,
                {
                    self.common
                        .properties
                        .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
                    self
                }

                /// Add a custom measurement.
                pub fn with_measurement(mut self, key: impl Into<String>, value: f64) -> Self {
                    self.common.measurements.insert(key.into(), value);
                    self
                }

                /// Set the time the item was captured.
                pub fn with_time(mut self, time: SystemTime) -> Self {
                    self.common.time = Some(time);
                    self
                }

                /// Set a context tag, see [`context_tag_keys`](crate::models::context_tag_keys).
                pub fn with_tag(
                    mut self,
                    key: impl Into<String>,
                    value: impl Into<String>,
                ) -> Self {
                    self.common.tags.insert(key.into(), value.into());
                    self
                }

                /// Attach an object for telemetry processors.
                pub fn with_context_object<T: Any + Send + Sync>(
                    mut self,
                    key: impl Into<String>,
                    value: T,
                ) -> Self {
                    self.common.context_objects.insert(key, value);
                    self
                }
            }
        )*
    };
}

/// A custom event.
#[derive(Debug)]
pub struct EventTelemetry {
    /// Event name.
    pub name: String,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl EventTelemetry {
    /// Create an event with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        EventTelemetry {
            name: name.into(),
            common: TelemetryCommon::default(),
        }
    }
}

/// A trace message.
#[derive(Debug)]
pub struct TraceTelemetry {
    /// Trace message.
    pub message: String,
    /// Severity of the message.
    pub severity: Option<SeverityLevel>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl TraceTelemetry {
    /// Create a trace message.
    pub fn new(message: impl Into<String>) -> Self {
        TraceTelemetry {
            message: message.into(),
            severity: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set the severity level.
    pub fn with_severity(mut self, severity: SeverityLevel) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// A metric measurement or pre-aggregated metric.
#[derive(Debug)]
pub struct MetricTelemetry {
    /// Metric name.
    pub name: String,
    /// Metric namespace.
    pub namespace: Option<String>,
    /// Value of a single measurement, or sum of all values of an aggregate.
    pub value: f64,
    /// Number of aggregated measurements.
    pub count: Option<i32>,
    /// Minimum of aggregated measurements.
    pub min: Option<f64>,
    /// Maximum of aggregated measurements.
    pub max: Option<f64>,
    /// Standard deviation of aggregated measurements.
    pub std_dev: Option<f64>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl MetricTelemetry {
    /// Create a single measurement.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        MetricTelemetry {
            name: name.into(),
            namespace: None,
            value,
            count: None,
            min: None,
            max: None,
            std_dev: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Turn the measurement into an aggregate.
    pub fn with_aggregation(mut self, count: i32, min: f64, max: f64, std_dev: f64) -> Self {
        self.count = Some(count);
        self.min = Some(min);
        self.max = Some(max);
        self.std_dev = Some(std_dev);
        self
    }

    /// Set the metric namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// A handled or unhandled exception.
#[derive(Debug)]
pub struct ExceptionTelemetry {
    /// Exception chain, outermost first.
    pub exceptions: Vec<ExceptionDetails>,
    /// Severity of the exception.
    pub severity: Option<SeverityLevel>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl ExceptionTelemetry {
    /// Create an exception from a type name and message.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionTelemetry {
            exceptions: vec![ExceptionDetails {
                type_name: type_name.into(),
                message: message.into(),
                has_full_stack: false,
                stack: None,
            }],
            severity: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Create an exception from an error and its chain of sources.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let mut exceptions = vec![ExceptionDetails {
            type_name: std::any::type_name::<E>().into(),
            message: error.to_string(),
            has_full_stack: false,
            stack: None,
        }];
        let mut source = error.source();
        while let Some(err) = source {
            exceptions.push(ExceptionDetails {
                type_name: "Error".into(),
                message: err.to_string(),
                has_full_stack: false,
                stack: None,
            });
            source = err.source();
        }
        ExceptionTelemetry {
            exceptions,
            severity: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set a stack trace on the outermost exception.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        if let Some(outer) = self.exceptions.first_mut() {
            outer.stack = Some(stack.into());
            outer.has_full_stack = true;
        }
        self
    }

    /// Set the severity level.
    pub fn with_severity(mut self, severity: SeverityLevel) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// An outgoing call to a remote component.
#[derive(Debug)]
pub struct DependencyTelemetry {
    /// Low cardinality name of the call, e.g. `GET /users/{id}`.
    pub name: String,
    /// Command of the call, e.g. the full URL or SQL statement.
    pub data: Option<String>,
    /// Target of the call. Derived from `data` when it is a URL and no target is set.
    pub target: Option<String>,
    /// Duration of the call.
    pub duration: Duration,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result code, e.g. the HTTP status code.
    pub result_code: Option<String>,
    /// Type of the dependency, e.g. `HTTP` or `SQL`.
    pub dependency_type_name: Option<String>,
    /// Identifier of the call. Generated when not set.
    pub id: Option<String>,
    /// Correlation id of the called component, from its `request-context` response header.
    pub target_correlation_id: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl DependencyTelemetry {
    /// Create a dependency call.
    pub fn new(name: impl Into<String>, duration: Duration, success: bool) -> Self {
        DependencyTelemetry {
            name: name.into(),
            data: None,
            target: None,
            duration,
            success,
            result_code: None,
            dependency_type_name: None,
            id: None,
            target_correlation_id: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set the command of the call.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the target of the call.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the result code. Accepts numbers and strings.
    pub fn with_result_code(mut self, result_code: impl ToString) -> Self {
        self.result_code = Some(result_code.to_string());
        self
    }

    /// Set the dependency type.
    pub fn with_type(mut self, dependency_type_name: impl Into<String>) -> Self {
        self.dependency_type_name = Some(dependency_type_name.into());
        self
    }

    /// Set the identifier of the call.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the correlation id reported by the called component.
    pub fn with_target_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.target_correlation_id = Some(correlation_id.into());
        self
    }
}

/// An incoming request handled by the application.
#[derive(Debug)]
pub struct RequestTelemetry {
    /// Name of the request, e.g. `GET /users/{id}`.
    pub name: String,
    /// Full URL of the request.
    pub url: Option<String>,
    /// Source of the request, e.g. the caller's correlation id.
    pub source: Option<String>,
    /// Duration of the request.
    pub duration: Duration,
    /// Whether the request succeeded.
    pub success: bool,
    /// Response code, e.g. the HTTP status code.
    pub result_code: String,
    /// Identifier of the request. Generated when not set.
    pub id: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl RequestTelemetry {
    /// Create a request.
    pub fn new(
        name: impl Into<String>,
        duration: Duration,
        result_code: impl ToString,
        success: bool,
    ) -> Self {
        RequestTelemetry {
            name: name.into(),
            url: None,
            source: None,
            duration,
            success,
            result_code: result_code.to_string(),
            id: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set the request URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the source of the request.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the identifier of the request.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A page view.
#[derive(Debug)]
pub struct PageViewTelemetry {
    /// Page name.
    pub name: String,
    /// Page URL.
    pub url: Option<String>,
    /// Time it took to load the page.
    pub duration: Option<Duration>,
    /// Identifier of the page view.
    pub id: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl PageViewTelemetry {
    /// Create a page view.
    pub fn new(name: impl Into<String>) -> Self {
        PageViewTelemetry {
            name: name.into(),
            url: None,
            duration: None,
            id: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set the page URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the load duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// The result of an availability test.
#[derive(Debug)]
pub struct AvailabilityTelemetry {
    /// Identifier of the test run. Generated when not set.
    pub id: Option<String>,
    /// Name of the test.
    pub name: String,
    /// Duration of the test run.
    pub duration: Duration,
    /// Whether the test succeeded.
    pub success: bool,
    /// Location the test ran from.
    pub run_location: Option<String>,
    /// Diagnostic message.
    pub message: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl AvailabilityTelemetry {
    /// Create an availability result.
    pub fn new(name: impl Into<String>, duration: Duration, success: bool) -> Self {
        AvailabilityTelemetry {
            id: None,
            name: name.into(),
            duration,
            success,
            run_location: None,
            message: None,
            common: TelemetryCommon::default(),
        }
    }

    /// Set the identifier of the test run.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the location the test ran from.
    pub fn with_run_location(mut self, run_location: impl Into<String>) -> Self {
        self.run_location = Some(run_location.into());
        self
    }

    /// Set a diagnostic message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl_common_builders!(
    EventTelemetry,
    TraceTelemetry,
    MetricTelemetry,
    ExceptionTelemetry,
    DependencyTelemetry,
    RequestTelemetry,
    PageViewTelemetry,
    AvailabilityTelemetry,
);

/// Kind of a telemetry item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryType {
    /// [`EventTelemetry`]
    Event,
    /// [`TraceTelemetry`]
    Trace,
    /// [`MetricTelemetry`]
    Metric,
    /// [`ExceptionTelemetry`]
    Exception,
    /// [`DependencyTelemetry`]
    Dependency,
    /// [`RequestTelemetry`]
    Request,
    /// [`PageViewTelemetry`]
    PageView,
    /// [`AvailabilityTelemetry`]
    Availability,
}

impl TelemetryType {
    /// Value of `data.baseType` for this kind.
    pub fn base_type(&self) -> &'static str {
        match self {
            TelemetryType::Event => "EventData",
            TelemetryType::Trace => "MessageData",
            TelemetryType::Metric => "MetricData",
            TelemetryType::Exception => "ExceptionData",
            TelemetryType::Dependency => "RemoteDependencyData",
            TelemetryType::Request => "RequestData",
            TelemetryType::PageView => "PageViewData",
            TelemetryType::Availability => "AvailabilityData",
        }
    }

    /// Initial value of the envelope `name` for this kind.
    pub fn envelope_name(&self) -> &'static str {
        match self {
            TelemetryType::Event => "Microsoft.ApplicationInsights.Event",
            TelemetryType::Trace => "Microsoft.ApplicationInsights.Message",
            TelemetryType::Metric => "Microsoft.ApplicationInsights.Metric",
            TelemetryType::Exception => "Microsoft.ApplicationInsights.Exception",
            TelemetryType::Dependency => "Microsoft.ApplicationInsights.RemoteDependency",
            TelemetryType::Request => "Microsoft.ApplicationInsights.Request",
            TelemetryType::PageView => "Microsoft.ApplicationInsights.PageView",
            TelemetryType::Availability => "Microsoft.ApplicationInsights.Availability",
        }
    }
}

/// Any telemetry item.
#[derive(Debug)]
pub enum Telemetry {
    /// Custom event.
    Event(EventTelemetry),
    /// Trace message.
    Trace(TraceTelemetry),
    /// Metric.
    Metric(MetricTelemetry),
    /// Exception.
    Exception(ExceptionTelemetry),
    /// Outgoing dependency call.
    Dependency(DependencyTelemetry),
    /// Incoming request.
    Request(RequestTelemetry),
    /// Page view.
    PageView(PageViewTelemetry),
    /// Availability test result.
    Availability(AvailabilityTelemetry),
}

impl Telemetry {
    /// Kind of this item.
    pub fn kind(&self) -> TelemetryType {
        match self {
            Telemetry::Event(_) => TelemetryType::Event,
            Telemetry::Trace(_) => TelemetryType::Trace,
            Telemetry::Metric(_) => TelemetryType::Metric,
            Telemetry::Exception(_) => TelemetryType::Exception,
            Telemetry::Dependency(_) => TelemetryType::Dependency,
            Telemetry::Request(_) => TelemetryType::Request,
            Telemetry::PageView(_) => TelemetryType::PageView,
            Telemetry::Availability(_) => TelemetryType::Availability,
        }
    }

    /// Shared fields of this item.
    pub fn common(&self) -> &TelemetryCommon {
        match self {
            Telemetry::Event(item) => &item.common,
            Telemetry::Trace(item) => &item.common,
            Telemetry::Metric(item) => &item.common,
            Telemetry::Exception(item) => &item.common,
            Telemetry::Dependency(item) => &item.common,
            Telemetry::Request(item) => &item.common,
            Telemetry::PageView(item) => &item.common,
            Telemetry::Availability(item) => &item.common,
        }
    }

    /// Checks the item can be represented on the wire.
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.common().measurements.values().any(|v| !v.is_finite()) {
            return Err("measurement is not a finite number");
        }
        if let Some(time) = self.common().time {
            if to_date_time(time).is_none() {
                return Err("time is out of range");
            }
        }
        match self {
            Telemetry::Metric(metric) if !metric.value.is_finite() => {
                Err("metric value is not a finite number")
            }
            Telemetry::Metric(metric) if metric.name.trim().is_empty() => {
                Err("metric name is empty")
            }
            Telemetry::Exception(exception) if exception.exceptions.is_empty() => {
                Err("exception has no details")
            }
            _ => Ok(()),
        }
    }
}

macro_rules! impl_from_item {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Telemetry {
                fn from(item: $ty) -> Self {
                    Telemetry::$variant(item)
                }
            }
        )*
    };
}

impl_from_item!(
    Event(EventTelemetry),
    Trace(TraceTelemetry),
    Metric(MetricTelemetry),
    Exception(ExceptionTelemetry),
    Dependency(DependencyTelemetry),
    Request(RequestTelemetry),
    PageView(PageViewTelemetry),
    Availability(AvailabilityTelemetry),
);
