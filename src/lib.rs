//! An in-process telemetry agent for [Azure Application Insights].
//!
//! [Azure Application Insights]: https://docs.microsoft.com/en-us/azure/azure-monitor/app/app-insights-overview
//!
//! **Disclaimer**: This is not an official Microsoft product.
//!
//! # Usage
//!
//! Create a [`TelemetryClient`] inside a Tokio runtime and track telemetry with it:
//!
//! ```no_run
//! # #[cfg(feature = "reqwest-client")]
//! # #[tokio::main]
//! # async fn main() -> Result<(), appinsights_agent::Error> {
//! use appinsights_agent::{Config, EventTelemetry, TelemetryClient, TraceTelemetry};
//! use appinsights_agent::models::SeverityLevel;
//!
//! let config = Config::from_env()?.with_role_name("checkout");
//! let client = TelemetryClient::new(config, reqwest::Client::new())?;
//!
//! client.track(EventTelemetry::new("order placed").with_property("items", "3"));
//! client.track(TraceTelemetry::new("cache miss").with_severity(SeverityLevel::Warning));
//!
//! client.flush_and_wait().await;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "reqwest-client"))]
//! # fn main() {}
//! ```
//!
//! Telemetry is buffered and uploaded in batches, either once [`Config::with_max_batch_size`]
//! items are buffered or after [`Config::with_max_batch_interval`], whichever happens first.
//!
//! # Telemetry processors
//!
//! Every envelope passes through the registered [`TelemetryProcessor`]s before it is buffered.
//! Processors can change the envelope or drop it by returning `false`:
//!
//! ```no_run
//! # fn f(client: &appinsights_agent::TelemetryClient) {
//! use appinsights_agent::{models::{context_tag_keys, Envelope}, ContextObjects};
//!
//! client.add_telemetry_processor(|envelope: &mut Envelope, _: &ContextObjects| {
//!     envelope.tags.remove(context_tag_keys::LOCATION_IP);
//!     true
//! });
//! # }
//! ```
//!
//! # Disk retry
//!
//! Batches which fail with a retryable error are written to a directory in the system's
//! temporary directory and resent periodically. When the process is about to exit, use
//! [`FlushOptions::with_app_crashing`] to write buffered telemetry to disk synchronously.
//!
//! # Features
//!
//! - `live-metrics` (default): stream metrics and documents to Live Metrics (QuickPulse). See
//!   [`TelemetryClient::enable_live_metrics`].
//! - `reqwest-client`, `reqwest-client-vendored-tls`, `reqwest-client-rustls`: implement
//!   [`HttpClient`] for `reqwest::Client`.
//!
//! # Diagnostics
//!
//! Internal problems are never returned from tracking methods. They are reported with
//! [`tracing`] events instead.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]

mod channel;
mod client;
mod config;
mod connection_string;
mod context;
mod convert;
mod correlation;
mod envelope_factory;
mod error;
pub mod models;
mod processor;
#[cfg(feature = "live-metrics")]
mod quick_pulse;
mod retry_store;
mod sender;
mod telemetry;
mod uploader;
#[cfg(feature = "live-metrics")]
mod uploader_quick_pulse;

pub use client::{FlushOptions, TelemetryClient};
pub use config::Config;
pub use connection_string::ParseError;
pub use correlation::{
    parse_request_context_app_id, request_context_header_value, REQUEST_CONTEXT_HEADER,
};
pub use error::Error;
pub use opentelemetry_http::HttpClient;
pub use processor::TelemetryProcessor;
#[cfg(feature = "live-metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "live-metrics")))]
pub use quick_pulse::LiveMetricsState;
pub use telemetry::{
    AvailabilityTelemetry, ContextObjects, DependencyTelemetry, EventTelemetry,
    ExceptionTelemetry, MetricTelemetry, PageViewTelemetry, RequestTelemetry, Telemetry,
    TelemetryCommon, TelemetryType, TraceTelemetry,
};
