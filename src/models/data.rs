use crate::models::{
    AvailabilityData, EventData, ExceptionData, MessageData, MetricData, PageViewData,
    RemoteDependencyData, RequestData,
};
use serde::{Deserialize, Serialize};

/// Data struct to contain both B and C sections.
///
/// Serialized as `{"baseType": "...", "baseData": {...}}`, so the base type always matches the
/// shape of the base data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum Data {
    /// Custom event.
    #[serde(rename = "EventData")]
    Event(EventData),
    /// Handled or unhandled exception.
    #[serde(rename = "ExceptionData")]
    Exception(ExceptionData),
    /// Trace message.
    #[serde(rename = "MessageData")]
    Message(MessageData),
    /// Metric measurement or aggregation.
    #[serde(rename = "MetricData")]
    Metric(MetricData),
    /// Outgoing call to a remote component.
    #[serde(rename = "RemoteDependencyData")]
    RemoteDependency(RemoteDependencyData),
    /// Incoming request.
    #[serde(rename = "RequestData")]
    Request(RequestData),
    /// Page view.
    #[serde(rename = "PageViewData")]
    PageView(PageViewData),
    /// Availability test result.
    #[serde(rename = "AvailabilityData")]
    Availability(AvailabilityData),
}
