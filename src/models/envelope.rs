use crate::models::Data;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// System variables for a telemetry item.
///
/// This is the unit handed to telemetry processors, buffered by the delivery channel and
/// transmitted (as a JSON array of envelopes) to the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Type name of the telemetry item, e.g. `Microsoft.ApplicationInsights.Event`.
    ///
    /// Computed once when the envelope is created. Processors may overwrite it.
    pub name: String,

    /// Event date time when telemetry item was created, in ISO 8601 format.
    pub time: String,

    /// Sampling rate used in application. This telemetry item represents 100 / sampleRate actual
    /// telemetry items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,

    /// The instrumentation key of the Application Insights resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_key: Option<String>,

    /// Key/value collection of context properties. See
    /// [`context_tag_keys`](crate::models::context_tag_keys) for well-known keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Telemetry data item.
    pub data: Data,
}
