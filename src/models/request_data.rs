use crate::models::{Measurements, Properties};
use serde::{Deserialize, Serialize};

/// An instance of Request represents completion of an external request to the application to do
/// work and contains a summary of that request execution and the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Schema version
    pub ver: i32,

    /// Identifier of a request call instance.
    pub id: String,

    /// Source of the request, e.g. the caller's correlation id or IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Name of the request, e.g. `GET /values/{id}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Request duration in format: DD.HH:MM:SS.MMMMMM.
    pub duration: String,

    /// Result of a request execution. HTTP status code for HTTP requests.
    pub response_code: String,

    /// Indication of successfull or unsuccessfull call.
    pub success: bool,

    /// Request URL with all query string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Collection of custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}
