use crate::models::{ExceptionDetails, Measurements, Properties, SeverityLevel};
use serde::{Deserialize, Serialize};

/// An instance of Exception represents a handled or unhandled exception that occurred during
/// execution of the monitored application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionData {
    /// Schema version
    pub ver: i32,

    /// Exception chain - list of inner exceptions.
    pub exceptions: Vec<ExceptionDetails>,

    /// Severity level. Mostly used to indicate exception severity level when it is reported by
    /// logging library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_level: Option<SeverityLevel>,

    /// Collection of custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}
