use crate::models::{Measurements, Properties};
use serde::{Deserialize, Serialize};

/// Instances of AvailabilityData represent the result of executing an availability test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityData {
    /// Schema version
    pub ver: i32,

    /// Identifier of a test run.
    pub id: String,

    /// Name of the test that these availability results represent.
    pub name: String,

    /// Duration in format: DD.HH:MM:SS.MMMMMM.
    pub duration: String,

    /// Success flag.
    pub success: bool,

    /// Name of the location where the test was run from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_location: Option<String>,

    /// Diagnostic message for the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Collection of custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}
