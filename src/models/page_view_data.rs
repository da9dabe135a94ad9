use crate::models::{Measurements, Properties};
use serde::{Deserialize, Serialize};

/// An instance of PageView represents a generic action on a page like a button click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewData {
    /// Schema version
    pub ver: i32,

    /// Identifier of a page view instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event name.
    pub name: String,

    /// Request URL with all query string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Request duration in format: DD.HH:MM:SS.MMMMMM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Collection of custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}
