use crate::models::{Measurements, Properties};
use serde::{Deserialize, Serialize};

/// An instance of Remote Dependency represents an interaction of the monitored component with a
/// remote component/service like SQL or an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDependencyData {
    /// Schema version
    pub ver: i32,

    /// Name of the command initiated with this dependency call. Low cardinality value.
    pub name: String,

    /// Identifier of a dependency call instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Result code of a dependency call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,

    /// Request duration in format: DD.HH:MM:SS.MMMMMM.
    pub duration: String,

    /// Indication of successfull or unsuccessfull call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Command initiated by this dependency call, e.g. the full URL or a SQL statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Target site of a dependency call, e.g. server name or host address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Dependency type name, e.g. "SQL" or "HTTP".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Collection of custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Measurements>,
}
