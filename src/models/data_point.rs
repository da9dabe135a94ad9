use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Metric data single measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// Namespace of the metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,

    /// Name of the metric.
    pub name: String,

    /// Metric type. Single measurement or the aggregated value.
    pub kind: DataPointType,

    /// Single value for measurement. Sum of individual measurements for the aggregation.
    pub value: f64,

    /// Metric weight of the aggregated metric. Should not be set for a measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,

    /// Minimum value of the aggregated metric. Should not be set for a measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum value of the aggregated metric. Should not be set for a measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Standard deviation of the aggregated metric. Should not be set for a measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

/// Type of the metric data measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DataPointType {
    /// Single measurement.
    Measurement = 0,
    /// Pre-aggregated value with count, min, max and standard deviation.
    Aggregation = 1,
}
