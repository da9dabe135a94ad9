use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct QuickPulseDocument {
    #[serde(rename = "__type")]
    pub(crate) type_: &'static str,
    #[serde(flatten)]
    pub(crate) document_type: QuickPulseDocumentType,
    pub(crate) version: &'static str,
    pub(crate) operation_id: String,
    pub(crate) properties: Vec<QuickPulseDocumentProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "DocumentType")]
pub(crate) enum QuickPulseDocumentType {
    #[serde(rename_all = "PascalCase")]
    Event { name: String },
    #[serde(rename_all = "PascalCase")]
    Exception {
        exception: String,
        exception_message: String,
        exception_type: String,
    },
    #[serde(rename_all = "PascalCase")]
    Trace {
        message: String,
        severity_level: String,
    },
    #[serde(rename_all = "PascalCase")]
    Request {
        name: String,
        success: Option<bool>,
        duration: String,
        response_code: String,
        operation_name: String,
    },
    #[serde(rename_all = "PascalCase")]
    RemoteDependency {
        name: String,
        target: String,
        success: Option<bool>,
        duration: String,
        result_code: String,
        command_name: String,
        dependency_type_name: String,
        operation_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuickPulseDocumentProperty {
    pub(crate) key: String,
    pub(crate) value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct QuickPulseMetric {
    pub(crate) name: &'static str,
    pub(crate) value: f64,
    pub(crate) weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct QuickPulseEnvelope {
    pub(crate) documents: Option<Vec<QuickPulseDocument>>,
    pub(crate) instance: String,
    pub(crate) role_name: String,
    pub(crate) instrumentation_key: String,
    pub(crate) invariant_version: u32,
    pub(crate) machine_name: String,
    pub(crate) metrics: Option<Vec<QuickPulseMetric>>,
    pub(crate) stream_id: String,
    pub(crate) timestamp: String,
    pub(crate) version: String,
}
