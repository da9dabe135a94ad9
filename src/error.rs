use crate::connection_string::ParseError;
use std::{error::Error as StdError, fmt::Debug, time::Duration};

/// Errors that occurred while building a client or delivering telemetry.
///
/// Only construction returns these to the caller. Failures while tracking or delivering telemetry
/// are logged through [`tracing`] and otherwise absorbed.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Application Insights telemetry data failed to serialize to JSON. Telemetry reporting failed
    /// because of this.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing upload request failed with {0}")]
    UploadSerializeRequest(serde_json::Error),

    /// Application Insights telemetry data failed to compress. Telemetry reporting failed because
    /// of this.
    #[error("compressing upload request failed with {0}")]
    UploadCompressRequest(std::io::Error),

    /// Application Insights telemetry response failed to deserialize from JSON.
    ///
    /// Telemetry reporting may have worked. But since we could not look into the response, we
    /// can't be sure.
    #[error("deserializing upload response failed with {0}")]
    UploadDeserializeResponse(serde_json::Error),

    /// Could not complete the HTTP request to Application Insights to send telemetry data.
    /// Telemetry reporting failed because of this.
    #[error("sending upload request failed with {0}")]
    UploadConnection(Box<dyn StdError + Send + Sync + 'static>),

    /// The HTTP request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Application Insights rejected the request.
    #[error("upload failed with status code {status_code} (can retry: {can_retry})")]
    Upload {
        /// HTTP status code of the response.
        status_code: u16,
        /// Whether the same payload may be sent again later.
        can_retry: bool,
    },

    /// Reading or writing the offline retry directory failed.
    #[error("offline storage failed with {0}")]
    Storage(std::io::Error),

    /// A persisted batch could not be encoded or decoded.
    #[error("offline storage format error {0}")]
    StorageFormat(serde_json::Error),

    /// The connection string is invalid.
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ParseError),

    /// Neither `APPLICATIONINSIGHTS_CONNECTION_STRING` nor `APPINSIGHTS_INSTRUMENTATIONKEY` is set.
    #[error("no connection string found in the environment")]
    MissingConnectionString,

    /// The client was built outside of a Tokio runtime.
    #[error("a Tokio runtime is required to run background delivery: {0}")]
    NoRuntime(tokio::runtime::TryCurrentError),

    /// The correlation id lookup returned an unusable response.
    #[error("correlation id lookup failed with status code {0}")]
    CorrelationLookup(u16),
}

impl Error {
    /// Whether the failed payload may be sent again later.
    pub(crate) fn can_retry(&self) -> bool {
        match self {
            Error::UploadConnection(_) | Error::Timeout(_) => true,
            Error::Upload { can_retry, .. } => *can_retry,
            _ => false,
        }
    }
}
