use crate::{models::Envelope, Error};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use http::{Request, Response, Uri};
use opentelemetry_http::HttpClient;
use serde::Deserialize;
use std::{io::Write, time::Duration};

const STATUS_OK: u16 = 200;
const STATUS_PARTIAL_CONTENT: u16 = 206;
const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_APPLICATION_INACTIVE: u16 = 439; // Quota
const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;
const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transmission {
    items_received: usize,
    items_accepted: usize,
    #[serde(default)]
    errors: Vec<TransmissionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransmissionItem {
    index: usize,
    status_code: u16,
    #[serde(default)]
    message: Option<String>,
}

/// Result of an upload the service answered.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Delivery {
    /// Indices of rejected items that may be sent again.
    pub(crate) retry: Vec<usize>,
    /// Number of rejected items that must not be sent again.
    pub(crate) dropped: usize,
}

/// Sends telemetry items to the server.
pub(crate) async fn send(
    client: &dyn HttpClient,
    endpoint: &Uri,
    items: &[Envelope],
    timeout: Duration,
) -> Result<Delivery, Error> {
    if items.is_empty() {
        return Ok(Delivery::default());
    }
    let payload = serialize_envelopes(items)?;

    let request = Request::post(endpoint)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::CONTENT_ENCODING, "gzip")
        .body(Bytes::from(payload))
        .map_err(|err| Error::UploadConnection(err.into()))?;

    let response = tokio::time::timeout(timeout, client.send_bytes(request))
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(Error::UploadConnection)?;
    handle_response(response)
}

pub(crate) fn serialize_envelopes(items: &[Envelope]) -> Result<Vec<u8>, Error> {
    let serialized = serde_json::to_vec(items).map_err(Error::UploadSerializeRequest)?;
    serialize_request_body(&serialized)
}

pub(crate) fn serialize_request_body(serialized: &[u8]) -> Result<Vec<u8>, Error> {
    let mut gzip_encoder = GzEncoder::new(Vec::new(), Compression::default());
    gzip_encoder
        .write_all(serialized)
        .map_err(Error::UploadCompressRequest)?;
    gzip_encoder.finish().map_err(Error::UploadCompressRequest)
}

fn handle_response(response: Response<Bytes>) -> Result<Delivery, Error> {
    match response.status().as_u16() {
        STATUS_OK => Ok(Delivery::default()),
        STATUS_PARTIAL_CONTENT => {
            let content: Transmission = serde_json::from_slice(response.body())
                .map_err(Error::UploadDeserializeResponse)?;
            Ok(partial_delivery(content))
        }
        status @ (STATUS_REQUEST_TIMEOUT
        | STATUS_TOO_MANY_REQUESTS
        | STATUS_APPLICATION_INACTIVE
        | STATUS_SERVICE_UNAVAILABLE) => Err(Error::Upload {
            status_code: status,
            can_retry: true,
        }),
        status @ STATUS_INTERNAL_SERVER_ERROR => {
            match serde_json::from_slice::<Transmission>(response.body()) {
                Ok(content) if !content.errors.is_empty() => Ok(partial_delivery(content)),
                _ => Err(Error::Upload {
                    status_code: status,
                    can_retry: true,
                }),
            }
        }
        status => {
            tracing::debug!(
                status,
                body = %String::from_utf8_lossy(response.body()),
                "Upload rejected"
            );
            Err(Error::Upload {
                status_code: status,
                can_retry: false,
            })
        }
    }
}

fn partial_delivery(content: Transmission) -> Delivery {
    if content.items_received == content.items_accepted {
        return Delivery::default();
    }
    let mut delivery = Delivery::default();
    for item in content.errors {
        if can_retry_item(&item) {
            delivery.retry.push(item.index);
        } else {
            tracing::debug!(
                index = item.index,
                status = item.status_code,
                message = item.message.as_deref().unwrap_or_default(),
                "Item rejected"
            );
            delivery.dropped += 1;
        }
    }
    delivery.retry.sort_unstable();
    delivery.retry.dedup();
    delivery
}

/// Determines that a telemetry item can be re-send corresponding to this submission status
/// descriptor.
fn can_retry_item(item: &TransmissionItem) -> bool {
    item.status_code == STATUS_PARTIAL_CONTENT
        || item.status_code == STATUS_REQUEST_TIMEOUT
        || item.status_code == STATUS_TOO_MANY_REQUESTS
        || item.status_code == STATUS_APPLICATION_INACTIVE
        || item.status_code == STATUS_INTERNAL_SERVER_ERROR
        || item.status_code == STATUS_SERVICE_UNAVAILABLE
}

pub(crate) fn append_path(uri: &Uri, path: &str) -> Result<Uri, http::uri::InvalidUri> {
    format!(
        "{}/{}",
        uri.to_string().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
    .parse()
}
