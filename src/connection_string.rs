use std::{borrow::Cow, collections::HashMap, convert::TryInto, str::FromStr};

pub(crate) const DEFAULT_BREEZE_ENDPOINT: &str = "https://dc.services.visualstudio.com";
pub(crate) const DEFAULT_LIVE_ENDPOINT: &str = "https://rt.services.visualstudio.com";
const FIELDS_SEPARATOR: char = ';';
const FIELD_KEY_VALUE_SEPARATOR: char = '=';

#[derive(Debug, Clone)]
pub(crate) struct ConnectionString {
    pub(crate) ingestion_endpoint: http::Uri,
    pub(crate) live_endpoint: http::Uri,
    pub(crate) instrumentation_key: String,
}

/// Reasons a connection string is rejected.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// A field is not a `key=value` pair.
    #[error("invalid format")]
    InvalidFormat,
    /// The `InstrumentationKey` field is missing.
    #[error("missing instrumentation key")]
    MissingInstrumentationKey,
    /// Authorization other than `ikey` was requested.
    #[error("unsupported authorization; only \"ikey\" is supported")]
    UnsupportedAuthorization,
    /// An endpoint is not a valid URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),
}

impl ConnectionString {
    /// Connection string for a bare instrumentation key using the global endpoints.
    pub(crate) fn from_instrumentation_key(instrumentation_key: impl Into<String>) -> Self {
        ConnectionString {
            ingestion_endpoint: http::Uri::from_static(DEFAULT_BREEZE_ENDPOINT),
            live_endpoint: http::Uri::from_static(DEFAULT_LIVE_ENDPOINT),
            instrumentation_key: instrumentation_key.into(),
        }
    }

    /// Accepts either a full connection string or a bare instrumentation key.
    pub(crate) fn parse_setup_string(setup: &str) -> Result<Self, ParseError> {
        let setup = setup.trim();
        if setup.contains(FIELD_KEY_VALUE_SEPARATOR) {
            setup.parse()
        } else if setup.is_empty() {
            Err(ParseError::MissingInstrumentationKey)
        } else {
            Ok(Self::from_instrumentation_key(setup))
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ParseError;

    /// Parse the given connection string.
    ///
    /// Based on
    /// https://github.com/Azure/azure-sdk-for-js/blob/a4b3762fd7503f90c7bc3bacf9e45ecc4012d3fa/sdk/monitor/monitor-opentelemetry-exporter/src/utils/connectionStringParser.ts
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields: HashMap<String, String> = s
            .split(FIELDS_SEPARATOR)
            .filter(|kv| !kv.trim().is_empty())
            .map(|kv| match kv.split_once(FIELD_KEY_VALUE_SEPARATOR) {
                Some((key, value)) if !value.contains(FIELD_KEY_VALUE_SEPARATOR) => {
                    Ok((key.trim().to_lowercase(), value.to_string()))
                }
                _ => Err(ParseError::InvalidFormat),
            })
            .collect::<Result<_, _>>()?;

        if let Some(authorization) = fields.remove("authorization") {
            if !authorization.eq_ignore_ascii_case("ikey") {
                return Err(ParseError::UnsupportedAuthorization);
            }
        }

        let suffix = fields.remove("endpointsuffix").map(|endpoint_suffix| {
            let location_prefix = fields
                .remove("location")
                .map(|x| format!("{}.", x))
                .unwrap_or_default();
            (location_prefix, endpoint_suffix)
        });
        let ingestion_endpoint = resolve_endpoint(
            fields.remove("ingestionendpoint"),
            suffix.as_ref(),
            "dc",
            DEFAULT_BREEZE_ENDPOINT,
        )?;
        let live_endpoint = resolve_endpoint(
            fields.remove("liveendpoint"),
            suffix.as_ref(),
            "live",
            DEFAULT_LIVE_ENDPOINT,
        )?;

        let instrumentation_key = fields
            .remove("instrumentationkey")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ParseError::MissingInstrumentationKey)?;

        Ok(ConnectionString {
            ingestion_endpoint,
            live_endpoint,
            instrumentation_key,
        })
    }
}

/// An explicit endpoint wins over one derived from `EndpointSuffix`, which wins over the global
/// default.
fn resolve_endpoint(
    explicit: Option<String>,
    suffix: Option<&(String, String)>,
    service: &str,
    default: &'static str,
) -> Result<http::Uri, ParseError> {
    match (explicit, suffix) {
        (Some(endpoint), _) => sanitize_url(endpoint),
        (None, Some((location_prefix, endpoint_suffix))) => sanitize_url(format!(
            "https://{}{}.{}",
            location_prefix, service, endpoint_suffix
        )),
        (None, None) => Ok(http::Uri::from_static(default)),
    }
}

fn sanitize_url(url: String) -> Result<http::Uri, ParseError> {
    let mut new_url: Cow<str> = url.trim().into();
    if !new_url.starts_with("https://") {
        new_url = new_url.replace("http://", "https://").into();
    }

    new_url
        .trim_end_matches('/')
        .try_into()
        .map_err(ParseError::InvalidEndpoint)
}
