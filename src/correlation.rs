//! Application id lookup used to correlate calls between monitored components.

use crate::{sender::lock, uploader::append_path, Error};
use bytes::Bytes;
use http::{Request, Uri};
use opentelemetry_http::HttpClient;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Name of the header carrying the correlation id of a component on requests and responses.
pub const REQUEST_CONTEXT_HEADER: &str = "request-context";

const CORRELATION_ID_PREFIX: &str = "cid-v1:";
const APP_ID_KEY: &str = "appId";

/// Value of the [`REQUEST_CONTEXT_HEADER`] announcing the given correlation id.
///
/// ```
/// assert_eq!(
///     "appId=cid-v1:1234",
///     appinsights_agent::request_context_header_value("cid-v1:1234"),
/// );
/// ```
pub fn request_context_header_value(correlation_id: &str) -> String {
    format!("{}={}", APP_ID_KEY, correlation_id)
}

/// Correlation id announced in a [`REQUEST_CONTEXT_HEADER`] value, if any.
///
/// ```
/// assert_eq!(
///     Some("cid-v1:1234"),
///     appinsights_agent::parse_request_context_app_id("roleName=api, appId=cid-v1:1234"),
/// );
/// ```
pub fn parse_request_context_app_id(value: &str) -> Option<&str> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == APP_ID_KEY)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

type Key = (String, String);

#[derive(Debug, Clone)]
enum Resolution {
    Resolved(String),
    Failed(Instant),
    Unresolvable,
}

/// Resolves `(endpoint, instrumentation key)` pairs to correlation ids.
///
/// Concurrent lookups of the same key share one request. Failed lookups are retried after a
/// cooldown, or never when `cache_unresolvable` is set.
#[derive(Debug)]
pub(crate) struct CorrelationResolver {
    client: Arc<dyn HttpClient>,
    timeout: Duration,
    cooldown: Duration,
    cache_unresolvable: bool,
    resolutions: Mutex<HashMap<Key, Resolution>>,
    in_flight: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl CorrelationResolver {
    pub(crate) fn new(
        client: Arc<dyn HttpClient>,
        timeout: Duration,
        cooldown: Duration,
        cache_unresolvable: bool,
    ) -> Self {
        CorrelationResolver {
            client,
            timeout,
            cooldown,
            cache_unresolvable,
            resolutions: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Correlation id if it has been resolved already. Never does any I/O.
    pub(crate) fn peek(&self, endpoint: &Uri, instrumentation_key: &str) -> Option<String> {
        match lock(&self.resolutions).get(&key(endpoint, instrumentation_key)) {
            Some(Resolution::Resolved(correlation_id)) => Some(correlation_id.clone()),
            _ => None,
        }
    }

    pub(crate) async fn resolve(
        &self,
        endpoint: &Uri,
        instrumentation_key: &str,
    ) -> Option<String> {
        let key = key(endpoint, instrumentation_key);
        if let Some(known) = self.known(&key) {
            return known;
        }

        let flight = lock(&self.in_flight)
            .entry(key.clone())
            .or_default()
            .clone();
        let _guard = flight.lock().await;
        // Whoever held the lock before us may have finished the lookup.
        if let Some(known) = self.known(&key) {
            return known;
        }

        let resolution = match self.lookup(endpoint, instrumentation_key).await {
            Ok(correlation_id) => Resolution::Resolved(correlation_id),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    endpoint = %endpoint,
                    "Failed to resolve correlation id"
                );
                if self.cache_unresolvable {
                    Resolution::Unresolvable
                } else {
                    Resolution::Failed(Instant::now())
                }
            }
        };
        let result = match &resolution {
            Resolution::Resolved(correlation_id) => Some(correlation_id.clone()),
            _ => None,
        };
        lock(&self.resolutions).insert(key, resolution);
        result
    }

    /// `Some` if the key needs no lookup right now: resolved, unresolvable or cooling down.
    fn known(&self, key: &Key) -> Option<Option<String>> {
        match lock(&self.resolutions).get(key)? {
            Resolution::Resolved(correlation_id) => Some(Some(correlation_id.clone())),
            Resolution::Unresolvable => Some(None),
            Resolution::Failed(at) if at.elapsed() < self.cooldown => Some(None),
            Resolution::Failed(_) => None,
        }
    }

    async fn lookup(&self, endpoint: &Uri, instrumentation_key: &str) -> Result<String, Error> {
        let uri = append_path(
            endpoint,
            &format!("api/profiles/{}/appId", instrumentation_key),
        )
        .map_err(|err| Error::UploadConnection(err.into()))?;
        let request = Request::get(uri)
            .body(Bytes::new())
            .map_err(|err| Error::UploadConnection(err.into()))?;

        let response = tokio::time::timeout(self.timeout, self.client.send_bytes(request))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Error::UploadConnection)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(Error::CorrelationLookup(status));
        }
        let app_id = String::from_utf8_lossy(response.body()).trim().to_string();
        if app_id.is_empty() {
            return Err(Error::CorrelationLookup(status));
        }
        Ok(format!("{}{}", CORRELATION_ID_PREFIX, app_id))
    }
}

fn key(endpoint: &Uri, instrumentation_key: &str) -> Key {
    (endpoint.to_string(), instrumentation_key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::Response;
    use opentelemetry_http::HttpError;
    use test_case::test_case;

    #[derive(Debug)]
    struct ProfileClient {
        status: u16,
        delay: Duration,
        requests: Mutex<Vec<String>>,
    }

    impl ProfileClient {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(ProfileClient {
                status,
                delay: Duration::from_millis(20),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<String> {
            lock(&self.requests).clone()
        }
    }

    #[async_trait]
    impl HttpClient for ProfileClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            lock(&self.requests).push(request.uri().to_string());
            tokio::time::sleep(self.delay).await;
            Ok(Response::builder()
                .status(self.status)
                .body(Bytes::from_static(b"app-id"))?)
        }
    }

    fn endpoint() -> Uri {
        Uri::from_static("https://dc.services.visualstudio.com")
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_request() {
        let client = ProfileClient::new(200);
        let resolver = CorrelationResolver::new(
            client.clone(),
            Duration::from_secs(1),
            Duration::from_secs(30),
            false,
        );
        let endpoint = endpoint();
        assert_eq!(None, resolver.peek(&endpoint, "ikey"));

        let (a, b) = tokio::join!(
            resolver.resolve(&endpoint, "ikey"),
            resolver.resolve(&endpoint, "ikey")
        );
        assert_eq!(Some("cid-v1:app-id".to_string()), a);
        assert_eq!(a, b);
        assert_eq!(
            vec!["https://dc.services.visualstudio.com/api/profiles/ikey/appId".to_string()],
            client.requests()
        );
        assert_eq!(a, resolver.peek(&endpoint, "ikey"));
    }

    #[tokio::test]
    async fn failures_respect_cooldown() {
        let client = ProfileClient::new(500);
        let resolver = CorrelationResolver::new(
            client.clone(),
            Duration::from_secs(1),
            Duration::from_millis(100),
            false,
        );
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
        assert_eq!(1, client.requests().len());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
        assert_eq!(2, client.requests().len());
    }

    #[tokio::test]
    async fn unresolvable_is_cached_when_configured() {
        let client = ProfileClient::new(404);
        let resolver =
            CorrelationResolver::new(client.clone(), Duration::from_secs(1), Duration::ZERO, true);
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
        assert_eq!(1, client.requests().len());
    }

    #[tokio::test]
    async fn lookup_times_out() {
        let client = Arc::new(ProfileClient {
            status: 200,
            delay: Duration::from_secs(5),
            requests: Mutex::new(Vec::new()),
        });
        let resolver = CorrelationResolver::new(
            client,
            Duration::from_millis(20),
            Duration::from_secs(30),
            false,
        );
        assert_eq!(None, resolver.resolve(&endpoint(), "ikey").await);
    }

    #[test_case("appId=cid-v1:1234",                 Some("cid-v1:1234") ; "app id only")]
    #[test_case("roleName=api, appId = cid-v1:1234", Some("cid-v1:1234") ; "multiple fields")]
    #[test_case("roleName=api",                      None                ; "no app id")]
    #[test_case("appId=",                            None                ; "empty app id")]
    fn parse_header(value: &'static str, expected: Option<&'static str>) {
        assert_eq!(expected, parse_request_context_app_id(value));
    }
}
