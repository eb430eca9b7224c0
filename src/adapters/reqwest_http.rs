//! Production [`HttpClient`] for the panel API, backed by reqwest.
//!
//! Every request carries a `panel-sync/<version>` user agent and is bounded by
//! a total timeout plus a shorter connect timeout. Error messages carry the
//! method but never the request URL or its query.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::trace;

use crate::traits::{Headers, HttpClient, HttpError, Response};

pub const USER_AGENT: &str = concat!("panel-sync/", env!("CARGO_PKG_VERSION"));

/// Total request timeout used by [`ReqwestHttpClient::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on establishing the TCP/TLS connection.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// reqwest-backed client for the panel REST API.
///
/// ```ignore
/// let http = ReqwestHttpClient::try_with_timeout(Duration::from_secs(10))?;
/// let api = PanelApiClient::new(http, "https://panel.example.com/api/client");
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    /// Client with [`DEFAULT_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// If the TLS backend cannot be initialised. Use
    /// [`try_with_timeout`](Self::try_with_timeout) to handle that case.
    pub fn new() -> Self {
        match Self::try_with_timeout(DEFAULT_TIMEOUT) {
            Ok(client) => client,
            Err(err) => panic!("failed to initialise HTTP client: {}", err),
        }
    }

    /// Client whose requests give up after `timeout`. The connect phase is
    /// capped at the smaller of `timeout` and five seconds.
    pub fn try_with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .build()
            .map_err(|err| HttpError::Other(format!("client setup: {}", err.without_url())))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, method: &'static str, request: reqwest::RequestBuilder) -> Result<Response, HttpError> {
        let response = request.send().await.map_err(|err| map_error(method, err))?;
        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body = response.bytes().await.map_err(|err| map_error(method, err))?;
        trace!(method, status, bytes = body.len(), "panel response");
        Ok(Response::with_headers(status, headers, body))
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller headers as a `HeaderMap`. Invalid names or values fail here, before
/// any request is sent.
fn header_map(headers: &Headers) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::Other(format!("invalid header name {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| HttpError::Other(format!("invalid value for header {}", name)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn flatten_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect()
}

fn map_error(method: &str, err: reqwest::Error) -> HttpError {
    let kind: fn(String) -> HttpError = if err.is_timeout() {
        HttpError::Timeout
    } else if err.is_connect() {
        HttpError::ConnectionFailed
    } else if err.is_builder() {
        HttpError::InvalidUrl
    } else {
        HttpError::Other
    };
    kind(format!("{} {}", method, err.without_url()))
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        let headers = header_map(headers)?;
        self.execute("GET", self.client.get(url).headers(headers)).await
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        let mut headers = header_map(headers)?;
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        let request = self.client.post(url).headers(headers).body(body.to_string());
        self.execute("POST", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_timeout_is_configurable() {
        let client = ReqwestHttpClient::try_with_timeout(Duration::from_secs(30)).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(30));
        assert_eq!(ReqwestHttpClient::new().timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_header_map_rejects_bad_values() {
        let mut headers = Headers::new();
        headers.insert("Authorization".to_string(), "Bearer ptlc\nkey".to_string());
        assert!(matches!(header_map(&headers), Err(HttpError::Other(_))));

        let mut headers = Headers::new();
        headers.insert("Bad Name".to_string(), "x".to_string());
        assert!(header_map(&headers).is_err());
    }

    #[test]
    fn test_flatten_headers_lowercases_names() {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let headers = flatten_headers(&map);
        assert_eq!(headers.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[tokio::test]
    async fn test_requests_identify_panel_sync() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client"))
            .and(header("User-Agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new();
        let response = client.get(&format!("{}/api/client", server.uri()), &Headers::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text().unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_post_defaults_to_json_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/power"))
            .and(header("Content-Type", "application/json"))
            .and(body_string(r#"{"signal":"start"}"#))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new();
        let response = client
            .post(&format!("{}/power", server.uri()), r#"{"signal":"start"}"#, &Headers::new())
            .await
            .unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_slow_panel_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::try_with_timeout(Duration::from_millis(200)).unwrap();
        let err = client.get(&server.uri(), &Headers::new()).await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_errors_omit_url() {
        let client = ReqwestHttpClient::new();
        let err = client
            .get("http://127.0.0.1:59999/api/client/servers/1a7ce997/files/list?directory=%2Fsecret", &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::ConnectionFailed(_) | HttpError::Other(_)), "{:?}", err);
        assert!(!err.to_string().contains("secret"), "{}", err);
        assert!(err.to_string().contains("GET"));
    }
}
