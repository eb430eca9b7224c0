//! Mock HTTP client for testing.
//!
//! Provides a configurable mock HTTP client that can return predefined
//! responses or errors for testing purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::traits::{Headers, HttpClient, HttpError, Response};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method (GET or POST)
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (for POST requests)
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a response
    Success(Response),
    /// Return a transport error
    Error(HttpError),
}

impl MockResponse {
    /// JSON response with the given status.
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        MockResponse::Success(Response::json_value(status, &value))
    }

    /// Bodiless response, e.g. `204 No Content`.
    pub fn empty(status: u16) -> Self {
        MockResponse::Success(Response::new(status, bytes::Bytes::new()))
    }
}

/// Mock HTTP client for testing.
///
/// Responses are matched by URL: an exact match wins, then the longest
/// configured prefix, then the default response.
///
/// # Example
///
/// ```ignore
/// use panel_sync::adapters::mock::{MockHttpClient, MockResponse};
/// use panel_sync::traits::{HttpClient, Headers};
///
/// let client = MockHttpClient::new();
/// client.set_response(
///     "https://panel.test/api/client/servers/1a7ce997",
///     MockResponse::json(200, serde_json::json!({"attributes": {"current_state": "running"}})),
/// );
///
/// let response = client.get("https://panel.test/api/client/servers/1a7ce997", &Headers::new()).await?;
/// assert_eq!(response.status, 200);
/// assert_eq!(client.request_count("GET", "https://panel.test/api/client/servers/1a7ce997"), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockHttpClient {
    /// Configured responses by URL pattern
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    /// Default response when no specific match
    default_response: Arc<Mutex<Option<MockResponse>>>,
    /// Recorded requests for verification
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            default_response: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set a response for a URL or URL prefix.
    pub fn set_response(&self, url: &str, response: MockResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(url.to_string(), response);
    }

    /// Set a default response for URLs without specific matches.
    pub fn set_default_response(&self, response: MockResponse) {
        let mut default = self.default_response.lock().unwrap();
        *default = Some(response);
    }

    /// Get all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests made with `method` to exactly `url`.
    pub fn request_count(&self, method: &str, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    /// Clear all recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    /// Clear all configured responses.
    pub fn clear_responses(&self) {
        self.responses.lock().unwrap().clear();
    }

    /// Record a request.
    fn record_request(&self, method: &str, url: &str, headers: &Headers, body: Option<String>) {
        let mut requests = self.requests.lock().unwrap();
        requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
    }

    /// Get the response for a URL.
    fn get_response(&self, url: &str) -> Option<MockResponse> {
        let responses = self.responses.lock().unwrap();

        if let Some(response) = responses.get(url) {
            return Some(response.clone());
        }

        let longest_prefix = responses
            .iter()
            .filter(|(pattern, _)| url.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len());
        if let Some((_, response)) = longest_prefix {
            return Some(response.clone());
        }

        let default = self.default_response.lock().unwrap();
        default.clone()
    }

    fn respond(&self, url: &str) -> Result<Response, HttpError> {
        match self.get_response(url) {
            Some(MockResponse::Success(response)) => Ok(response),
            Some(MockResponse::Error(err)) => Err(err),
            None => Err(HttpError::Other(format!("No mock response for URL: {}", url))),
        }
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("GET", url, headers, None);
        self.respond(url)
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("POST", url, headers, Some(body.to_string()));
        self.respond(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_get_with_response() {
        let client = MockHttpClient::new();
        client.set_response(
            "https://panel.test/servers/abc",
            MockResponse::Success(Response::new(200, Bytes::from("Hello"))),
        );

        let response = client
            .get("https://panel.test/servers/abc", &Headers::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("Hello"));

        let requests = client.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].url, "https://panel.test/servers/abc");
    }

    #[tokio::test]
    async fn test_get_with_error() {
        let client = MockHttpClient::new();
        client.set_response(
            "https://panel.test/error",
            MockResponse::Error(HttpError::ServerError {
                status: 500,
                message: "Internal Server Error".to_string(),
            }),
        );

        let result = client.get("https://panel.test/error", &Headers::new()).await;

        match result {
            Err(HttpError::ServerError { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal Server Error");
            }
            _ => panic!("Expected ServerError"),
        }
    }

    #[tokio::test]
    async fn test_post_records_body() {
        let client = MockHttpClient::new();
        client.set_response("https://panel.test/servers/abc/power", MockResponse::empty(204));

        let response = client
            .post(
                "https://panel.test/servers/abc/power",
                r#"{"signal":"start"}"#,
                &Headers::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 204);
        let requests = client.get_requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, Some(r#"{"signal":"start"}"#.to_string()));
        assert_eq!(client.request_count("POST", "https://panel.test/servers/abc/power"), 1);
    }

    #[tokio::test]
    async fn test_no_response_configured() {
        let client = MockHttpClient::new();
        let result = client.get("https://panel.test/missing", &Headers::new()).await;
        assert!(matches!(result, Err(HttpError::Other(_))));
    }

    #[tokio::test]
    async fn test_default_response() {
        let client = MockHttpClient::new();
        client.set_default_response(MockResponse::empty(404));

        let response = client
            .get("https://panel.test/anything", &Headers::new())
            .await
            .unwrap();

        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let client = MockHttpClient::new();
        client.set_response("https://panel.test/servers/abc", MockResponse::empty(200));
        client.set_response("https://panel.test/servers/abc/files", MockResponse::empty(202));

        let response = client
            .get("https://panel.test/servers/abc/files/list?directory=%2F", &Headers::new())
            .await
            .unwrap();
        assert_eq!(response.status, 202);

        let response = client
            .get("https://panel.test/servers/abc/resources", &Headers::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_headers_recorded() {
        let client = MockHttpClient::new();
        client.set_response("https://panel.test/auth", MockResponse::empty(200));

        let mut headers = Headers::new();
        headers.insert("Authorization".to_string(), "Bearer key123".to_string());

        client.get("https://panel.test/auth", &headers).await.unwrap();

        let requests = client.get_requests();
        assert_eq!(
            requests[0].headers.get("Authorization"),
            Some(&"Bearer key123".to_string())
        );
    }

    #[test]
    fn test_clear() {
        let client = MockHttpClient::new();
        client.record_request("GET", "https://panel.test", &Headers::new(), None);
        client.set_response("https://panel.test", MockResponse::empty(200));

        client.clear_requests();
        client.clear_responses();

        assert!(client.get_requests().is_empty());
        assert!(client.get_response("https://panel.test").is_none());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let client = MockHttpClient::new();
        client.set_response("https://panel.test", MockResponse::empty(200));

        let cloned = client.clone();
        cloned.get("https://panel.test", &Headers::new()).await.unwrap();

        assert_eq!(client.get_requests().len(), 1);
    }
}
