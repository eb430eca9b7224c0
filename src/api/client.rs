//! REST client for the panel's client API.
//!
//! Only the calls the sync engine consumes live here: server fetch, resource
//! fetch, websocket credentials, power signals and directory listings.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::connection::jwt_expires_in;
use crate::error::{CommandError, ErrorContext, NetworkError, ResultExt, SyncError, SyncResult};
use crate::models::{FileEntry, ListEnvelope, PowerSignal, ServerData, ServerIdentity, SingleEnvelope};
use crate::traits::{Headers, HttpClient, Response, SocketCredentials};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// Websocket credential payload. Some panel versions wrap it in `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WebsocketResponse {
    Wrapped { data: WebsocketCredentials },
    Bare(WebsocketCredentials),
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketCredentials {
    token: String,
    socket: String,
}

/// `{errors: [{code, status, detail}]}` error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Acknowledgement of a power request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PowerAccepted {
    /// Informational status echoed by the panel, if any. The authoritative
    /// transition arrives later on the event stream.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PowerResponseBody {
    #[serde(default)]
    status: Option<String>,
}

/// Client for the panel client API.
///
/// # Example
///
/// ```ignore
/// use panel_sync::api::PanelApiClient;
/// use panel_sync::adapters::ReqwestHttpClient;
///
/// let api = PanelApiClient::new(ReqwestHttpClient::new(), "https://panel.example.com/api/client")
///     .with_api_key("ptlc_xxx");
/// let server = api.fetch_server(&identity).await?;
/// ```
#[derive(Debug, Clone)]
pub struct PanelApiClient<H: HttpClient> {
    /// Base URL, e.g. `https://panel.example.com/api/client`
    pub base_url: String,
    http: Arc<H>,
    api_key: Option<String>,
}

impl<H: HttpClient> PanelApiClient<H> {
    pub fn new(http: H, base_url: impl Into<String>) -> Self {
        Self::with_shared(Arc::new(http), base_url)
    }

    /// Build a client over an already shared HTTP client.
    pub fn with_shared(http: Arc<H>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            api_key: None,
        }
    }

    /// Set the API key sent as a Bearer token.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(ref key) = self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {}", key));
        }
        headers
    }

    fn server_url(&self, identity: &ServerIdentity, suffix: &str) -> String {
        format!("{}/servers/{}{}", self.base_url, identity.identifier, suffix)
    }

    async fn get(&self, url: &str) -> Result<Response, NetworkError> {
        debug!(%url, "GET");
        let response = self.http.get(url, &self.headers()).await.map_err(|e| {
            let mut err = NetworkError::from(e);
            if let NetworkError::ConnectionFailed { url: ref mut u, .. } = err {
                *u = url.to_string();
            }
            err
        })?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        Ok(response)
    }

    /// Server attributes.
    ///
    /// GET /servers/{id}
    pub async fn fetch_server(&self, identity: &ServerIdentity) -> SyncResult<ServerData> {
        let url = self.server_url(identity, "");
        let response = self
            .get(&url)
            .await
            .with_context(|| context("fetch_server", identity))?;
        let envelope: SingleEnvelope<ServerData> = decode(&response)
            .with_context(|| context("fetch_server", identity))?;
        Ok(envelope.into_attributes())
    }

    /// Process state and resource usage.
    ///
    /// GET /servers/{id}/resources
    pub async fn fetch_resources(&self, identity: &ServerIdentity) -> SyncResult<ServerData> {
        let url = self.server_url(identity, "/resources");
        let response = self
            .get(&url)
            .await
            .with_context(|| context("fetch_resources", identity))?;
        let envelope: SingleEnvelope<ServerData> = decode(&response)
            .with_context(|| context("fetch_resources", identity))?;
        Ok(envelope.into_attributes())
    }

    /// Short-lived websocket credentials. The lifetime comes from the token's
    /// `exp` claim when it is a JWT.
    ///
    /// GET /servers/{id}/websocket
    pub async fn websocket_token(&self, identity: &ServerIdentity) -> SyncResult<SocketCredentials> {
        let url = self.server_url(identity, "/websocket");
        let response = self
            .get(&url)
            .await
            .with_context(|| context("websocket_token", identity))?;
        let body: WebsocketResponse = decode(&response)
            .with_context(|| context("websocket_token", identity))?;
        let creds = match body {
            WebsocketResponse::Wrapped { data } => data,
            WebsocketResponse::Bare(creds) => creds,
        };

        let credentials = SocketCredentials::new(creds.token, creds.socket);
        Ok(match jwt_expires_in(&credentials.token) {
            Some(lifetime) => credentials.with_lifetime(lifetime),
            None => credentials,
        })
    }

    /// Ask the panel to deliver a power signal. A 2xx answer only means the
    /// request was accepted.
    ///
    /// POST /servers/{id}/power {signal}
    pub async fn send_power(&self, identity: &ServerIdentity, signal: PowerSignal) -> SyncResult<PowerAccepted> {
        let url = self.server_url(identity, "/power");
        let body = serde_json::json!({ "signal": signal.as_str() }).to_string();
        debug!(%url, %signal, "POST power");

        let rejected = |status: Option<u16>, message: String| -> SyncError {
            SyncError::from(CommandError::RemoteRejected {
                signal,
                status,
                message,
            })
            .with_context(context("send_power", identity))
        };

        let response = self
            .http
            .post(&url, &body, &self.headers())
            .await
            .map_err(|e| rejected(None, e.to_string()))?;

        if !response.is_success() {
            let message = error_message(&response);
            warn!(server = %identity, %signal, status = response.status, %message, "power request rejected");
            return Err(rejected(Some(response.status), message));
        }
        if response.is_empty() {
            return Ok(PowerAccepted::default());
        }
        let status = response
            .json::<PowerResponseBody>()
            .map(|body| body.status)
            .unwrap_or(None);
        Ok(PowerAccepted { status })
    }

    /// Directory listing. Entries come back in panel order.
    ///
    /// GET /servers/{id}/files/list?directory={path}
    pub async fn list_directory(&self, identity: &ServerIdentity, path: &str) -> SyncResult<Vec<FileEntry>> {
        let url = self.server_url(
            identity,
            &format!("/files/list?directory={}", urlencoding::encode(path)),
        );
        let response = self
            .get(&url)
            .await
            .with_context(|| context("list_directory", identity))?;
        let envelope: ListEnvelope<FileEntry> = decode(&response)
            .with_context(|| context("list_directory", identity))?;
        Ok(envelope.into_attributes())
    }
}

fn context(operation: &str, identity: &ServerIdentity) -> ErrorContext {
    ErrorContext::new(operation)
        .with_server_id(identity.identifier.clone())
        .with_component("api")
}

fn decode<T: serde::de::DeserializeOwned>(response: &Response) -> Result<T, NetworkError> {
    response.json::<T>().map_err(|e| NetworkError::InvalidResponse {
        message: format!("{} (body: {})", e, body_excerpt(response)),
    })
}

fn status_error(response: &Response) -> NetworkError {
    NetworkError::HttpStatus {
        status: response.status,
        message: error_message(response),
    }
}

/// First `detail` (or `code`) of a panel error body, else the raw body.
fn error_message(response: &Response) -> String {
    if let Ok(body) = response.json::<ErrorBody>() {
        if let Some(first) = body.errors.into_iter().next() {
            if let Some(detail) = first.detail.or(first.code) {
                return detail;
            }
        }
    }
    let excerpt = body_excerpt(response);
    if excerpt.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        excerpt
    }
}

fn body_excerpt(response: &Response) -> String {
    let text = String::from_utf8_lossy(&response.body);
    text.chars().take(MAX_ERROR_BODY).collect::<String>().trim().to_string()
}
