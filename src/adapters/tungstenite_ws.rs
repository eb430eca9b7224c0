//! Tungstenite-based transport adapter.
//!
//! Opens the daemon websocket with tokio-tungstenite and splits it into the
//! [`FrameSink`] / [`FrameSource`] halves the connection manager drives.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::traits::{FrameSink, FrameSource, TransportConnector, TransportHalves};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport connector using tokio-tungstenite.
///
/// Daemons check the `Origin` header against the panel URL, so production
/// callers set it with [`with_origin`](Self::with_origin).
///
/// # Example
///
/// ```ignore
/// use panel_sync::adapters::TungsteniteConnector;
/// use panel_sync::traits::TransportConnector;
///
/// let connector = TungsteniteConnector::new().with_origin("https://panel.example.com");
/// let halves = connector.connect("wss://node.example.com:8080/api/servers/1a7ce997/ws").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    origin: Option<String>,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `origin` as the `Origin` header of the handshake.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    fn connect_error(endpoint: &str, err: impl std::fmt::Display) -> TransportError {
        TransportError::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl TransportConnector for TungsteniteConnector {
    async fn connect(&self, endpoint: &str) -> Result<TransportHalves, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| Self::connect_error(endpoint, e))?;
        if let Some(ref origin) = self.origin {
            let value = HeaderValue::from_str(origin).map_err(|e| Self::connect_error(endpoint, e))?;
            request.headers_mut().insert("Origin", value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| Self::connect_error(endpoint, e))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (write, read) = stream.split();
        Ok(TransportHalves::new(
            Box::new(TungsteniteSink { write }),
            Box::new(TungsteniteSource { read }),
        ))
    }
}

struct TungsteniteSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            trace!(error = %e, "close frame not sent");
        }
        let _ = self.write.close().await;
    }
}

struct TungsteniteSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => trace!("ignoring non-utf8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "daemon closed the websocket");
                    return None;
                }
                // Pings are answered by tungstenite on the next read or write.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return None
                }
                Err(e) => {
                    return Some(Err(TransportError::Closed {
                        reason: Some(e.to_string()),
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = TungsteniteConnector::new();
        let result = connector.connect("ws://127.0.0.1:59999/api/servers/x/ws").await;
        match result {
            Err(TransportError::ConnectFailed { endpoint, .. }) => {
                assert_eq!(endpoint, "ws://127.0.0.1:59999/api/servers/x/ws");
            }
            _ => panic!("expected ConnectFailed"),
        }
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let connector = TungsteniteConnector::new().with_origin("https://panel.test");
        let result = connector.connect("not a url").await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
