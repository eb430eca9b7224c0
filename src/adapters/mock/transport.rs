//! Mock transport for testing the connection manager.
//!
//! Each `connect()` call consumes the next scripted outcome: either a refused
//! handshake or a [`MockConnection`] the test keeps a handle to. Through the
//! handle the test injects inbound frames, drops the transport and inspects
//! what the manager sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::traits::{FrameSink, FrameSource, TransportConnector, TransportHalves};
use crate::websocket::{events, Frame};

/// How a mock connection answers an `auth` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    /// Do nothing; the test pushes the reply itself.
    Manual,
    /// Reply with `auth success`.
    Accept,
    /// Reply with `jwt error`.
    Reject,
}

#[derive(Debug)]
enum Inbound {
    Text(String),
    Error(TransportError),
    Close,
}

/// Test-side handle to one scripted transport.
#[derive(Debug, Clone)]
pub struct MockConnection {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    auth_reply: Arc<Mutex<AuthReply>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new(auth_reply: AuthReply) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
            sent: Arc::new(Mutex::new(Vec::new())),
            auth_reply: Arc::new(Mutex::new(auth_reply)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Change how later `auth` frames are answered.
    pub fn set_auth_reply(&self, reply: AuthReply) {
        *self.auth_reply.lock().unwrap() = reply;
    }

    /// Inject a raw inbound text frame.
    pub fn push_frame(&self, text: impl Into<String>) {
        let _ = self.inbound_tx.send(Inbound::Text(text.into()));
    }

    /// Inject an inbound `{event, args}` frame.
    pub fn push_event(&self, event: &str, args: &[&str]) {
        let frame = Frame::new(event, args.iter().map(|a| a.to_string()).collect());
        self.push_frame(frame.encode());
    }

    /// Make the transport fail with an error.
    pub fn fail(&self, message: &str) {
        let _ = self.inbound_tx.send(Inbound::Error(TransportError::Closed {
            reason: Some(message.to_string()),
        }));
    }

    /// Close the transport from the remote side.
    pub fn drop_connection(&self) {
        let _ = self.inbound_tx.send(Inbound::Close);
    }

    /// Raw text of every frame the manager sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Decoded frames the manager sent.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent()
            .iter()
            .filter_map(|text| Frame::decode(text).ok())
            .collect()
    }

    /// Event names of every frame the manager sent.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent_frames().into_iter().map(|f| f.event).collect()
    }

    /// Wait until at least `count` frames were sent.
    pub async fn wait_for_sent(&self, count: usize) {
        while self.sent.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Whether the manager closed its write half.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn halves(&self) -> Option<TransportHalves> {
        let inbound = self.inbound_rx.lock().unwrap().take()?;
        let sink = MockSink {
            connection: self.clone(),
        };
        let source = MockSource { inbound };
        Some(TransportHalves::new(Box::new(sink), Box::new(source)))
    }
}

struct MockSink {
    connection: MockConnection,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.connection.is_closed() {
            return Err(TransportError::SendFailed("mock sink closed".to_string()));
        }
        let is_auth = Frame::decode(&text)
            .map(|frame| frame.event == events::AUTH)
            .unwrap_or(false);
        self.connection.sent.lock().unwrap().push(text);

        if is_auth {
            let reply = self.connection.auth_reply.lock().unwrap().clone();
            match reply {
                AuthReply::Manual => {}
                AuthReply::Accept => self.connection.push_event(events::AUTH_SUCCESS, &[]),
                AuthReply::Reject => self
                    .connection
                    .push_event(events::JWT_ERROR, &["jwt: signature is invalid"]),
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.connection.closed.store(true, Ordering::SeqCst);
    }
}

struct MockSource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        match self.inbound.recv().await? {
            Inbound::Text(text) => Some(Ok(text)),
            Inbound::Error(err) => Some(Err(err)),
            Inbound::Close => None,
        }
    }
}

#[derive(Debug)]
enum Scripted {
    Refuse(String),
    Accept(MockConnection),
}

/// Connector that replays scripted outcomes in order.
///
/// When the script runs out, further handshakes are refused.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a connection that answers `auth` with `auth success`.
    pub fn accept(&self) -> MockConnection {
        self.accept_with(AuthReply::Accept)
    }

    /// Script a connection with the given auth behaviour.
    pub fn accept_with(&self, reply: AuthReply) -> MockConnection {
        let connection = MockConnection::new(reply);
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Accept(connection.clone()));
        connection
    }

    /// Script one refused handshake.
    pub fn refuse(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Refuse(message.to_string()));
    }

    /// Number of handshakes attempted so far.
    pub fn connect_count(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    /// Endpoints passed to `connect()`, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<TransportHalves, TransportError> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        let next = self.script.lock().unwrap().pop_front();
        let refused = |message: String| TransportError::ConnectFailed {
            endpoint: endpoint.to_string(),
            message,
        };
        match next {
            Some(Scripted::Accept(connection)) => connection
                .halves()
                .ok_or_else(|| refused("mock connection already used".to_string())),
            Some(Scripted::Refuse(message)) => Err(refused(message)),
            None => Err(refused("no scripted connection".to_string())),
        }
    }
}
