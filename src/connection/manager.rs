//! Connection manager.
//!
//! Owns one persistent transport per server view. A background driver task
//! runs the lifecycle: fetch a token, open the transport, authenticate, pump
//! frames into the [`Dispatcher`], refresh the token before it lapses and
//! reconnect with backoff when the transport drops.
//!
//! Public methods are synchronous. `send()` never fails: frames issued while
//! disconnected wait in a bounded FIFO and are flushed after the next
//! `auth success`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{refresh_delay, Backoff, ConnectionState};
use crate::dispatcher::{DispatchedEvent, Dispatcher, EventMeta};
use crate::error::{SyncError, TransportError};
use crate::models::ServerIdentity;
use crate::traits::{FrameSink, SocketCredentials, TokenProvider, TransportConnector, TransportHalves};
use crate::websocket::{events, Frame, InboundKind, OutboundQueue};

/// Wait before retrying a failed proactive token refresh. Also the shortest
/// gap between two refreshes.
const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Tuning for one connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub backoff: Backoff,
    /// Reconnect attempts after a drop before giving up.
    pub max_attempts: u32,
    pub queue_capacity: usize,
    /// Fraction of the token lifetime after which it is refreshed.
    pub refresh_ratio: f64,
    /// Lifetime assumed for tokens that do not advertise one.
    pub fallback_token_lifetime: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_attempts: 10,
            queue_capacity: 50,
            refresh_ratio: 0.8,
            fallback_token_lifetime: Duration::from_secs(600),
        }
    }
}

enum Command {
    Send(Frame),
    Close,
}

#[derive(Default)]
struct Control {
    identity: Option<ServerIdentity>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Apply `next` if the state machine allows it. Returns whether it applied.
fn transition(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    let mut applied = false;
    state_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if current.can_transition_to(next) {
            debug!(from = %current, to = %next, "connection state");
            *current = next;
            applied = true;
            true
        } else {
            if *current != ConnectionState::Closed {
                warn!(from = %current, to = %next, "ignoring illegal connection transition");
            }
            false
        }
    });
    applied
}

/// Owns the persistent transport for one server.
pub struct ConnectionManager {
    connector: Arc<dyn TransportConnector>,
    tokens: Arc<dyn TokenProvider>,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    queue: Arc<Mutex<OutboundQueue>>,
    epoch: Arc<AtomicU64>,
    control: Mutex<Control>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("queued", &self.queued())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        tokens: Arc<dyn TokenProvider>,
        dispatcher: Dispatcher,
        settings: ConnectionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let queue = OutboundQueue::new(settings.queue_capacity);
        Self {
            connector,
            tokens,
            dispatcher,
            settings,
            state_tx: Arc::new(state_tx),
            queue: Arc::new(Mutex::new(queue)),
            epoch: Arc::new(AtomicU64::new(0)),
            control: Mutex::new(Control::default()),
        }
    }

    /// Start connecting to `identity`.
    ///
    /// Allowed from `idle` and `errored`. The first call binds the identity;
    /// later calls must pass the same one.
    pub fn open(&self, identity: ServerIdentity) -> Result<(), TransportError> {
        let mut control = lock(&self.control);
        match self.state() {
            ConnectionState::Closed => return Err(TransportError::ConnectionClosed),
            ConnectionState::Idle | ConnectionState::Errored => {}
            _ => return Err(TransportError::AlreadyOpen),
        }
        if let Some(ref bound) = control.identity {
            if *bound != identity {
                return Err(TransportError::IdentityMismatch {
                    bound: bound.to_string(),
                });
            }
        }
        if !transition(&self.state_tx, ConnectionState::Connecting) {
            return Err(TransportError::ConnectionClosed);
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            identity: identity.clone(),
            connector: Arc::clone(&self.connector),
            tokens: Arc::clone(&self.tokens),
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
            state_tx: Arc::clone(&self.state_tx),
            queue: Arc::clone(&self.queue),
            epoch_counter: Arc::clone(&self.epoch),
            commands: commands_rx,
            epoch: self.epoch.load(Ordering::SeqCst),
            seq: 0,
        };
        control.identity = Some(identity);
        control.commands = Some(commands_tx);
        control.task = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Tear the connection down for good.
    pub fn close(&self) {
        let mut control = lock(&self.control);
        let closed_now = transition(&self.state_tx, ConnectionState::Closed);
        if let Some(commands) = control.commands.take() {
            let _ = commands.send(Command::Close);
        }
        control.task.take();
        lock(&self.queue).clear();
        if closed_now {
            info!(server = ?control.identity.as_ref().map(|i| i.identifier.as_str()), "connection closed");
        }
    }

    /// Send `{event, args}` to the daemon, or queue it until connected.
    pub fn send(&self, event: &str, args: Vec<String>) {
        let frame = Frame::new(event, args);
        let state = self.state();
        if state == ConnectionState::Closed {
            debug!(event, "send after close dropped");
            return;
        }
        let control = lock(&self.control);
        if state.is_connected() {
            if let Some(ref commands) = control.commands {
                match commands.send(Command::Send(frame)) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(Command::Send(frame))) => {
                        lock(&self.queue).push(frame);
                        return;
                    }
                    Err(_) => return,
                }
            }
        }
        debug!(event, %state, "not connected, queueing frame");
        lock(&self.queue).push(frame);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Generation of the current transport. Starts at 0 and increments each
    /// time a transport opens.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> Option<ServerIdentity> {
        lock(&self.control).identity.clone()
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = control.task.take() {
            task.abort();
        }
    }
}

/// How one transport session ended.
enum SessionEnd {
    /// `close()` was called.
    Closed,
    /// The transport failed or dropped; eligible for reconnect.
    Dropped { connected: bool, reason: String },
    /// Not worth retrying with the current token.
    Fatal(TransportError),
}

/// Result of fetching a new token and re-sending `auth`.
enum Refresh {
    Sent(SocketCredentials),
    Failed(SyncError),
    Lost(TransportError),
    Closed,
}

struct Driver {
    identity: ServerIdentity,
    connector: Arc<dyn TransportConnector>,
    tokens: Arc<dyn TokenProvider>,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    queue: Arc<Mutex<OutboundQueue>>,
    epoch_counter: Arc<AtomicU64>,
    commands: mpsc::UnboundedReceiver<Command>,
    epoch: u64,
    seq: u64,
}

impl Driver {
    async fn run(mut self) {
        info!(server = %self.identity, "opening connection");
        let mut attempt: u32 = 0;
        loop {
            let args = if attempt == 0 {
                Vec::new()
            } else {
                vec![attempt.to_string()]
            };
            self.emit(events::CONNECTING, args);

            match self.session().await {
                SessionEnd::Closed => {
                    debug!(server = %self.identity, "driver stopped");
                    return;
                }
                SessionEnd::Fatal(err) => {
                    self.fail(err);
                    return;
                }
                SessionEnd::Dropped { connected, reason } => {
                    if connected {
                        attempt = 0;
                        self.emit(events::DISCONNECTED, vec![reason.clone()]);
                    }
                    attempt += 1;
                    if attempt > self.settings.max_attempts {
                        self.fail(TransportError::RetriesExhausted {
                            attempts: self.settings.max_attempts,
                        });
                        return;
                    }
                    if !self.transition(ConnectionState::Reconnecting { attempt }) {
                        return;
                    }
                    let delay = self.settings.backoff.delay(attempt);
                    warn!(
                        server = %self.identity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "connection lost, reconnecting"
                    );
                    if self.race_close(sleep(delay)).await.is_none() {
                        return;
                    }
                }
            }
        }
    }

    async fn session(&mut self) -> SessionEnd {
        let mut credentials = match self.fetch_credentials().await {
            None => return SessionEnd::Closed,
            Some(Ok(credentials)) => credentials,
            Some(Err(err)) if err.is_retryable() => {
                return SessionEnd::Dropped {
                    connected: false,
                    reason: err.to_string(),
                }
            }
            Some(Err(err)) => {
                return SessionEnd::Fatal(TransportError::TokenUnavailable {
                    message: err.to_string(),
                })
            }
        };

        let connector = Arc::clone(&self.connector);
        let endpoint = credentials.endpoint.clone();
        let TransportHalves {
            mut sink,
            mut source,
        } = match self.race_close(connector.connect(&endpoint)).await {
            None => return SessionEnd::Closed,
            Some(Err(err)) => {
                return SessionEnd::Dropped {
                    connected: false,
                    reason: err.to_string(),
                }
            }
            Some(Ok(halves)) => halves,
        };

        self.epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.seq = 0;
        if !self.transition(ConnectionState::Authenticating) {
            sink.close().await;
            return SessionEnd::Closed;
        }
        debug!(server = %self.identity, epoch = self.epoch, "transport open, authenticating");
        if let Err(err) = sink.send(auth_frame(&credentials.token)).await {
            return SessionEnd::Dropped {
                connected: false,
                reason: err.to_string(),
            };
        }

        // Wait for `auth success`. A rejection gets one retry with a fresh token.
        let mut rejected_once = false;
        loop {
            tokio::select! {
                next = source.next_frame() => {
                    let text = match next {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => return SessionEnd::Dropped { connected: false, reason: err.to_string() },
                        None => return SessionEnd::Dropped {
                            connected: false,
                            reason: "transport closed during authentication".to_string(),
                        },
                    };
                    let Some(frame) = self.decode(&text) else { continue };
                    match InboundKind::classify(&frame.event) {
                        InboundKind::AuthSuccess => {
                            self.dispatch_frame(frame);
                            break;
                        }
                        InboundKind::JwtError => {
                            let message = frame.first_arg().unwrap_or("token rejected").to_string();
                            self.dispatch_frame(frame);
                            if rejected_once {
                                sink.close().await;
                                return SessionEnd::Fatal(TransportError::AuthRejected { message });
                            }
                            rejected_once = true;
                            warn!(server = %self.identity, %message, "token rejected, requesting a fresh one");
                            match self.refresh(&mut sink).await {
                                Refresh::Sent(fresh) => credentials = fresh,
                                Refresh::Failed(err) => {
                                    sink.close().await;
                                    return SessionEnd::Fatal(TransportError::TokenUnavailable { message: err.to_string() });
                                }
                                Refresh::Lost(err) => return SessionEnd::Dropped { connected: false, reason: err.to_string() },
                                Refresh::Closed => {
                                    sink.close().await;
                                    return SessionEnd::Closed;
                                }
                            }
                        }
                        _ => self.dispatch_frame(frame),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => self.enqueue(frame),
                    Some(Command::Close) | None => {
                        sink.close().await;
                        return SessionEnd::Closed;
                    }
                },
            }
        }

        if !self.transition(ConnectionState::Connected) {
            sink.close().await;
            return SessionEnd::Closed;
        }
        info!(server = %self.identity, epoch = self.epoch, "connected");
        self.emit(events::CONNECTED, Vec::new());
        if let Err(reason) = self.flush(&mut sink).await {
            return SessionEnd::Dropped {
                connected: true,
                reason,
            };
        }

        let mut refresh_at = Instant::now() + self.refresh_after(&credentials);
        let mut rejected_once = false;
        loop {
            tokio::select! {
                next = source.next_frame() => {
                    let text = match next {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => return SessionEnd::Dropped { connected: true, reason: err.to_string() },
                        None => return SessionEnd::Dropped { connected: true, reason: "transport closed".to_string() },
                    };
                    let Some(frame) = self.decode(&text) else { continue };
                    match InboundKind::classify(&frame.event) {
                        InboundKind::AuthSuccess => {
                            rejected_once = false;
                            self.dispatch_frame(frame);
                        }
                        InboundKind::TokenExpiring | InboundKind::TokenExpired => {
                            debug!(server = %self.identity, event = %frame.event, "refreshing token");
                            self.dispatch_frame(frame);
                            match self.refresh(&mut sink).await {
                                Refresh::Sent(fresh) => refresh_at = Instant::now() + self.refresh_after(&fresh),
                                Refresh::Failed(err) => {
                                    warn!(server = %self.identity, error = %err, "token refresh failed");
                                    refresh_at = Instant::now() + TOKEN_RETRY_DELAY;
                                }
                                Refresh::Lost(err) => return SessionEnd::Dropped { connected: true, reason: err.to_string() },
                                Refresh::Closed => {
                                    sink.close().await;
                                    return SessionEnd::Closed;
                                }
                            }
                        }
                        InboundKind::JwtError => {
                            let message = frame.first_arg().unwrap_or("token rejected").to_string();
                            self.dispatch_frame(frame);
                            if rejected_once {
                                sink.close().await;
                                return SessionEnd::Fatal(TransportError::AuthRejected { message });
                            }
                            rejected_once = true;
                            warn!(server = %self.identity, %message, "token rejected while connected, requesting a fresh one");
                            match self.refresh(&mut sink).await {
                                Refresh::Sent(fresh) => refresh_at = Instant::now() + self.refresh_after(&fresh),
                                Refresh::Failed(err) => {
                                    sink.close().await;
                                    return SessionEnd::Fatal(TransportError::TokenUnavailable { message: err.to_string() });
                                }
                                Refresh::Lost(err) => return SessionEnd::Dropped { connected: true, reason: err.to_string() },
                                Refresh::Closed => {
                                    sink.close().await;
                                    return SessionEnd::Closed;
                                }
                            }
                        }
                        InboundKind::Passthrough => self.dispatch_frame(frame),
                    }
                }
                _ = sleep_until(refresh_at) => {
                    debug!(server = %self.identity, "proactive token refresh");
                    match self.refresh(&mut sink).await {
                        Refresh::Sent(fresh) => refresh_at = Instant::now() + self.refresh_after(&fresh),
                        Refresh::Failed(err) => {
                            warn!(server = %self.identity, error = %err, "token refresh failed");
                            refresh_at = Instant::now() + TOKEN_RETRY_DELAY;
                        }
                        Refresh::Lost(err) => return SessionEnd::Dropped { connected: true, reason: err.to_string() },
                        Refresh::Closed => {
                            sink.close().await;
                            return SessionEnd::Closed;
                        }
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if let Err(err) = sink.send(frame.encode()).await {
                            lock(&self.queue).requeue_front(vec![frame]);
                            return SessionEnd::Dropped { connected: true, reason: err.to_string() };
                        }
                    }
                    Some(Command::Close) | None => {
                        sink.close().await;
                        return SessionEnd::Closed;
                    }
                },
            }
        }
    }

    /// Run `fut` to completion unless `close()` arrives first. Sends issued
    /// meanwhile are queued.
    async fn race_close<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => self.enqueue(frame),
                    Some(Command::Close) | None => return None,
                },
            }
        }
    }

    async fn fetch_credentials(&mut self) -> Option<Result<SocketCredentials, SyncError>> {
        let tokens = Arc::clone(&self.tokens);
        let identity = self.identity.clone();
        self.race_close(async move { tokens.fetch_token(&identity).await })
            .await
    }

    async fn refresh(&mut self, sink: &mut Box<dyn FrameSink>) -> Refresh {
        let credentials = match self.fetch_credentials().await {
            None => return Refresh::Closed,
            Some(Err(err)) => return Refresh::Failed(err),
            Some(Ok(credentials)) => credentials,
        };
        match sink.send(auth_frame(&credentials.token)).await {
            Ok(()) => Refresh::Sent(credentials),
            Err(err) => Refresh::Lost(err),
        }
    }

    /// Send queued frames in FIFO order. On failure the unsent remainder goes
    /// back to the front of the queue.
    async fn flush(&mut self, sink: &mut Box<dyn FrameSink>) -> Result<(), String> {
        let frames = lock(&self.queue).drain();
        if frames.is_empty() {
            return Ok(());
        }
        debug!(server = %self.identity, count = frames.len(), "flushing queued frames");
        let mut pending = frames.into_iter();
        while let Some(frame) = pending.next() {
            if let Err(err) = sink.send(frame.encode()).await {
                let mut rest = vec![frame];
                rest.extend(pending);
                lock(&self.queue).requeue_front(rest);
                return Err(err.to_string());
            }
        }
        Ok(())
    }

    fn refresh_after(&self, credentials: &SocketCredentials) -> Duration {
        let lifetime = credentials
            .lifetime
            .unwrap_or(self.settings.fallback_token_lifetime);
        refresh_delay(lifetime, self.settings.refresh_ratio).max(TOKEN_RETRY_DELAY)
    }

    fn transition(&self, next: ConnectionState) -> bool {
        transition(&self.state_tx, next)
    }

    fn fail(&mut self, err: TransportError) {
        if self.transition(ConnectionState::Errored) {
            error!(server = %self.identity, code = err.error_code(), error = %err, "connection errored");
            self.emit(events::ERROR, vec![err.to_string()]);
        }
    }

    fn enqueue(&self, frame: Frame) {
        lock(&self.queue).push(frame);
    }

    fn decode(&self, text: &str) -> Option<Frame> {
        match Frame::decode(text) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(server = %self.identity, code = err.error_code(), error = %err, "dropping frame");
                None
            }
        }
    }

    fn next_meta(&mut self) -> EventMeta {
        self.seq += 1;
        EventMeta::new(self.epoch, self.seq)
    }

    fn emit(&mut self, name: &str, args: Vec<String>) {
        let meta = self.next_meta();
        self.dispatcher.emit(name, args, meta);
    }

    fn dispatch_frame(&mut self, frame: Frame) {
        let meta = self.next_meta();
        self.dispatcher
            .dispatch(&DispatchedEvent::new(frame.event, frame.args, meta));
    }
}

fn auth_frame(token: &str) -> String {
    Frame::new(events::AUTH, vec![token.to_string()]).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{AuthReply, MockConnector, StaticTokenProvider};
    use crate::error::NetworkError;
    use uuid::Uuid;

    struct Harness {
        connector: MockConnector,
        tokens: StaticTokenProvider,
        dispatcher: Dispatcher,
        manager: ConnectionManager,
        seen: Arc<Mutex<Vec<DispatchedEvent>>>,
    }

    fn harness(settings: ConnectionSettings) -> Harness {
        let connector = MockConnector::new();
        let tokens = StaticTokenProvider::new("wss://node.test/api/servers/x/ws");
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in [
            events::CONNECTING,
            events::CONNECTED,
            events::DISCONNECTED,
            events::ERROR,
            events::STATUS,
            "custom event",
        ] {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe(name, move |e| seen.lock().unwrap().push(e.clone()));
        }
        let manager = ConnectionManager::new(
            Arc::new(connector.clone()),
            Arc::new(tokens.clone()),
            dispatcher.clone(),
            settings,
        );
        Harness {
            connector,
            tokens,
            dispatcher,
            manager,
            seen,
        }
    }

    fn identity() -> ServerIdentity {
        ServerIdentity::from_uuid(Uuid::new_v4())
    }

    async fn wait_for(manager: &ConnectionManager, target: ConnectionState) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == target))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    fn names(seen: &Mutex<Vec<DispatchedEvent>>) -> Vec<String> {
        seen.lock().unwrap().iter().map(|e| e.name.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_authenticates() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();

        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        let sent = conn.sent_frames();
        assert_eq!(sent[0].event, "auth");
        assert_eq!(sent[0].args, vec!["token-1"]);
        assert_eq!(h.manager.epoch(), 1);
        assert_eq!(names(&h.seen), vec!["connecting", "connected"]);
        assert_eq!(h.connector.endpoints(), vec!["wss://node.test/api/servers/x/ws"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_dispatched_in_order_with_sequence() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        conn.push_event("status", &["starting"]);
        conn.push_frame("{not json");
        conn.push_event("status", &["running"]);
        conn.push_event("custom event", &["x"]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = h.seen.lock().unwrap().clone();
        let statuses: Vec<_> = seen.iter().filter(|e| e.name == "status").collect();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].first_arg(), Some("starting"));
        assert_eq!(statuses[1].first_arg(), Some("running"));
        assert!(statuses[0].meta < statuses[1].meta);
        assert_eq!(statuses[0].meta.epoch, 1);
        assert_eq!(seen.last().map(|e| e.name.as_str()), Some("custom event"));
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_queue_until_connected_and_flush_fifo() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept_with(AuthReply::Manual);

        h.manager.send("send command", vec!["say one".into()]);
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Authenticating).await;
        h.manager.send("send command", vec!["say two".into()]);
        assert_eq!(conn.sent_events(), vec!["auth"]);

        conn.push_event("auth success", &[]);
        wait_for(&h.manager, ConnectionState::Connected).await;
        conn.wait_for_sent(3).await;
        h.manager.send("send command", vec!["say three".into()]);
        conn.wait_for_sent(4).await;

        let args: Vec<_> = conn.sent_frames().into_iter().skip(1).map(|f| f.args[0].clone()).collect();
        assert_eq!(args, vec!["say one", "say two", "say three"]);
        assert_eq!(h.manager.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_keeps_latest_fifty() {
        let h = harness(ConnectionSettings::default());
        for n in 0..60 {
            h.manager.send("send command", vec![format!("cmd {}", n)]);
        }
        assert_eq!(h.manager.queued(), 50);

        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;
        conn.wait_for_sent(51).await;

        let frames = conn.sent_frames();
        assert_eq!(frames[1].args[0], "cmd 10");
        assert_eq!(frames[50].args[0], "cmd 59");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_gets_one_refresh_then_errors() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept_with(AuthReply::Reject);

        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Errored).await;

        assert_eq!(h.tokens.calls(), 2);
        let auths: Vec<_> = conn.sent_frames().into_iter().map(|f| f.args[0].clone()).collect();
        assert_eq!(auths, vec!["token-1", "token-2"]);
        assert!(conn.is_closed());
        assert_eq!(names(&h.seen).last().map(String::as_str), Some("error"));
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_recovered_by_refresh() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept_with(AuthReply::Manual);
        h.manager.open(identity()).unwrap();
        conn.wait_for_sent(1).await;
        conn.push_event("jwt error", &["jwt: exp claim is invalid"]);
        conn.wait_for_sent(2).await;
        conn.push_event("auth success", &[]);

        wait_for(&h.manager, ConnectionState::Connected).await;
        assert_eq!(h.tokens.calls(), 2);
        assert_eq!(conn.sent_frames()[1].args, vec!["token-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_while_connected_errors() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        conn.set_auth_reply(AuthReply::Reject);
        conn.push_event("jwt error", &["jwt: exp claim is invalid"]);
        wait_for(&h.manager, ConnectionState::Errored).await;

        assert_eq!(h.tokens.calls(), 2);
        assert!(conn.is_closed());
        let last = h.seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.name, "error");
        assert!(last.args[0].contains("jwt"), "{:?}", last.args);
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_while_rejected_errors() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        h.tokens.fail_next(SyncError::from(NetworkError::Timeout { operation: "token".into() }));
        conn.push_event("jwt error", &["jwt: exp claim is invalid"]);
        wait_for(&h.manager, ConnectionState::Errored).await;

        assert!(conn.is_closed());
        assert_eq!(names(&h.seen).last().map(String::as_str), Some("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_after_connected_rejection_starts_over() {
        let h = harness(ConnectionSettings::default());
        let first = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;
        first.set_auth_reply(AuthReply::Reject);
        first.push_event("jwt error", &["jwt: exp claim is invalid"]);
        wait_for(&h.manager, ConnectionState::Errored).await;

        h.manager.send("send command", vec!["say back".into()]);
        let second = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;
        second.wait_for_sent(2).await;

        assert_eq!(h.manager.epoch(), 2);
        assert_eq!(second.sent_frames()[1].args, vec!["say back"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let h = harness(ConnectionSettings::default());
        let first = h.connector.accept();
        let second = h.connector.accept();

        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;
        first.drop_connection();
        wait_for(&h.manager, ConnectionState::Reconnecting { attempt: 1 }).await;
        wait_for(&h.manager, ConnectionState::Connected).await;

        assert_eq!(h.manager.epoch(), 2);
        assert_eq!(second.sent_frames()[0].args, vec!["token-2"]);
        assert_eq!(
            names(&h.seen),
            vec!["connecting", "connected", "disconnected", "connecting", "connected"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_for_four_failures() {
        let h = harness(ConnectionSettings::default());
        for _ in 0..5 {
            h.connector.refuse("connection refused");
        }
        let _conn = h.connector.accept();

        let started = Instant::now();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Reconnecting { attempt: 5 }).await;
        let after_four = started.elapsed().as_secs_f64();
        wait_for(&h.manager, ConnectionState::Connected).await;

        // 1 + 2 + 4 + 8 seconds, each within ±20%.
        assert!(after_four >= 15.0 * 0.8 && after_four <= 15.0 * 1.2, "{}", after_four);
        let total = started.elapsed();
        assert!(total <= Duration::from_secs_f64(15.0 * 1.2 + 16.0 * 1.2));
        assert_eq!(h.connector.connect_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let settings = ConnectionSettings {
            max_attempts: 3,
            ..ConnectionSettings::default()
        };
        let h = harness(settings);

        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Errored).await;

        assert_eq!(h.connector.connect_count(), 4);
        let last = h.seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.name, "error");
        assert!(last.args[0].contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_after_errored_starts_over() {
        let settings = ConnectionSettings {
            max_attempts: 0,
            ..ConnectionSettings::default()
        };
        let h = harness(settings);
        let id = identity();

        h.manager.open(id.clone()).unwrap();
        wait_for(&h.manager, ConnectionState::Errored).await;

        let _conn = h.connector.accept();
        h.manager.open(id).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rules() {
        let h = harness(ConnectionSettings::default());
        let _conn = h.connector.accept();
        let id = identity();

        h.manager.open(id.clone()).unwrap();
        assert_eq!(h.manager.open(id.clone()), Err(TransportError::AlreadyOpen));

        h.manager.close();
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert_eq!(h.manager.open(id), Err(TransportError::ConnectionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_is_bound_once() {
        let settings = ConnectionSettings {
            max_attempts: 0,
            ..ConnectionSettings::default()
        };
        let h = harness(settings);
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Errored).await;

        let err = h.manager.open(identity()).unwrap_err();
        assert!(matches!(err, TransportError::IdentityMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_terminal() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        h.manager.close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(conn.is_closed());
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        h.manager.send("send command", vec!["ignored".into()]);
        assert_eq!(h.manager.queued(), 0);

        // A remote drop after close must not start a reconnect.
        conn.drop_connection();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff() {
        let h = harness(ConnectionSettings::default());
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Reconnecting { attempt: 1 }).await;

        h.manager.close();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_refresh_at_eighty_percent() {
        let h = harness(ConnectionSettings::default());
        let tokens = h.tokens.clone().with_lifetime(Duration::from_secs(100));
        let manager = ConnectionManager::new(
            Arc::new(h.connector.clone()),
            Arc::new(tokens.clone()),
            h.dispatcher.clone(),
            ConnectionSettings::default(),
        );
        let conn = h.connector.accept();

        manager.open(identity()).unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(79)).await;
        assert_eq!(conn.sent().len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(conn.sent().len(), 2);
        assert_eq!(conn.sent_frames()[1].args, vec!["token-2"]);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refresh_is_spaced() {
        let h = harness(ConnectionSettings::default());
        let tokens = h.tokens.clone().with_lifetime(Duration::ZERO);
        let manager = ConnectionManager::new(
            Arc::new(h.connector.clone()),
            Arc::new(tokens.clone()),
            h.dispatcher.clone(),
            ConnectionSettings::default(),
        );
        let _conn = h.connector.accept();

        manager.open(identity()).unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(tokens.calls(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(tokens.calls(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tokens.calls(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expiring_triggers_refresh() {
        let h = harness(ConnectionSettings::default());
        let conn = h.connector.accept();
        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Connected).await;

        conn.push_event("token expiring", &[]);
        conn.wait_for_sent(2).await;

        let frames = conn.sent_frames();
        assert_eq!(frames[1].event, "auth");
        assert_eq!(frames[1].args, vec!["token-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_token_failure_errors() {
        let h = harness(ConnectionSettings::default());
        h.tokens.fail_next(
            NetworkError::HttpStatus {
                status: 403,
                message: "forbidden".into(),
            }
            .into(),
        );

        h.manager.open(identity()).unwrap();
        wait_for(&h.manager, ConnectionState::Errored).await;
        assert_eq!(h.connector.connect_count(), 0);
    }
}
