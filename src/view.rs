//! Server views: the mount/unmount lifecycle around one server's engine.
//!
//! Mounting a view for a server creates, or reuses, the shared per-server
//! pieces: a [`Dispatcher`], a [`ConnectionManager`], a [`ServerStateStore`]
//! and a [`DirectoryView`]. Each [`ServerView`] adds its own
//! [`PowerController`] and tracks the subscriptions it registers.
//!
//! Unmounting a view deregisters its subscriptions and cancels its power
//! watchdog. When the last view of a server unmounts, the connection is
//! closed and the shared pieces are released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{PanelApiClient, PowerAccepted};
use crate::cache::DirectoryView;
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{DispatchedEvent, Dispatcher, SubscriptionId};
use crate::error::SyncResult;
use crate::models::{PowerSignal, ServerIdentity};
use crate::power::PowerController;
use crate::state::{ServerSnapshot, ServerStateStore};
use crate::traits::{HttpClient, TokenProvider, TransportConnector};
use crate::websocket::events;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The per-server pieces every view of that server shares.
struct SharedServer<H: HttpClient> {
    identity: ServerIdentity,
    api: Arc<PanelApiClient<H>>,
    dispatcher: Dispatcher,
    connection: Arc<ConnectionManager>,
    store: ServerStateStore,
    directory: DirectoryView<H>,
    /// Subscriptions owned by the shared pieces themselves.
    internal: Vec<SubscriptionId>,
}

impl<H: HttpClient + 'static> SharedServer<H> {
    /// Re-read server attributes and process state over REST and apply them
    /// as authoritative. Failures are logged; the store keeps its data.
    async fn resync(&self) {
        match self.api.fetch_server(&self.identity).await {
            Ok(data) => self.store.apply_fetch_result(&data),
            Err(err) => warn!(server = %self.identity, code = err.error_code(), error = %err, "server fetch failed"),
        }
        match self.api.fetch_resources(&self.identity).await {
            Ok(data) => self.store.apply_fetch_result(&data),
            Err(err) => warn!(server = %self.identity, code = err.error_code(), error = %err, "resource fetch failed"),
        }
    }
}

impl<H: HttpClient> SharedServer<H> {
    fn release(&self) {
        for id in &self.internal {
            self.dispatcher.unsubscribe(*id);
        }
        self.connection.close();
        self.dispatcher.close();
        info!(server = %self.identity, "server released");
    }
}

struct Entry<H: HttpClient> {
    shared: Arc<SharedServer<H>>,
    views: usize,
}

struct RegistryInner<H: HttpClient> {
    api: Arc<PanelApiClient<H>>,
    connector: Arc<dyn TransportConnector>,
    tokens: Arc<dyn TokenProvider>,
    config: SyncConfig,
    servers: Mutex<HashMap<Uuid, Entry<H>>>,
}

/// Hands out [`ServerView`]s and reference-counts the per-server engine.
///
/// Cloning yields another handle to the same registry.
pub struct ServerViewRegistry<H: HttpClient> {
    inner: Arc<RegistryInner<H>>,
}

impl<H: HttpClient> Clone for ServerViewRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HttpClient> std::fmt::Debug for ServerViewRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerViewRegistry")
            .field("servers", &lock(&self.inner.servers).len())
            .finish()
    }
}

impl<H: HttpClient + 'static> ServerViewRegistry<H> {
    pub fn new(
        api: Arc<PanelApiClient<H>>,
        connector: Arc<dyn TransportConnector>,
        tokens: Arc<dyn TokenProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                api,
                connector,
                tokens,
                config,
                servers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Mount a view of `identity`.
    ///
    /// The first view of a server opens its connection and loads its state
    /// over REST before returning. Later views share both.
    pub async fn mount(&self, identity: ServerIdentity) -> SyncResult<ServerView<H>> {
        let (shared, first) = {
            let mut servers = lock(&self.inner.servers);
            match servers.get_mut(&identity.uuid) {
                Some(entry) => {
                    entry.views += 1;
                    debug!(server = %identity, views = entry.views, "view mounted on shared server");
                    (Arc::clone(&entry.shared), false)
                }
                None => {
                    let shared = self.build(identity.clone());
                    servers.insert(
                        identity.uuid,
                        Entry {
                            shared: Arc::clone(&shared),
                            views: 1,
                        },
                    );
                    (shared, true)
                }
            }
        };

        let view = ServerView {
            power: PowerController::new(Arc::clone(&shared.api), shared.store.clone())
                .with_watchdog(self.inner.config.power_watchdog),
            shared,
            registry: Arc::downgrade(&self.inner),
            subscriptions: Mutex::new(Vec::new()),
        };

        if first {
            info!(server = %identity, "mounting server");
            if let Err(err) = view.shared.connection.open(identity) {
                // Dropping the view releases the entry.
                return Err(err.into());
            }
            view.shared.resync().await;
        }
        Ok(view)
    }

    fn build(&self, identity: ServerIdentity) -> Arc<SharedServer<H>> {
        let dispatcher = Dispatcher::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&self.inner.connector),
            Arc::clone(&self.inner.tokens),
            dispatcher.clone(),
            self.inner.config.connection_settings(),
        ));
        let store = ServerStateStore::new(identity.clone());
        let directory = DirectoryView::new(
            Arc::clone(&self.inner.api),
            identity.clone(),
            self.inner.config.directory_listing_limit,
        );

        Arc::new_cyclic(|weak: &Weak<SharedServer<H>>| {
            let mut internal = store.attach(&dispatcher);
            let weak = weak.clone();
            internal.push(dispatcher.subscribe(events::CONNECTED, move |event| {
                if let Some(shared) = weak.upgrade() {
                    on_connected(shared, event);
                }
            }));
            SharedServer {
                identity,
                api: Arc::clone(&self.inner.api),
                dispatcher,
                connection,
                store,
                directory,
                internal,
            }
        })
    }

    /// Number of views mounted for `identity`.
    pub fn view_count(&self, identity: &ServerIdentity) -> usize {
        lock(&self.inner.servers)
            .get(&identity.uuid)
            .map_or(0, |entry| entry.views)
    }

    /// Number of servers with at least one mounted view.
    pub fn server_count(&self) -> usize {
        lock(&self.inner.servers).len()
    }
}

/// On every successful authentication: ask for the console backlog, and
/// after a reconnect reload the state over REST.
fn on_connected<H: HttpClient + 'static>(shared: Arc<SharedServer<H>>, event: &DispatchedEvent) {
    shared.connection.send(events::SEND_LOGS, Vec::new());
    if event.meta.epoch > 1 {
        info!(server = %shared.identity, epoch = event.meta.epoch, "reconnected, resyncing state");
        tokio::spawn(async move { shared.resync().await });
    }
}

fn unmount<H: HttpClient>(registry: &Weak<RegistryInner<H>>, identity: &ServerIdentity) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let released = {
        let mut servers = lock(&registry.servers);
        let Some(entry) = servers.get_mut(&identity.uuid) else {
            return;
        };
        entry.views = entry.views.saturating_sub(1);
        if entry.views > 0 {
            debug!(server = %identity, views = entry.views, "view unmounted");
            None
        } else {
            servers.remove(&identity.uuid).map(|entry| entry.shared)
        }
    };
    if let Some(shared) = released {
        shared.release();
    }
}

/// One mounted view of a server.
///
/// Dropping the view unmounts it.
pub struct ServerView<H: HttpClient> {
    shared: Arc<SharedServer<H>>,
    registry: Weak<RegistryInner<H>>,
    power: PowerController<H>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl<H: HttpClient + 'static> std::fmt::Debug for ServerView<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerView")
            .field("server", &self.shared.identity)
            .field("connection", &self.connection_state())
            .field("subscriptions", &lock(&self.subscriptions).len())
            .finish()
    }
}

impl<H: HttpClient + 'static> ServerView<H> {
    pub fn identity(&self) -> &ServerIdentity {
        &self.shared.identity
    }

    pub fn store(&self) -> &ServerStateStore {
        &self.shared.store
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        self.shared.store.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe_state()
    }

    /// Subscribe to raw events for this server. The subscription is removed
    /// when the view unmounts.
    pub fn subscribe<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&DispatchedEvent) + Send + Sync + 'static,
    {
        let id = self.shared.dispatcher.subscribe(event, listener);
        lock(&self.subscriptions).push(id);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.subscriptions).retain(|owned| *owned != id);
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Send a raw event to the daemon, queued while disconnected.
    pub fn send(&self, event: &str, args: Vec<String>) {
        self.shared.connection.send(event, args);
    }

    /// Send a console command line.
    pub fn send_command(&self, line: &str) {
        self.send(events::SEND_COMMAND, vec![line.to_string()]);
    }

    /// Issue a power signal through this view's controller.
    pub async fn power(&self, signal: PowerSignal) -> SyncResult<PowerAccepted> {
        self.power.issue(signal).await
    }

    pub fn power_controller(&self) -> &PowerController<H> {
        &self.power
    }

    pub fn directory(&self) -> &DirectoryView<H> {
        &self.shared.directory
    }

    /// Reload server state over REST.
    pub async fn resync(&self) {
        self.shared.resync().await;
    }

    /// Unmount explicitly. Equivalent to dropping the view.
    pub fn unmount(self) {
        drop(self);
    }
}

impl<H: HttpClient> Drop for ServerView<H> {
    fn drop(&mut self) {
        let owned = std::mem::take(&mut *lock(&self.subscriptions));
        for id in owned {
            self.shared.dispatcher.unsubscribe(id);
        }
        // The controller's own drop aborts its watchdog; cancel explicitly so
        // it happens before the connection goes away.
        self.power.cancel();
        unmount(&self.registry, &self.shared.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockConnector, MockHttpClient, MockResponse, StaticTokenProvider};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const BASE: &str = "https://panel.test/api/client";

    struct Harness {
        http: MockHttpClient,
        connector: MockConnector,
        registry: ServerViewRegistry<MockHttpClient>,
    }

    fn identity() -> ServerIdentity {
        ServerIdentity::from_uuid(Uuid::parse_str("1a7ce997-259b-452e-8b4e-cecc464142ca").unwrap())
    }

    fn harness() -> Harness {
        let http = MockHttpClient::new();
        http.set_response(
            &format!("{}/servers/1a7ce997", BASE),
            MockResponse::json(200, json!({"object": "server", "attributes": {"name": "Survival"}})),
        );
        http.set_response(
            &format!("{}/servers/1a7ce997/resources", BASE),
            MockResponse::json(200, json!({"object": "stats", "attributes": {"current_state": "running"}})),
        );
        let connector = MockConnector::new();
        let registry = ServerViewRegistry::new(
            Arc::new(PanelApiClient::new(http.clone(), BASE)),
            Arc::new(connector.clone()),
            Arc::new(StaticTokenProvider::new("wss://node.test/api/servers/1a7ce997/ws")),
            SyncConfig::default(),
        );
        Harness {
            http,
            connector,
            registry,
        }
    }

    async fn wait_connected(view: &ServerView<MockHttpClient>) {
        let mut rx = view.subscribe_connection();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_loads_state_and_requests_logs() {
        let h = harness();
        let conn = h.connector.accept();

        let view = h.registry.mount(identity()).await.unwrap();
        assert_eq!(view.snapshot().name.as_deref(), Some("Survival"));
        assert_eq!(view.snapshot().status, crate::models::ServerStatus::Running);

        wait_connected(&view).await;
        conn.wait_for_sent(2).await;
        assert_eq!(conn.sent_events(), vec!["auth", "send logs"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_views_share_one_connection() {
        let h = harness();
        let conn = h.connector.accept();

        let first = h.registry.mount(identity()).await.unwrap();
        let second = h.registry.mount(identity()).await.unwrap();
        assert_eq!(h.registry.view_count(&identity()), 2);
        assert_eq!(h.connector.connect_count(), 1);
        wait_connected(&second).await;

        first.unmount();
        assert_eq!(h.registry.view_count(&identity()), 1);
        assert_eq!(second.connection_state(), ConnectionState::Connected);

        second.unmount();
        assert_eq!(h.registry.server_count(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_deregisters_view_subscriptions() {
        let h = harness();
        let conn = h.connector.accept();
        let first = h.registry.mount(identity()).await.unwrap();
        let second = h.registry.mount(identity()).await.unwrap();
        wait_connected(&first).await;

        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first_hits);
        first.subscribe(events::CONSOLE_OUTPUT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second_hits);
        second.subscribe(events::CONSOLE_OUTPUT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.push_event(events::CONSOLE_OUTPUT, &["[Server] Done (3.2s)!"]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.unmount();
        conn.push_event(events::CONSOLE_OUTPUT, &["[Server] Saving chunks"]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_before_connected_is_flushed() {
        let h = harness();
        let conn = h.connector.accept_with(crate::adapters::mock::AuthReply::Manual);
        let view = h.registry.mount(identity()).await.unwrap();

        view.send_command("say hello");
        conn.wait_for_sent(1).await;
        conn.push_event(events::AUTH_SUCCESS, &[]);
        conn.wait_for_sent(3).await;

        let frames = conn.sent_frames();
        assert_eq!(frames[1].event, "send command");
        assert_eq!(frames[1].args, vec!["say hello"]);
        assert_eq!(frames[2].event, "send logs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_cancels_pending_power() {
        let h = harness();
        h.connector.accept();
        h.http.set_response(&format!("{}/servers/1a7ce997/power", BASE), MockResponse::empty(204));
        let view = h.registry.mount(identity()).await.unwrap();
        let mut outcomes = view.power_controller().subscribe_outcomes();

        view.power(PowerSignal::Stop).await.unwrap();
        assert!(view.power_controller().pending().is_some());
        view.unmount();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(outcomes.try_recv().is_err());
    }
}
