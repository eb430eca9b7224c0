//! Power commands and their confirmation.
//!
//! A power request only tells us the panel accepted the signal. The effect is
//! confirmed later by a `status` event. The controller records a
//! [`PendingPowerCommand`] once the request is accepted and starts a watchdog.
//! The first status transition in the command's expected set confirms it. If
//! the watchdog fires first, the command is reported as unconfirmed. Either
//! way exactly one [`PowerOutcome`] is broadcast and nothing is retried.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{PanelApiClient, PowerAccepted};
use crate::error::{CommandError, SyncResult};
use crate::models::{PowerSignal, ServerStatus};
use crate::state::{ServerStateStore, StatusTransition};
use crate::traits::HttpClient;

/// Default time a command has to show up on the event stream.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(30);

const OUTCOME_CAPACITY: usize = 16;

/// A power command accepted by the panel and not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPowerCommand {
    pub signal: PowerSignal,
    pub issued_at: DateTime<Utc>,
    pub expected_transitions: &'static [ServerStatus],
}

impl PendingPowerCommand {
    pub fn new(signal: PowerSignal) -> Self {
        Self {
            signal,
            issued_at: Utc::now(),
            expected_transitions: signal.expected_transitions(),
        }
    }

    /// Whether arriving at `status` confirms this command.
    pub fn is_confirmed_by(&self, status: ServerStatus) -> bool {
        self.expected_transitions.contains(&status)
    }
}

/// How a pending command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerOutcome {
    /// The stream reported one of the expected statuses.
    Confirmed {
        signal: PowerSignal,
        status: ServerStatus,
    },
    /// The watchdog expired. The command may still have taken effect.
    Unconfirmed { signal: PowerSignal, waited: Duration },
}

impl PowerOutcome {
    pub fn signal(&self) -> PowerSignal {
        match self {
            PowerOutcome::Confirmed { signal, .. } | PowerOutcome::Unconfirmed { signal, .. } => {
                *signal
            }
        }
    }

    /// The error to surface for this outcome, if any.
    pub fn error(&self) -> Option<CommandError> {
        match self {
            PowerOutcome::Confirmed { .. } => None,
            PowerOutcome::Unconfirmed { signal, waited } => Some(CommandError::Unconfirmed {
                signal: *signal,
                waited_secs: waited.as_secs(),
            }),
        }
    }
}

struct Slot {
    command: PendingPowerCommand,
    /// Distinguishes this command from any that replaced it.
    generation: u64,
    /// None while the power request is in flight.
    watchdog: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    slot: Option<Slot>,
    generation: u64,
}

/// Issues power signals for one server and tracks their confirmation.
pub struct PowerController<H: HttpClient> {
    api: Arc<PanelApiClient<H>>,
    store: ServerStateStore,
    watchdog: Duration,
    inner: Arc<Mutex<Inner>>,
    outcomes: broadcast::Sender<PowerOutcome>,
}

impl<H: HttpClient> std::fmt::Debug for PowerController<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerController")
            .field("server", self.store.identity())
            .field("watchdog", &self.watchdog)
            .field("pending", &self.pending().map(|p| p.signal))
            .finish()
    }
}

impl<H: HttpClient> PowerController<H> {
    pub fn new(api: Arc<PanelApiClient<H>>, store: ServerStateStore) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        Self {
            api,
            store,
            watchdog: DEFAULT_WATCHDOG,
            inner: Arc::new(Mutex::new(Inner::default())),
            outcomes,
        }
    }

    /// Override the confirmation timeout.
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// The outstanding command, if any.
    pub fn pending(&self) -> Option<PendingPowerCommand> {
        self.lock().slot.as_ref().map(|slot| slot.command.clone())
    }

    /// Receive every outcome broadcast after this call.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<PowerOutcome> {
        self.outcomes.subscribe()
    }

    /// Send `signal` to the panel.
    ///
    /// While a command is outstanding, another one is rejected locally
    /// without a request. `kill` is the exception: it replaces a pending
    /// non-kill command. A remote rejection clears the pending slot and is
    /// returned as [`CommandError::RemoteRejected`].
    pub async fn issue(&self, signal: PowerSignal) -> SyncResult<PowerAccepted> {
        let generation = self.reserve(signal)?;
        // Subscribe before the request so a fast status event is not missed.
        let transitions = self.store.subscribe_transitions();

        info!(server = %self.store.identity(), %signal, "issuing power signal");
        let accepted = match self.api.send_power(self.store.identity(), signal).await {
            Ok(accepted) => accepted,
            Err(err) => {
                let mut inner = self.lock();
                if inner.slot.as_ref().map(|s| s.generation) == Some(generation) {
                    inner.slot = None;
                }
                return Err(err);
            }
        };

        let mut inner = self.lock();
        match inner.slot.as_mut() {
            Some(slot) if slot.generation == generation => {
                let command = slot.command.clone();
                slot.watchdog = Some(self.spawn_watchdog(command, generation, transitions));
                debug!(%signal, status = ?accepted.status, "power signal accepted, awaiting confirmation");
            }
            // Cancelled or replaced while the request was in flight.
            _ => debug!(%signal, "power command no longer tracked"),
        }
        Ok(accepted)
    }

    fn reserve(&self, signal: PowerSignal) -> Result<u64, CommandError> {
        let mut inner = self.lock();
        if let Some(slot) = inner.slot.as_ref() {
            let pending = slot.command.signal;
            if signal != PowerSignal::Kill || pending == PowerSignal::Kill {
                warn!(%signal, %pending, "power signal rejected, command still pending");
                return Err(CommandError::Conflicting { signal, pending });
            }
            info!(%pending, "kill supersedes pending power command");
        }
        if let Some(watchdog) = inner.slot.take().and_then(|slot| slot.watchdog) {
            watchdog.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.slot = Some(Slot {
            command: PendingPowerCommand::new(signal),
            generation,
            watchdog: None,
        });
        Ok(generation)
    }

    fn spawn_watchdog(
        &self,
        command: PendingPowerCommand,
        generation: u64,
        mut transitions: broadcast::Receiver<StatusTransition>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let outcomes = self.outcomes.clone();
        let waited = self.watchdog;
        let deadline = tokio::time::Instant::now() + waited;

        tokio::spawn(async move {
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);
            let mut stream_open = true;

            let outcome = loop {
                tokio::select! {
                    _ = &mut sleep => {
                        break PowerOutcome::Unconfirmed { signal: command.signal, waited };
                    }
                    received = transitions.recv(), if stream_open => match received {
                        Ok(transition) if command.is_confirmed_by(transition.to) => {
                            break PowerOutcome::Confirmed { signal: command.signal, status: transition.to };
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "power watchdog lagged behind status transitions");
                        }
                        Err(broadcast::error::RecvError::Closed) => stream_open = false,
                    }
                }
            };

            {
                let mut inner = lock(&inner);
                if inner.slot.as_ref().map(|s| s.generation) != Some(generation) {
                    return;
                }
                inner.slot = None;
            }
            match &outcome {
                PowerOutcome::Confirmed { signal, status } => {
                    info!(%signal, %status, "power command confirmed")
                }
                PowerOutcome::Unconfirmed { signal, waited } => {
                    warn!(%signal, waited_secs = waited.as_secs(), "power command not confirmed in time")
                }
            }
            let _ = outcomes.send(outcome);
        })
    }

    /// Drop the pending command and stop its watchdog without reporting an
    /// outcome.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(slot) = inner.slot.take() {
            debug!(signal = %slot.command.signal, "power command cancelled");
            if let Some(watchdog) = slot.watchdog {
                watchdog.abort();
            }
        }
    }
}

impl<H: HttpClient> Drop for PowerController<H> {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(watchdog) = inner.slot.take().and_then(|slot| slot.watchdog) {
            watchdog.abort();
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
