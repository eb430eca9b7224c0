//! Canonical live state of one server.
//!
//! The store has exactly two mutation entry points:
//!
//! - [`ServerStateStore::apply_fetch_result`] - REST data, authoritative,
//!   overwrites every field the payload carries
//! - [`ServerStateStore::apply_event`] - stream events, partial, merged under
//!   the transition table
//!
//! Readers take a [`ServerSnapshot`] or watch for changes. Status changes are
//! also broadcast as [`StatusTransition`]s for the power controller.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::transitions::{allowed_from, is_legal};
use crate::dispatcher::{DispatchedEvent, Dispatcher, EventMeta, SubscriptionId};
use crate::error::ProtocolError;
use crate::models::{Allocation, ResourceSample, ServerData, ServerIdentity, ServerStatus, StatsPayload};
use crate::websocket::events;

const TRANSITION_CAPACITY: usize = 64;

/// Read-only view of the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerSnapshot {
    pub name: Option<String>,
    pub status: ServerStatus,
    /// Latest telemetry sample. Cleared when a new connection epoch starts.
    pub resources: Option<ResourceSample>,
    pub allocations: Vec<Allocation>,
    /// Connection epoch of the newest event applied.
    pub epoch: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServerSnapshot {
    /// The allocation flagged as default, else the first one.
    pub fn default_allocation(&self) -> Option<&Allocation> {
        self.allocations
            .iter()
            .find(|a| a.is_default)
            .or_else(|| self.allocations.first())
    }
}

/// Where a status change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    Fetch,
    Event(EventMeta),
}

/// One applied status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: ServerStatus,
    pub to: ServerStatus,
    pub source: TransitionSource,
}

/// What `apply_event` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    StatusChanged { from: ServerStatus, to: ServerStatus },
    /// The event repeated the current status.
    StatusUnchanged,
    /// Rejected by the transition table; nothing changed.
    IllegalTransition { from: ServerStatus, to: ServerStatus },
    SampleReplaced,
    /// The store does not track this event.
    Ignored,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: ServerSnapshot,
    last_seq: u64,
    /// Set when a new epoch starts; its first status event is taken as is.
    status_pending_in_epoch: bool,
}

/// Single-writer store for one server's live state. Cloning yields another
/// handle to the same store.
#[derive(Clone)]
pub struct ServerStateStore {
    identity: ServerIdentity,
    inner: Arc<Mutex<Inner>>,
    snapshot_tx: Arc<watch::Sender<ServerSnapshot>>,
    transitions_tx: broadcast::Sender<StatusTransition>,
}

impl std::fmt::Debug for ServerStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStateStore")
            .field("identity", &self.identity)
            .field("status", &self.status())
            .finish()
    }
}

impl ServerStateStore {
    pub fn new(identity: ServerIdentity) -> Self {
        let (snapshot_tx, _) = watch::channel(ServerSnapshot::default());
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            identity,
            inner: Arc::new(Mutex::new(Inner::default())),
            snapshot_tx: Arc::new(snapshot_tx),
            transitions_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn status(&self) -> ServerStatus {
        self.lock().snapshot.status
    }

    /// Watch the snapshot. The receiver sees every committed change.
    pub fn subscribe(&self) -> watch::Receiver<ServerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Stream of applied status changes.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusTransition> {
        self.transitions_tx.subscribe()
    }

    /// Apply REST data. Every field present in `data` overwrites the store,
    /// status included, without consulting the transition table.
    pub fn apply_fetch_result(&self, data: &ServerData) {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut transition = None;

        if let Some(name) = data.name.as_ref() {
            inner.snapshot.name = Some(name.clone());
        }
        if let Some(status) = data.resolved_status() {
            let from = inner.snapshot.status;
            if from != status {
                info!(server = %self.identity, %from, to = %status, "status set from fetch");
                inner.snapshot.status = status;
                transition = Some(StatusTransition {
                    from,
                    to: status,
                    source: TransitionSource::Fetch,
                });
            }
        }
        if let Some(resources) = data.resources.clone() {
            inner.snapshot.resources = Some(resources.into_sample(now));
        }
        if let Some(allocations) = data.allocations() {
            inner.snapshot.allocations = allocations;
        }
        inner.snapshot.updated_at = Some(now);

        self.publish(&inner, transition);
    }

    /// Apply one stream event.
    ///
    /// Events from an older epoch, or not newer than the last applied event
    /// of the current epoch, are rejected as [`ProtocolError::StaleSample`].
    /// The first event of a newer epoch clears stream-only state.
    pub fn apply_event(&self, event: &DispatchedEvent) -> Result<ApplyOutcome, ProtocolError> {
        if event.name != events::STATUS && event.name != events::STATS {
            return Ok(ApplyOutcome::Ignored);
        }

        let mut inner = self.lock();
        let EventMeta { epoch, seq } = event.meta;
        let current_epoch = inner.snapshot.epoch;
        if epoch < current_epoch || (epoch == current_epoch && seq <= inner.last_seq) {
            debug!(server = %self.identity, event = %event.name, epoch, seq, "discarding stale event");
            return Err(ProtocolError::StaleSample { epoch, seq });
        }
        if epoch > current_epoch {
            debug!(server = %self.identity, epoch, "new connection epoch");
            inner.snapshot.epoch = epoch;
            inner.snapshot.resources = None;
            inner.status_pending_in_epoch = true;
        }

        // Validate before committing the sequence number so a bad payload
        // does not shadow the next good one.
        let outcome = match event.name.as_str() {
            events::STATUS => {
                let raw = event.first_arg().ok_or_else(|| ProtocolError::InvalidPayload {
                    event: event.name.clone(),
                    message: "missing status argument".to_string(),
                })?;
                let to = ServerStatus::from_api(raw);
                inner.last_seq = seq;
                self.apply_status(&mut inner, to, event.meta)
            }
            _ => {
                let raw = event.first_arg().ok_or_else(|| ProtocolError::InvalidPayload {
                    event: event.name.clone(),
                    message: "missing stats argument".to_string(),
                })?;
                let payload: StatsPayload =
                    serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidPayload {
                        event: event.name.clone(),
                        message: e.to_string(),
                    })?;
                inner.last_seq = seq;
                inner.snapshot.resources = Some(payload.into_sample(Utc::now()));
                ApplyOutcome::SampleReplaced
            }
        };

        inner.snapshot.updated_at = Some(Utc::now());
        let transition = match outcome {
            ApplyOutcome::StatusChanged { from, to } => Some(StatusTransition {
                from,
                to,
                source: TransitionSource::Event(event.meta),
            }),
            _ => None,
        };
        if transition.is_some() || outcome == ApplyOutcome::SampleReplaced {
            self.publish(&inner, transition);
        }
        Ok(outcome)
    }

    fn apply_status(&self, inner: &mut Inner, to: ServerStatus, meta: EventMeta) -> ApplyOutcome {
        let from = inner.snapshot.status;
        let first_in_epoch = std::mem::take(&mut inner.status_pending_in_epoch);

        if to == ServerStatus::Unknown {
            warn!(server = %self.identity, "ignoring unrecognised status value");
            return ApplyOutcome::IllegalTransition { from, to };
        }
        if from == to {
            return ApplyOutcome::StatusUnchanged;
        }
        if !first_in_epoch && !is_legal(from, to) {
            warn!(
                server = %self.identity,
                %from,
                %to,
                allowed = ?allowed_from(from),
                epoch = meta.epoch,
                seq = meta.seq,
                "ignoring illegal status transition"
            );
            return ApplyOutcome::IllegalTransition { from, to };
        }

        info!(server = %self.identity, %from, %to, "status changed");
        inner.snapshot.status = to;
        ApplyOutcome::StatusChanged { from, to }
    }

    fn publish(&self, inner: &Inner, transition: Option<StatusTransition>) {
        self.snapshot_tx.send_replace(inner.snapshot.clone());
        if let Some(transition) = transition {
            // No receivers is fine.
            let _ = self.transitions_tx.send(transition);
        }
    }

    /// Subscribe the store to the events it tracks. Returns the subscription
    /// ids so the owner can deregister them.
    pub fn attach(&self, dispatcher: &Dispatcher) -> Vec<SubscriptionId> {
        [events::STATUS, events::STATS]
            .into_iter()
            .map(|name| {
                let store = self.clone();
                dispatcher.subscribe(name, move |event| {
                    if let Err(err) = store.apply_event(event) {
                        if err.is_silent() {
                            debug!(error = %err, "event discarded");
                        } else {
                            warn!(server = %store.identity, code = err.error_code(), error = %err, "event dropped");
                        }
                    }
                })
            })
            .collect()
    }
}
