//! Server identity, telemetry and REST attribute models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::ListEnvelope;
use super::ServerStatus;

/// Identifies the server a view is bound to. Immutable once bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub uuid: Uuid,
    /// Short identifier used in panel URLs (the first block of the uuid).
    pub identifier: String,
}

impl ServerIdentity {
    pub fn new(uuid: Uuid, identifier: impl Into<String>) -> Self {
        Self {
            uuid,
            identifier: identifier.into(),
        }
    }

    /// Derive the short identifier from the uuid, as the panel does.
    pub fn from_uuid(uuid: Uuid) -> Self {
        let identifier = uuid.to_string().chars().take(8).collect::<String>();
        Self { uuid, identifier }
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// One telemetry sample. Each `stats` event replaces the previous sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_absolute: f64,
    pub disk_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub uptime_ms: u64,
    pub captured_at: DateTime<Utc>,
}

impl ResourceSample {
    /// Memory in MiB for display.
    pub fn memory_mib(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Uptime formatted as `1d 2h 3m` / `2h 3m` / `3m 4s`.
    pub fn uptime_display(&self) -> String {
        let secs = self.uptime_ms / 1000;
        let (days, hours, mins, s) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);
        if days > 0 {
            format!("{}d {}h {}m", days, hours, mins)
        } else if hours > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}m {}s", mins, s)
        }
    }
}

/// Network counters nested inside the daemon's `stats` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkCounters {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

/// The JSON document carried in `stats` event args.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsPayload {
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub cpu_absolute: f64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub network: NetworkCounters,
    /// Milliseconds.
    #[serde(default)]
    pub uptime: u64,
}

impl StatsPayload {
    pub fn into_sample(self, captured_at: DateTime<Utc>) -> ResourceSample {
        ResourceSample {
            memory_bytes: self.memory_bytes,
            cpu_absolute: self.cpu_absolute,
            disk_bytes: self.disk_bytes,
            network_rx_bytes: self.network.rx_bytes,
            network_tx_bytes: self.network.tx_bytes,
            uptime_ms: self.uptime,
            captured_at,
        }
    }
}

/// Resource usage as returned by the REST `resources` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub cpu_absolute: f64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub network_rx_bytes: u64,
    #[serde(default)]
    pub network_tx_bytes: u64,
    #[serde(default)]
    pub uptime: u64,
}

impl ResourceUsage {
    pub fn into_sample(self, captured_at: DateTime<Utc>) -> ResourceSample {
        ResourceSample {
            memory_bytes: self.memory_bytes,
            cpu_absolute: self.cpu_absolute,
            disk_bytes: self.disk_bytes,
            network_rx_bytes: self.network_rx_bytes,
            network_tx_bytes: self.network_tx_bytes,
            uptime_ms: self.uptime,
            captured_at,
        }
    }
}

/// A network allocation (ip:port) assigned to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: u64,
    pub ip: String,
    #[serde(default)]
    pub ip_alias: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Allocation {
    /// `alias:port` when an alias is set, otherwise `ip:port`.
    pub fn display_address(&self) -> String {
        let host = self.ip_alias.as_deref().unwrap_or(&self.ip);
        format!("{}:{}", host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerRelationships {
    #[serde(default)]
    pub allocations: Option<ListEnvelope<Allocation>>,
}

/// Server attributes from a REST fetch. Every field is optional: only the
/// fields present in the payload overwrite the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerData {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Process state (`offline`, `running`, ...), from the resources endpoint.
    #[serde(default)]
    pub current_state: Option<String>,
    /// Administrative status (`installing`, `suspended`, ...); null when normal.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_suspended: Option<bool>,
    #[serde(default)]
    pub is_installing: Option<bool>,
    #[serde(default)]
    pub resources: Option<ResourceUsage>,
    #[serde(default)]
    pub relationships: Option<ServerRelationships>,
}

impl ServerData {
    /// The status this payload asserts, if it asserts one.
    ///
    /// Administrative flags win over the process state: a suspended server
    /// reports `suspended` regardless of `current_state`.
    pub fn resolved_status(&self) -> Option<ServerStatus> {
        if self.is_suspended == Some(true) {
            return Some(ServerStatus::Suspended);
        }
        if let Some(status) = self.status.as_deref() {
            let parsed = ServerStatus::from_api(status);
            if parsed != ServerStatus::Unknown {
                return Some(parsed);
            }
        }
        if self.is_installing == Some(true) {
            return Some(ServerStatus::Installing);
        }
        self.current_state.as_deref().map(ServerStatus::from_api)
    }

    /// Allocations carried in the relationships block, if present.
    pub fn allocations(&self) -> Option<Vec<Allocation>> {
        self.relationships
            .as_ref()
            .and_then(|r| r.allocations.as_ref())
            .map(|list| list.attributes().cloned().collect())
    }
}
