//! Server status as reported by the panel and the daemon.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a server. Exactly one value holds at any time.
///
/// `Unknown` stands for "not received yet" (a `null` status). Any string the
/// client does not recognise also maps to `Unknown`; decoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Offline,
    Starting,
    Running,
    Stopping,
    Installing,
    InstallFailed,
    ReinstallFailed,
    Suspended,
    RestoringBackup,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ServerStatus {
    pub const ALL: [ServerStatus; 10] = [
        ServerStatus::Offline,
        ServerStatus::Starting,
        ServerStatus::Running,
        ServerStatus::Stopping,
        ServerStatus::Installing,
        ServerStatus::InstallFailed,
        ServerStatus::ReinstallFailed,
        ServerStatus::Suspended,
        ServerStatus::RestoringBackup,
        ServerStatus::Unknown,
    ];

    /// Translate a wire string into a status. Unrecognised values map to `Unknown`.
    pub fn from_api(value: &str) -> Self {
        match value.trim() {
            "offline" => ServerStatus::Offline,
            "starting" => ServerStatus::Starting,
            "running" => ServerStatus::Running,
            "stopping" => ServerStatus::Stopping,
            "installing" => ServerStatus::Installing,
            "install_failed" => ServerStatus::InstallFailed,
            "reinstall_failed" => ServerStatus::ReinstallFailed,
            "suspended" => ServerStatus::Suspended,
            "restoring_backup" => ServerStatus::RestoringBackup,
            _ => ServerStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Offline => "offline",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Installing => "installing",
            ServerStatus::InstallFailed => "install_failed",
            ServerStatus::ReinstallFailed => "reinstall_failed",
            ServerStatus::Suspended => "suspended",
            ServerStatus::RestoringBackup => "restoring_backup",
            ServerStatus::Unknown => "null",
        }
    }

    /// Statuses in which the server process is up or coming up.
    pub fn is_active(&self) -> bool {
        matches!(self, ServerStatus::Starting | ServerStatus::Running)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
