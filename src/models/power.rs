//! Power signals.

use serde::{Deserialize, Serialize};

use super::ServerStatus;

/// A power action sent to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerSignal {
    /// Statuses whose arrival confirms that this signal took effect.
    pub fn expected_transitions(&self) -> &'static [ServerStatus] {
        match self {
            PowerSignal::Start => &[ServerStatus::Starting, ServerStatus::Running],
            PowerSignal::Stop => &[ServerStatus::Stopping, ServerStatus::Offline],
            PowerSignal::Restart => &[
                ServerStatus::Stopping,
                ServerStatus::Offline,
                ServerStatus::Starting,
                ServerStatus::Running,
            ],
            PowerSignal::Kill => &[ServerStatus::Offline],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
            PowerSignal::Restart => "restart",
            PowerSignal::Kill => "kill",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => Some(PowerSignal::Start),
            "stop" => Some(PowerSignal::Stop),
            "restart" => Some(PowerSignal::Restart),
            "kill" => Some(PowerSignal::Kill),
            _ => None,
        }
    }
}

impl std::fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_transitions() {
        assert_eq!(
            PowerSignal::Start.expected_transitions(),
            &[ServerStatus::Starting, ServerStatus::Running]
        );
        assert_eq!(PowerSignal::Kill.expected_transitions(), &[ServerStatus::Offline]);
        assert_eq!(PowerSignal::Restart.expected_transitions().len(), 4);
    }

    #[test]
    fn test_serialize_lowercase() {
        let body = serde_json::json!({ "signal": PowerSignal::Restart });
        assert_eq!(body.to_string(), r#"{"signal":"restart"}"#);
    }

    #[test]
    fn test_parse() {
        assert_eq!(PowerSignal::parse("KILL"), Some(PowerSignal::Kill));
        assert_eq!(PowerSignal::parse("reboot"), None);
    }
}
