//! Transport frame codec.
//!
//! Every frame in both directions is `{"event": string, "args": string[]}`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;

/// One message unit on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,
}

/// Daemons occasionally put `null` or numbers in `args`; keep them as text
/// instead of rejecting the frame.
fn deserialize_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

impl Frame {
    pub fn new(event: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// A frame with no arguments.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Vec::new())
    }

    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame {
            message: e.to_string(),
            raw: truncate_raw(text),
        })?;
        if frame.event.is_empty() {
            return Err(ProtocolError::MalformedFrame {
                message: "empty event name".to_string(),
                raw: truncate_raw(text),
            });
        }
        Ok(frame)
    }

    /// Encode for sending.
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

fn truncate_raw(text: &str) -> String {
    const MAX: usize = 256;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
