//! Power command errors.

use thiserror::Error;

use crate::models::PowerSignal;

/// Power command failure variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Rejected locally because another command is still outstanding.
    #[error("cannot send '{signal}' while '{pending}' is still pending")]
    Conflicting {
        signal: PowerSignal,
        pending: PowerSignal,
    },

    /// The panel refused the power request.
    #[error("panel rejected '{signal}': {message}")]
    RemoteRejected {
        signal: PowerSignal,
        status: Option<u16>,
        message: String,
    },

    /// The watchdog expired before the event stream confirmed the command.
    /// The command may still have succeeded on the daemon.
    #[error("'{signal}' was not confirmed within {waited_secs}s")]
    Unconfirmed { signal: PowerSignal, waited_secs: u64 },
}

impl CommandError {
    /// The signal this error refers to.
    pub fn signal(&self) -> PowerSignal {
        match self {
            CommandError::Conflicting { signal, .. }
            | CommandError::RemoteRejected { signal, .. }
            | CommandError::Unconfirmed { signal, .. } => *signal,
        }
    }

    /// Whether this is a timeout rather than an outright rejection.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Unconfirmed { .. })
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            CommandError::Conflicting { .. } => "E_CMD_CONFLICT",
            CommandError::RemoteRejected { .. } => "E_CMD_REJECTED",
            CommandError::Unconfirmed { .. } => "E_CMD_TIMEOUT",
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            CommandError::Conflicting { pending, .. } => format!(
                "Please wait for the pending {} action to finish.",
                pending
            ),
            CommandError::RemoteRejected { signal, message, .. } => {
                format!("The {} action was rejected: {}", signal, message)
            }
            CommandError::Unconfirmed { signal, .. } => format!(
                "The {} action did not take effect yet. Check the console before retrying.",
                signal
            ),
        }
    }
}
