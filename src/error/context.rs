//! Error context for enriched error information.

use chrono::{DateTime, Utc};

/// Context information attached to errors for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Human-readable description of the operation that failed.
    pub operation: String,

    /// Server identifier the operation targeted, if any.
    pub server_id: Option<String>,

    /// Timestamp when the error occurred.
    pub timestamp: DateTime<Utc>,

    /// Number of retry attempts made before this error.
    pub retry_count: u32,

    /// Optional component where the error originated.
    pub component: Option<String>,
}

impl ErrorContext {
    /// Create a new ErrorContext for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            server_id: None,
            timestamp: Utc::now(),
            retry_count: 0,
            component: None,
        }
    }

    /// Set the server identifier for this context.
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Set the retry count for this context.
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the component for this context.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Get a formatted context string suitable for logging.
    pub fn to_log_string(&self) -> String {
        let mut parts = vec![format!("operation={}", self.operation)];

        if let Some(ref server_id) = self.server_id {
            parts.push(format!("server={}", server_id));
        }

        if let Some(ref component) = self.component {
            parts.push(format!("component={}", component));
        }

        if self.retry_count > 0 {
            parts.push(format!("retry={}", self.retry_count));
        }

        parts.join(" ")
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.operation)?;

        if let Some(ref server_id) = self.server_id {
            write!(f, " server={}", server_id)?;
        }

        if self.retry_count > 0 {
            write!(f, " retry={}", self.retry_count)?;
        }

        Ok(())
    }
}
