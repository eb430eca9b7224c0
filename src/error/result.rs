//! Result type alias for sync engine operations.

use super::context::ErrorContext;
use super::sync_error::SyncError;

/// Type alias for Results using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

/// Extension trait for Result types to add context to errors.
pub trait ResultExt<T> {
    /// Add context to an error if the result is Err.
    fn context(self, ctx: ErrorContext) -> SyncResult<T>;

    /// Add context using a closure (only called on error).
    fn with_context<F>(self, f: F) -> SyncResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<SyncError>,
{
    fn context(self, ctx: ErrorContext) -> SyncResult<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F>(self, f: F) -> SyncResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_context_on_error() {
        let result: Result<(), TransportError> = Err(TransportError::ConnectionClosed);
        let err = result
            .context(ErrorContext::new("send").with_server_id("abc"))
            .unwrap_err();
        assert_eq!(err.context().unwrap().operation, "send");
    }

    #[test]
    fn test_with_context_is_lazy() {
        let result: Result<u8, TransportError> = Ok(7);
        let value = result
            .with_context(|| panic!("context built for an Ok value"))
            .unwrap();
        assert_eq!(value, 7);
    }
}
