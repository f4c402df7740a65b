//! Error type for calls through the host extension interfaces.

use thiserror::Error;

/// Result type for host interface calls.
pub type ExtensionResult<T> = Result<T, ExtensionError>;

/// Errors raised by an extension while servicing a host call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtensionError {
    /// The extension does not implement a method that has no default.
    #[error("Pure virtual function '{method}' is not implemented")]
    NotImplemented { method: &'static str },

    /// The extension raised an error while handling the call.
    #[error("{message}")]
    Failed { message: String },

    /// The object backing the extension no longer exists.
    #[error("Extension object is no longer available")]
    Unavailable,
}

impl ExtensionError {
    /// Create a failure carrying a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_implemented_message() {
        let err = ExtensionError::NotImplemented { method: "items" };
        assert_eq!(
            err.to_string(),
            "Pure virtual function 'items' is not implemented"
        );
    }

    #[test]
    fn test_failed_keeps_message() {
        let err = ExtensionError::failed("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
