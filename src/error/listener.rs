use thiserror::Error;

/// Failure raised by a listener capability.
///
/// Recoverable failures are logged by the virtual user and swallowed.
/// Unrecoverable failures halt the virtual user that observed them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener '{listener}' failed: {message}")]
    Recoverable { listener: String, message: String },
    #[error("Listener '{listener}' failed unrecoverably: {message}")]
    Unrecoverable { listener: String, message: String },
}

impl ListenerError {
    pub fn recoverable(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Recoverable {
            listener: listener.into(),
            message: message.into(),
        }
    }

    pub fn unrecoverable(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            listener: listener.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }
}
