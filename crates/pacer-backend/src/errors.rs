use crate::model::BackendId;

/// Errors produced by a generation backend, before the renderer classifies
/// them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with an application-level failure (HTTP status,
    /// quota, auth, ...).
    #[error("backend error ({backend}): {message}")]
    Backend {
        backend: BackendId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({backend}): {message}")]
    Transport { backend: BackendId, message: String },
    /// A frame or chunk could not be decoded.
    #[error("protocol error ({backend}): {message}")]
    Protocol { backend: BackendId, message: String },
    /// Invalid backend client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl BackendError {
    /// Creates an application-level backend error.
    pub fn backend(
        backend: impl Into<BackendId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(backend: impl Into<BackendId>, message: impl Into<String>) -> Self {
        Self::Transport {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(backend: impl Into<BackendId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Returns the backend associated with this error, if any.
    pub fn backend_id(&self) -> Option<&BackendId> {
        match self {
            Self::Backend { backend, .. }
            | Self::Transport { backend, .. }
            | Self::Protocol { backend, .. } => Some(backend),
            Self::Config(_) => None,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Backend { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. }
            | Self::Config(message) => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_expose_backend_and_message() {
        let err = BackendError::backend("http", "quota exceeded", Some(429));
        assert_eq!(err.backend_id().map(BackendId::as_str), Some("http"));
        assert_eq!(err.message(), "quota exceeded");
        assert_eq!(
            err.to_string(),
            "backend error (http): quota exceeded".to_string()
        );
        assert!(BackendError::Config("x".into()).backend_id().is_none());
    }
}
