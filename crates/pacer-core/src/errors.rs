use pacer_backend::BackendError;

/// Terminal failure of a render session, and errors from the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// The upstream channel failed before a terminal event.
    #[error("channel error: {message}")]
    Channel { message: String },
    /// A chunk could not be decoded into units.
    #[error("malformed chunk: {message}")]
    MalformedChunk { message: String },
    /// The session was cancelled by its owner.
    #[error("session cancelled")]
    Cancelled,
    /// Invalid renderer or backend configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request passed to `Renderer::start`.
    #[error("validation error: {0}")]
    Validation(String),
    /// No backend registered under the requested id.
    #[error("backend not found: {backend}")]
    BackendNotFound { backend: String },
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RenderError {
    pub(crate) fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether the error should be shown to the user.
    ///
    /// Cancellation is a deliberate terminal transition, not a failure.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<BackendError> for RenderError {
    fn from(value: BackendError) -> Self {
        render_error_from_backend(&value)
    }
}

pub(crate) fn render_error_from_backend(err: &BackendError) -> RenderError {
    match err {
        BackendError::Backend { .. } | BackendError::Transport { .. } => RenderError::Channel {
            message: err.to_string(),
        },
        BackendError::Protocol { .. } => RenderError::MalformedChunk {
            message: err.to_string(),
        },
        BackendError::Config(message) => RenderError::Config(message.clone()),
    }
}
