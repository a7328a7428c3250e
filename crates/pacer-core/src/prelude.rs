//! Common imports for typical renderer usage.
pub use crate::{
    CancelHandle, RenderConfig, RenderError, RenderEvent, Renderer, SessionHandle,
    SessionSnapshot, SessionState, UpdateSource, Visibility, VisibilityHandle,
};
pub use pacer_backend::{BackendId, GenerationBackend, GenerationRequest};
