//! Common imports for typical backend usage.
pub use crate::{
    BackendError, BackendEvent, BackendId, BackendStream, GenerationBackend, GenerationRequest,
    ScriptStep, ScriptedBackend,
};
