//! Boundary between the pacer stream renderer and the text generation backend.
//!
//! A backend is anything that turns a [`GenerationRequest`] into an ordered
//! stream of [`BackendEvent`]s: zero or more `Chunk`s followed by at most one
//! terminal `Done` (or an error). The renderer treats it as a correct but
//! untrusted producer.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use futures::StreamExt as _;
//! use pacer_backend::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BackendError> {
//! let backend = ScriptedBackend::chunked("demo", "Hello there.", 3, Duration::from_millis(10));
//! let mut stream = backend
//!     .open_stream(GenerationRequest::new("demo", "greet me"))
//!     .await?;
//! while let Some(event) = stream.next_event().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

/// Backend trait, normalized events and the stream handle.
pub mod backend;
/// Backend error type.
pub mod errors;
/// HTTP backend speaking server-sent events.
pub mod http;
/// Request and identifier types.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// In-process backend that replays a fixed script.
pub mod scripted;

pub use backend::{BackendEvent, BackendEventStream, BackendStream, GenerationBackend};
pub use errors::BackendError;
pub use model::{BackendId, GenerationRequest};
pub use scripted::{ScriptStep, ScriptedBackend};
