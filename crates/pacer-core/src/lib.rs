//! Incremental stream renderer.
//!
//! Text produced by a generation backend in irregular bursts is queued as
//! grapheme-cluster units and released to the consumer at a steady,
//! human-readable pace. A session completes only after upstream has finished
//! *and* every queued unit has been shown; its final text is always the
//! authoritative text reported by the backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pacer_backend::ScriptedBackend;
//! use pacer_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RenderError> {
//! let renderer = Renderer::builder()
//!     .register_backend(Arc::new(ScriptedBackend::chunked(
//!         "demo",
//!         "Hello, world.",
//!         4,
//!         Duration::from_millis(30),
//!     )))
//!     .config(RenderConfig::from_env()?)
//!     .build()?;
//!
//! let mut session = renderer.start("main", GenerationRequest::new("demo", "greet"))?;
//! while let Some(event) = session.next_event().await {
//!     if let RenderEvent::Update { text, .. } = event {
//!         println!("{text}");
//!     }
//! }
//! println!("final: {}", session.finish().await?);
//! # Ok(())
//! # }
//! ```

mod adapter;
/// Completion barrier between upstream done and local drain.
pub mod completion;
/// Renderer configuration and environment overrides.
pub mod config;
mod driver;
/// Public error type.
pub mod errors;
/// Session handle, cancellation and visibility inputs, render events.
pub mod handle;
/// Completed-generation history sinks.
pub mod history;
/// Logging setup.
pub mod observability;
/// Batch sizing and delay policy.
pub mod pacing;
/// Common imports for typical usage.
pub mod prelude;
/// FIFO of pending units.
pub mod queue;
/// Renderer entry point and builder.
pub mod renderer;
/// Per-request session state machine.
pub mod session;
/// Grapheme-cluster units.
pub mod unit;
/// Foreground/background tracking and catch-up.
pub mod visibility;

pub use config::RenderConfig;
pub use errors::RenderError;
pub use handle::{CancelHandle, RenderEvent, SessionHandle, UpdateSource, VisibilityHandle};
pub use history::{HistoryError, HistoryRecord, HistorySink, JsonlHistory, MemoryHistory};
pub use observability::{ObservabilitySettings, init_observability};
pub use renderer::{Renderer, RendererBuilder};
pub use session::{SessionSnapshot, SessionState, StreamSession};
pub use visibility::Visibility;
