use std::pin::Pin;

use futures::StreamExt as _;

use crate::errors::BackendError;
use crate::model::{BackendId, GenerationRequest};

/// Normalized event produced by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// Incremental text fragment, in send order.
    Chunk { text: String },
    /// Terminal success event carrying the authoritative full text.
    Done { full_text: String },
}

/// Boxed event stream returned by a backend.
pub type BackendEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<BackendEvent, BackendError>> + Send + 'static>>;

/// Open channel to a backend.
///
/// Dropping the stream (or calling [`BackendStream::close`]) closes the
/// underlying connection; no further events are produced afterwards.
pub struct BackendStream {
    events: BackendEventStream,
}

impl BackendStream {
    /// Wraps any event stream.
    pub fn new(
        events: impl futures::Stream<Item = Result<BackendEvent, BackendError>> + Send + 'static,
    ) -> Self {
        Self {
            events: Box::pin(events),
        }
    }

    /// Waits for the next event. `None` means the backend closed the channel.
    pub async fn next_event(&mut self) -> Option<Result<BackendEvent, BackendError>> {
        self.events.next().await
    }

    /// Closes the channel.
    pub fn close(self) {}

    /// Unwraps the boxed event stream.
    pub fn into_inner(self) -> BackendEventStream {
        self.events
    }
}

/// Contract implemented by every generation backend.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Stable id used to route requests to this backend.
    fn id(&self) -> BackendId;

    /// Opens the event channel for one request.
    ///
    /// Errors returned here mean the channel never opened; errors that occur
    /// afterwards are delivered through the stream.
    async fn open_stream(&self, request: GenerationRequest)
    -> Result<BackendStream, BackendError>;
}
