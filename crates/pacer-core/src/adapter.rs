use std::time::Duration;

use futures::StreamExt as _;
use pacer_backend::{BackendEvent, BackendEventStream, BackendId, BackendStream};
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{RenderError, render_error_from_backend};

/// Upstream signal translated for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UpstreamSignal {
    Chunk(String),
    Done(String),
    Error(RenderError),
    /// The backend closed the channel after its terminal event.
    Closed,
}

/// Owns the backend channel and turns its events into [`UpstreamSignal`]s.
///
/// Once closed (terminal error, end of stream, or [`StreamAdapter::close`])
/// the channel is dropped and `next_signal` never resolves again, so nothing
/// can be delivered after cancellation.
pub(crate) struct StreamAdapter {
    backend: BackendId,
    events: Option<BackendEventStream>,
    saw_done: bool,
    idle_timeout: Option<Duration>,
    last_activity: Instant,
}

impl StreamAdapter {
    pub(crate) fn new(backend: BackendId, stream: BackendStream, idle_timeout: Option<Duration>) -> Self {
        Self {
            backend,
            events: Some(stream.into_inner()),
            saw_done: false,
            idle_timeout,
            last_activity: Instant::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.events.is_some()
    }

    pub(crate) fn close(&mut self) {
        if self.events.take().is_some() {
            debug!(backend = %self.backend, "upstream channel closed");
        }
    }

    /// Waits for the next upstream signal. Cancel-safe.
    pub(crate) async fn next_signal(&mut self) -> UpstreamSignal {
        let deadline = self
            .idle_timeout
            .filter(|_| !self.saw_done)
            .map(|t| (t, self.last_activity + t));
        let Some(events) = self.events.as_mut() else {
            return futures::future::pending().await;
        };

        let next = match deadline {
            Some((timeout, at)) => match tokio::time::timeout_at(at, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.close();
                    return UpstreamSignal::Error(RenderError::channel(format!(
                        "upstream idle for {}ms",
                        timeout.as_millis()
                    )));
                }
            },
            None => events.next().await,
        };
        self.last_activity = Instant::now();

        match next {
            Some(Ok(BackendEvent::Chunk { text })) => UpstreamSignal::Chunk(text),
            Some(Ok(BackendEvent::Done { full_text })) => {
                self.saw_done = true;
                UpstreamSignal::Done(full_text)
            }
            Some(Err(err)) => {
                self.close();
                UpstreamSignal::Error(render_error_from_backend(&err))
            }
            None => {
                self.close();
                if self.saw_done {
                    UpstreamSignal::Closed
                } else {
                    UpstreamSignal::Error(RenderError::channel(format!(
                        "upstream ended without completion ({})",
                        self.backend
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pacer_backend::BackendError;

    fn adapter(
        events: Vec<Result<BackendEvent, BackendError>>,
        idle: Option<Duration>,
    ) -> StreamAdapter {
        StreamAdapter::new(
            BackendId::new("test"),
            BackendStream::new(stream::iter(events)),
            idle,
        )
    }

    #[tokio::test]
    async fn translates_chunks_done_and_quiet_close() {
        let mut a = adapter(
            vec![
                Ok(BackendEvent::Chunk { text: "Hi".into() }),
                Ok(BackendEvent::Done {
                    full_text: "Hi".into(),
                }),
            ],
            None,
        );
        assert_eq!(a.next_signal().await, UpstreamSignal::Chunk("Hi".into()));
        assert_eq!(a.next_signal().await, UpstreamSignal::Done("Hi".into()));
        assert_eq!(a.next_signal().await, UpstreamSignal::Closed);
        assert!(!a.is_open());
    }

    #[tokio::test]
    async fn end_without_done_is_channel_error() {
        let mut a = adapter(vec![Ok(BackendEvent::Chunk { text: "x".into() })], None);
        a.next_signal().await;
        assert!(matches!(
            a.next_signal().await,
            UpstreamSignal::Error(RenderError::Channel { message }) if message.contains("without completion")
        ));
    }

    #[tokio::test]
    async fn protocol_error_becomes_malformed_chunk_and_closes() {
        let mut a = adapter(
            vec![
                Err(BackendError::protocol("test", "bad frame")),
                Ok(BackendEvent::Chunk { text: "late".into() }),
            ],
            None,
        );
        assert!(matches!(
            a.next_signal().await,
            UpstreamSignal::Error(RenderError::MalformedChunk { .. })
        ));
        assert!(!a.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_silent_upstream() {
        let mut a = StreamAdapter::new(
            BackendId::new("test"),
            BackendStream::new(stream::pending()),
            Some(Duration::from_millis(500)),
        );
        let started = Instant::now();
        assert!(matches!(
            a.next_signal().await,
            UpstreamSignal::Error(RenderError::Channel { message }) if message.contains("idle")
        ));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_adapter_never_yields() {
        let mut a = adapter(vec![Ok(BackendEvent::Chunk { text: "x".into() })], None);
        a.close();
        let waited =
            tokio::time::timeout(Duration::from_secs(60), a.next_signal()).await;
        assert!(waited.is_err());
    }
}
