//! Backend that replays a fixed script of events on tokio timers.
//!
//! Used by the CLI demo and by tests; under a paused tokio clock the replay
//! is fully deterministic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream;
use tracing::debug;

use crate::backend::{BackendEvent, BackendStream, GenerationBackend};
use crate::errors::BackendError;
use crate::model::{BackendId, GenerationRequest};

/// One step of a backend script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Emit a text chunk.
    Chunk(String),
    /// Emit the terminal `Done` event with this full text.
    Done(String),
    /// Fail the stream with a transport error.
    Fail(String),
    /// Fail the stream with a protocol (undecodable chunk) error.
    Malformed(String),
    /// Wait before the next step.
    Pause(Duration),
    /// Never produce anything again, without closing the channel.
    Hang,
}

/// In-process backend replaying a [`ScriptStep`] list for every request.
#[derive(Clone)]
pub struct ScriptedBackend {
    id: BackendId,
    steps: Vec<ScriptStep>,
    opened: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// Creates a backend that replays `steps`.
    pub fn new(id: impl Into<BackendId>, steps: Vec<ScriptStep>) -> Self {
        Self {
            id: id.into(),
            steps,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Splits `text` into chunks of `chunk_chars` characters separated by
    /// `interval`, then sends `Done(text)`.
    ///
    /// Splitting is by `char`, not grapheme, so multi-codepoint clusters may
    /// straddle chunk boundaries the way real backends split them.
    pub fn chunked(
        id: impl Into<BackendId>,
        text: &str,
        chunk_chars: usize,
        interval: Duration,
    ) -> Self {
        Self::new(id, chunked_steps(text, chunk_chars, interval))
    }

    /// Number of times a stream has been opened on this backend.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

/// Builds the script used by [`ScriptedBackend::chunked`].
pub fn chunked_steps(text: &str, chunk_chars: usize, interval: Duration) -> Vec<ScriptStep> {
    let chars: Vec<char> = text.chars().collect();
    let mut steps = Vec::new();
    for piece in chars.chunks(chunk_chars.max(1)) {
        if !interval.is_zero() {
            steps.push(ScriptStep::Pause(interval));
        }
        steps.push(ScriptStep::Chunk(piece.iter().collect()));
    }
    steps.push(ScriptStep::Done(text.to_string()));
    steps
}

#[async_trait::async_trait]
impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    async fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<BackendStream, BackendError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = %request.request_id, backend = %self.id, steps = self.steps.len(), "opening scripted stream");
        Ok(BackendStream::new(replay(
            self.id.clone(),
            self.steps.iter().cloned().collect(),
        )))
    }
}

fn replay(
    id: BackendId,
    steps: VecDeque<ScriptStep>,
) -> impl futures::Stream<Item = Result<BackendEvent, BackendError>> + Send {
    stream::unfold((id, steps), |(id, mut steps)| async move {
        loop {
            let item = match steps.pop_front()? {
                ScriptStep::Pause(duration) => {
                    tokio::time::sleep(duration).await;
                    continue;
                }
                ScriptStep::Hang => return futures::future::pending().await,
                ScriptStep::Chunk(text) => Ok(BackendEvent::Chunk { text }),
                ScriptStep::Done(full_text) => Ok(BackendEvent::Done { full_text }),
                ScriptStep::Fail(message) => Err(BackendError::transport(id.clone(), message)),
                ScriptStep::Malformed(message) => {
                    Err(BackendError::protocol(id.clone(), message))
                }
            };
            return Some((item, (id, steps)));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(backend: &ScriptedBackend) -> Vec<Result<BackendEvent, BackendError>> {
        let mut stream = backend
            .open_stream(GenerationRequest::new("scripted", "p"))
            .await
            .expect("open");
        let mut out = Vec::new();
        while let Some(event) = stream.next_event().await {
            out.push(event);
        }
        out
    }

    #[test]
    fn chunked_steps_split_by_char_and_end_with_done() {
        let steps = chunked_steps("Hello", 2, Duration::ZERO);
        assert_eq!(
            steps,
            vec![
                ScriptStep::Chunk("He".into()),
                ScriptStep::Chunk("ll".into()),
                ScriptStep::Chunk("o".into()),
                ScriptStep::Done("Hello".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replays_chunks_then_done_and_counts_opens() {
        let backend = ScriptedBackend::chunked("scripted", "abc", 1, Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        let events = collect(&backend).await;
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[3],
            Ok(BackendEvent::Done {
                full_text: "abc".into()
            })
        );
        assert_eq!(started.elapsed(), Duration::from_millis(150));
        assert_eq!(backend.open_count(), 1);
    }

    #[tokio::test]
    async fn fail_and_malformed_map_to_error_kinds() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                ScriptStep::Chunk("x".into()),
                ScriptStep::Fail("network down".into()),
                ScriptStep::Malformed("bad utf-8".into()),
            ],
        );
        let events = collect(&backend).await;
        assert!(matches!(events[1], Err(BackendError::Transport { .. })));
        assert!(matches!(events[2], Err(BackendError::Protocol { .. })));
    }
}
