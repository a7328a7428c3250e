//! Async task that runs one [`StreamSession`] against its backend.
//!
//! The task owns the session and every timer. Each loop iteration handles
//! exactly one input (cancel, visibility change, pacing tick or upstream
//! signal), then reschedules pacing and checks the completion barrier.
//! Cancellation is polled first so nothing is processed after it lands. A
//! dropped [`SessionHandle`](crate::handle::SessionHandle) counts as
//! cancellation even while upstream is silent.

use std::sync::Arc;

use dashmap::DashMap;
use pacer_backend::{BackendStream, GenerationBackend, GenerationRequest};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{StreamAdapter, UpstreamSignal};
use crate::config::RenderConfig;
use crate::errors::{RenderError, render_error_from_backend};
use crate::handle::{RenderEvent, UpdateSource};
use crate::history::{HistoryRecord, HistorySink};
use crate::pacing::{Jitter, NoJitter, UniformJitter};
use crate::renderer::SlotEntry;
use crate::session::{RenderBatch, SessionSnapshot, StreamSession};
use crate::visibility::{Visibility, VisibilityChange};

pub(crate) struct SessionDriver {
    pub(crate) session: StreamSession,
    pub(crate) slot: String,
    pub(crate) backend: Arc<dyn GenerationBackend>,
    pub(crate) request: GenerationRequest,
    pub(crate) config: RenderConfig,
    pub(crate) history: Option<Arc<dyn HistorySink>>,
    pub(crate) slots: Arc<DashMap<String, SlotEntry>>,
    pub(crate) events: mpsc::Sender<RenderEvent>,
    pub(crate) snapshot: watch::Sender<SessionSnapshot>,
    pub(crate) cancel_rx: watch::Receiver<bool>,
    pub(crate) visibility_rx: mpsc::UnboundedReceiver<VisibilityChange>,
}

impl SessionDriver {
    pub(crate) async fn run(mut self, final_tx: oneshot::Sender<Result<String, RenderError>>) {
        let session_id = self.session.id();
        let result = self.drive().await;
        if matches!(result, Err(RenderError::Cancelled)) && self.session.cancel() {
            info!(session_id = %session_id, slot = %self.slot, "session cancelled");
        }
        self.publish();
        self.slots
            .remove_if(self.slot.as_str(), |_, entry| entry.session_id == session_id);
        let _ = final_tx.send(result);
    }

    async fn drive(&mut self) -> Result<String, RenderError> {
        let stream = self.open().await?;
        let mut adapter = StreamAdapter::new(
            self.request.backend.clone(),
            stream,
            self.config.idle_timeout,
        );
        self.session.start();
        self.publish();
        info!(
            session_id = %self.session.id(),
            slot = %self.slot,
            backend = %self.request.backend,
            "session streaming"
        );

        let mut jitter: Box<dyn Jitter> = if self.config.jitter {
            Box::new(UniformJitter)
        } else {
            Box::new(NoJitter)
        };
        let mut visibility_open = true;
        let mut next_tick: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel_requested(&mut self.cancel_rx) => {
                    adapter.close();
                    return Err(RenderError::Cancelled);
                }
                _ = self.events.closed() => {
                    debug!(session_id = %self.session.id(), "session handle dropped");
                    adapter.close();
                    return Err(RenderError::Cancelled);
                }
                change = self.visibility_rx.recv(), if visibility_open => {
                    match change {
                        Some(change) => self.on_visibility(change).await?,
                        None => visibility_open = false,
                    }
                }
                _ = tick_at(next_tick) => {
                    next_tick = match self.session.tick() {
                        Some(batch) => {
                            let delay = self.session.next_delay(jitter.as_mut());
                            self.emit_batch(batch, UpdateSource::Pacing).await?;
                            Some(Instant::now() + delay)
                        }
                        None => None,
                    };
                }
                signal = adapter.next_signal() => {
                    self.on_upstream(signal).await?;
                }
            }

            if !self.session.pacing_active() {
                next_tick = None;
            }
            if self.session.needs_pacing() {
                self.session.begin_pacing();
                next_tick = Some(Instant::now());
            }
            if let Some(text) = self.session.try_complete() {
                adapter.close();
                self.complete(&text).await;
                return Ok(text);
            }
            self.publish();
        }
    }

    async fn open(&mut self) -> Result<BackendStream, RenderError> {
        let opened = tokio::select! {
            biased;
            _ = cancel_requested(&mut self.cancel_rx) => return Err(RenderError::Cancelled),
            _ = self.events.closed() => return Err(RenderError::Cancelled),
            opened = self.backend.open_stream(self.request.clone()) => opened,
        };
        match opened {
            Ok(stream) => Ok(stream),
            Err(err) => {
                let error = render_error_from_backend(&err);
                Err(self.fail(error).await)
            }
        }
    }

    async fn on_upstream(&mut self, signal: UpstreamSignal) -> Result<(), RenderError> {
        match signal {
            UpstreamSignal::Chunk(text) => {
                self.session.on_chunk(&text);
            }
            UpstreamSignal::Done(full_text) => {
                let bytes = full_text.len();
                if self.session.on_done(full_text) {
                    debug!(session_id = %self.session.id(), bytes, "upstream done, draining");
                } else {
                    warn!(session_id = %self.session.id(), state = %self.session.state(), "ignoring duplicate upstream done");
                }
            }
            UpstreamSignal::Error(error) => return Err(self.fail(error).await),
            UpstreamSignal::Closed => {}
        }
        Ok(())
    }

    async fn on_visibility(&mut self, change: VisibilityChange) -> Result<(), RenderError> {
        match change.visibility {
            Visibility::Background => self.session.on_background(change.at),
            Visibility::Foreground => {
                if let Some(batch) = self.session.on_foreground(change.at) {
                    self.emit_batch(batch, UpdateSource::CatchUp).await?;
                }
            }
        }
        Ok(())
    }

    /// Moves the session to `Failed` and notifies the owner once.
    async fn fail(&mut self, error: RenderError) -> RenderError {
        if self.session.on_error(&error) {
            self.publish();
            let _ = self
                .emit(RenderEvent::Failed {
                    error: error.clone(),
                })
                .await;
        }
        error
    }

    async fn complete(&mut self, text: &str) {
        self.publish();
        info!(
            session_id = %self.session.id(),
            slot = %self.slot,
            units = self.session.snapshot().rendered_len,
            "session completed"
        );
        let _ = self
            .emit(RenderEvent::Completed {
                text: text.to_string(),
            })
            .await;
        self.record_history(text).await;
    }

    async fn record_history(&self, text: &str) {
        let Some(history) = self.history.as_ref() else {
            return;
        };
        let record = HistoryRecord {
            session_id: self.session.id(),
            slot: self.slot.clone(),
            backend: self.request.backend.to_string(),
            prompt: self.request.prompt.clone(),
            text: text.to_string(),
            completed_at: chrono::Utc::now(),
        };
        if let Err(err) = history.record(record).await {
            warn!(session_id = %self.session.id(), error = %err, "failed to record history");
        }
    }

    async fn emit_batch(&mut self, batch: RenderBatch, source: UpdateSource) -> Result<(), RenderError> {
        debug!(
            session_id = %self.session.id(),
            appended = batch.appended,
            rendered = batch.rendered_len,
            ?source,
            "render update"
        );
        self.publish();
        self.emit(RenderEvent::Update {
            text: batch.text,
            rendered_len: batch.rendered_len,
            source,
        })
        .await
    }

    /// Delivers an event, giving up on cancellation or a dropped receiver.
    async fn emit(&mut self, event: RenderEvent) -> Result<(), RenderError> {
        tokio::select! {
            biased;
            _ = cancel_requested(&mut self.cancel_rx) => Err(RenderError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| RenderError::Cancelled),
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.snapshot());
    }
}

/// Resolves once cancellation is requested or every cancel handle is gone.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn tick_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pacer_backend::{ScriptStep, ScriptedBackend};

    use super::*;
    use crate::history::MemoryHistory;
    use crate::renderer::Renderer;
    use crate::session::SessionState;

    fn config() -> RenderConfig {
        RenderConfig::default()
            .base_delay(Duration::from_millis(10))
            .jitter(false)
    }

    fn renderer(backend: ScriptedBackend) -> Renderer {
        Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config())
            .build()
            .expect("renderer")
    }

    async fn collect(handle: &mut crate::handle::SessionHandle) -> Vec<RenderEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    fn update_texts(events: &[RenderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                RenderEvent::Update { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn hello_renders_in_order_then_completes_once() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                ScriptStep::Chunk("He".into()),
                ScriptStep::Pause(Duration::from_millis(50)),
                ScriptStep::Chunk("llo".into()),
                ScriptStep::Done("Hello".into()),
            ],
        );
        let renderer = renderer(backend);
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "greet"))
            .expect("start");

        let events = collect(&mut handle).await;
        let texts = update_texts(&events);
        assert_eq!(texts.first().map(String::as_str), Some("He"));
        assert_eq!(texts.last().map(String::as_str), Some("Hello"));
        for pair in texts.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
        let completed: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Completed { .. }))
            .collect();
        assert_eq!(
            completed,
            vec![&RenderEvent::Completed {
                text: "Hello".into()
            }]
        );
        assert!(matches!(events.last(), Some(RenderEvent::Completed { .. })));
        assert_eq!(handle.state(), SessionState::Completed);
        assert_eq!(handle.finish().await, Ok("Hello".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn single_unit_chunks_render_through_prefixes() {
        let backend = ScriptedBackend::chunked("scripted", "Hello", 1, Duration::from_millis(40));
        let renderer = renderer(backend);
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "greet"))
            .expect("start");

        let events = collect(&mut handle).await;
        assert_eq!(
            update_texts(&events),
            vec!["H", "He", "Hel", "Hell", "Hello"]
        );
        let completions = events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(handle.finish().await, Ok("Hello".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_waits_for_local_drain() {
        let text = "x".repeat(60);
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk(text.clone()), ScriptStep::Done(text.clone())],
        );
        let renderer = renderer(backend);
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");

        let mut last_rendered = 0;
        while let Some(event) = handle.next_event().await {
            match event {
                RenderEvent::Update { rendered_len, .. } => last_rendered = rendered_len,
                RenderEvent::Completed { text: done } => {
                    assert_eq!(last_rendered, 60);
                    assert_eq!(done, text);
                }
                RenderEvent::Failed { error } => panic!("unexpected failure: {error}"),
            }
        }
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.queued_len, 0);
        assert_eq!(snapshot.produced_len, snapshot.rendered_len);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_keeps_partial_text_and_never_completes() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                ScriptStep::Chunk("Hel".into()),
                ScriptStep::Pause(Duration::from_millis(200)),
                ScriptStep::Chunk("lo, ".into()),
                ScriptStep::Pause(Duration::from_millis(200)),
                ScriptStep::Fail("network down".into()),
            ],
        );
        let history = Arc::new(MemoryHistory::new());
        let renderer = Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config())
            .history_sink(history.clone())
            .build()
            .expect("renderer");
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");

        let events = collect(&mut handle).await;
        assert_eq!(update_texts(&events).last().map(String::as_str), Some("Hello, "));
        assert!(matches!(
            events.last(),
            Some(RenderEvent::Failed { error: RenderError::Channel { message } }) if message.contains("network down")
        ));
        assert!(!events.iter().any(|e| matches!(e, RenderEvent::Completed { .. })));
        assert_eq!(handle.state(), SessionState::Failed);
        assert_eq!(handle.snapshot().queued_len, 0);
        assert!(history.records().is_empty());
        assert!(matches!(handle.finish().await, Err(RenderError::Channel { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_events_and_is_idempotent() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk("y".repeat(300)), ScriptStep::Hang],
        );
        let history = Arc::new(MemoryHistory::new());
        let renderer = Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config())
            .history_sink(history.clone())
            .build()
            .expect("renderer");
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");

        assert!(matches!(handle.next_event().await, Some(RenderEvent::Update { .. })));
        handle.cancel();
        handle.cancel();
        assert_eq!(handle.next_event().await, None);
        assert_eq!(handle.finish().await, Err(RenderError::Cancelled));
        assert!(history.records().is_empty());
        assert_eq!(renderer.active_session("main"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn catch_up_flushes_owed_units_on_foreground() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk("z".repeat(40)), ScriptStep::Hang],
        );
        let renderer = renderer(backend);
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        let visibility = handle.visibility();

        let first = handle.next_event().await;
        assert!(matches!(first, Some(RenderEvent::Update { rendered_len: 3, .. })));
        visibility.background();
        tokio::time::sleep(Duration::from_secs(2)).await;
        visibility.foreground();

        let mut catch_up = None;
        while let Some(event) = handle.next_event().await {
            if let RenderEvent::Update {
                source: UpdateSource::CatchUp,
                rendered_len,
                ..
            } = event
            {
                catch_up = Some(rendered_len);
                break;
            }
        }
        assert_eq!(catch_up, Some(40));
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn no_suspend_keeps_pacing_while_hidden() {
        let text = "z".repeat(60);
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk(text.clone()), ScriptStep::Done(text.clone())],
        );
        let renderer = Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config().suspend_in_background(false))
            .build()
            .expect("renderer");
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        let visibility = handle.visibility();

        assert!(matches!(
            handle.next_event().await,
            Some(RenderEvent::Update { rendered_len: 3, .. })
        ));
        visibility.background();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let hidden = handle.snapshot();
        assert!(hidden.backgrounded);
        assert!(hidden.pacing_active);
        assert!(hidden.rendered_len > 3);
        assert!(hidden.queued_len > 0);

        visibility.foreground();
        let events = collect(&mut handle).await;
        assert!(events.iter().any(|event| matches!(
            event,
            RenderEvent::Update {
                source: UpdateSource::CatchUp,
                ..
            }
        )));
        let completions = events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(events.last(), Some(&RenderEvent::Completed { text }));
        assert_eq!(handle.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn background_while_draining_holds_completion_until_foreground() {
        let text = "y".repeat(90);
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk(text.clone()), ScriptStep::Done(text.clone())],
        );
        let renderer = renderer(backend);
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        let visibility = handle.visibility();

        assert!(matches!(
            handle.next_event().await,
            Some(RenderEvent::Update { rendered_len: 3, .. })
        ));
        visibility.background();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let hidden = handle.snapshot();
        assert_eq!(hidden.state, SessionState::Draining);
        assert!(hidden.upstream_done);
        assert!(!hidden.pacing_active);
        assert_eq!(hidden.queued_len, 87);

        visibility.foreground();
        let events = collect(&mut handle).await;
        assert!(matches!(
            events.first(),
            Some(RenderEvent::Update {
                source: UpdateSource::CatchUp,
                rendered_len: 90,
                ..
            })
        ));
        assert_eq!(events.last(), Some(&RenderEvent::Completed { text: text.clone() }));
        assert_eq!(handle.finish().await, Ok(text));
    }

    #[tokio::test(start_paused = true)]
    async fn error_while_draining_fails_without_completion() {
        let text = "y".repeat(90);
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                ScriptStep::Chunk(text.clone()),
                ScriptStep::Done(text),
                ScriptStep::Pause(Duration::from_millis(50)),
                ScriptStep::Fail("late".into()),
            ],
        );
        let history = Arc::new(MemoryHistory::new());
        let renderer = Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config())
            .history_sink(history.clone())
            .build()
            .expect("renderer");
        let mut handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");

        let events = collect(&mut handle).await;
        assert!(matches!(
            events.last(),
            Some(RenderEvent::Failed { error: RenderError::Channel { message } }) if message.contains("late")
        ));
        assert!(!events.iter().any(|e| matches!(e, RenderEvent::Completed { .. })));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SessionState::Failed);
        assert!(snapshot.rendered_len < 90);
        assert_eq!(snapshot.queued_len, 0);
        assert_eq!(
            snapshot.produced_len,
            snapshot.rendered_len + snapshot.dropped_len
        );
        assert!(history.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_releases_slot_while_upstream_is_silent() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk("ab".into()), ScriptStep::Hang],
        );
        let renderer = renderer(backend);
        let handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        let id = handle.id();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.snapshot().queued_len, 0);
        assert_eq!(renderer.active_session("main"), Some(id));

        drop(handle);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(renderer.active_session("main"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_upstream_fails_session() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Chunk("ab".into()), ScriptStep::Hang],
        );
        let renderer = Renderer::builder()
            .register_backend(Arc::new(backend))
            .config(config().idle_timeout(Duration::from_millis(300)))
            .build()
            .expect("renderer");
        let handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        assert!(matches!(
            handle.finish().await,
            Err(RenderError::Channel { message }) if message.contains("idle")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_chunk_fails_session() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                ScriptStep::Chunk("ok".into()),
                ScriptStep::Malformed("bad utf-8".into()),
            ],
        );
        let renderer = renderer(backend);
        let handle = renderer
            .start("main", GenerationRequest::new("scripted", "p"))
            .expect("start");
        assert!(matches!(
            handle.finish().await,
            Err(RenderError::MalformedChunk { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_requested_resolves_on_flag_or_drop() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        cancel_requested(&mut rx).await;

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        cancel_requested(&mut rx).await;
    }
}
