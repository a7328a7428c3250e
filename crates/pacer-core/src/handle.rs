use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::errors::RenderError;
use crate::session::{SessionSnapshot, SessionState};
use crate::visibility::{Visibility, VisibilityChange};

/// Which path produced a render update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateSource {
    /// A regular pacing batch.
    Pacing,
    /// The flush after returning from background.
    CatchUp,
}

/// Events delivered to the owner of a session.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderEvent {
    /// Rendered text grew. `text` is the full rendered text so far.
    Update {
        text: String,
        rendered_len: usize,
        source: UpdateSource,
    },
    /// Fired exactly once, after upstream finished and every unit was shown.
    /// `text` is the authoritative full text.
    Completed { text: String },
    /// Fired at most once. Partial text from earlier updates is not final.
    Failed { error: RenderError },
}

/// Requests cancellation of a session.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Cancels the session. Calling it again has no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Feeds host foreground/background transitions to a session.
#[derive(Clone)]
pub struct VisibilityHandle {
    tx: mpsc::UnboundedSender<VisibilityChange>,
}

impl VisibilityHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<VisibilityChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports a transition, stamped with the current time.
    pub fn set(&self, visibility: Visibility) {
        let _ = self.tx.send(VisibilityChange {
            visibility,
            at: Instant::now(),
        });
    }

    pub fn background(&self) {
        self.set(Visibility::Background);
    }

    pub fn foreground(&self) {
        self.set(Visibility::Foreground);
    }
}

/// Owner's handle to a running session.
///
/// Use [`SessionHandle::next_event`] to follow rendering and
/// [`SessionHandle::finish`] for the terminal result.
pub struct SessionHandle {
    pub(crate) id: uuid::Uuid,
    pub(crate) slot: String,
    pub(crate) events: mpsc::Receiver<RenderEvent>,
    pub(crate) final_rx: oneshot::Receiver<Result<String, RenderError>>,
    pub(crate) snapshot: watch::Receiver<SessionSnapshot>,
    pub(crate) cancel: CancelHandle,
    pub(crate) visibility: VisibilityHandle,
    pub(crate) saw_terminal: bool,
}

impl SessionHandle {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn visibility(&self) -> VisibilityHandle {
        self.visibility.clone()
    }

    /// Waits for the next render event.
    ///
    /// Returns `None` once the session is over, and immediately after
    /// cancellation: events racing with `cancel()` are discarded.
    pub async fn next_event(&mut self) -> Option<RenderEvent> {
        if self.cancel.is_cancelled() || self.saw_terminal {
            return None;
        }
        let event = self.events.recv().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        if let Some(RenderEvent::Completed { .. } | RenderEvent::Failed { .. }) = &event {
            self.saw_terminal = true;
        }
        event
    }

    /// Waits for the session to end and returns the authoritative text.
    ///
    /// Pending events are drained and discarded. Cancellation yields
    /// `RenderError::Cancelled`.
    pub async fn finish(mut self) -> Result<String, RenderError> {
        loop {
            tokio::select! {
                result = &mut self.final_rx => {
                    return result.unwrap_or_else(|_| Err(RenderError::protocol_msg(format!(
                        "session {} ended without a final result",
                        self.id
                    ))));
                }
                event = self.events.recv() => {
                    if event.is_none() {
                        return (&mut self.final_rx).await.unwrap_or_else(|_| {
                            Err(RenderError::protocol_msg("session driver dropped"))
                        });
                    }
                }
            }
        }
    }
}
